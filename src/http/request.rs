//! Request reading and parsing.
//!
//! # Responsibilities
//! - Read the request head off the client socket (bounded)
//! - Parse the request line, headers and any buffered body
//! - Resolve the target into an origin address or a CONNECT authority
//!
//! # Design Decisions
//! - One request per connection; the head is read until `\r\n\r\n` or EOF
//! - Method tokens are matched case-sensitively
//! - The literal target string is kept untouched, it is the cache key input

use std::fmt;
use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt};
use url::{Host, Url};

use crate::config::LimitsConfig;
use crate::error::ProxyError;
use crate::resilience::timeouts::with_timeout;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Reasons a request cannot be parsed. All map to `400 Bad Request`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    #[error("empty request")]
    Empty,

    #[error("malformed request line")]
    MalformedRequestLine,

    #[error("request head is not valid UTF-8")]
    InvalidEncoding,

    #[error("invalid target {0:?}")]
    InvalidTarget(String),

    #[error("target {0:?} has no host")]
    MissingHost(String),

    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    #[error("invalid Content-Length {0:?}")]
    InvalidContentLength(String),

    #[error("body ended after {received} of {expected} bytes")]
    TruncatedBody { expected: usize, received: usize },
}

/// Request method as far as the proxy cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Method {
    Connect,
    Get,
    Post,
    Other(String),
}

impl Method {
    pub fn from_token(token: &str) -> Self {
        match token {
            "CONNECT" => Method::Connect,
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => Method::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Method::Connect => "CONNECT",
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Other(token) => token,
        }
    }

    /// Label for metric dimensions. Unrecognized tokens share one label so
    /// clients cannot mint new series.
    pub fn metric_label(&self) -> &'static str {
        match self {
            Method::Connect => "CONNECT",
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Other(_) => "OTHER",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A parsed client request. Immutable once the body is complete.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    /// Target exactly as sent on the request line.
    pub target: String,
    pub version: String,
    /// Headers in arrival order.
    pub headers: Vec<(String, String)>,
    /// Bytes after the first blank line.
    pub body: Vec<u8>,
}

impl Request {
    /// Parse a raw buffer holding the request head and possibly part of the body.
    pub fn parse(raw: &[u8]) -> Result<Self, ParseError> {
        if raw.is_empty() {
            return Err(ParseError::Empty);
        }

        let (head, body) = match find(raw, HEAD_TERMINATOR) {
            Some(pos) => (&raw[..pos], &raw[pos + HEAD_TERMINATOR.len()..]),
            None => (raw, &[][..]),
        };
        // Lossy decoding would fold distinct targets into one cache key.
        let head = std::str::from_utf8(head).map_err(|_| ParseError::InvalidEncoding)?;
        let mut lines = head.split('\n').map(|l| l.trim_end_matches('\r'));

        let first_line = lines.next().unwrap_or_default();
        let mut tokens = first_line.split_whitespace();
        let (method, target, version) = match (tokens.next(), tokens.next(), tokens.next(), tokens.next()) {
            (Some(m), Some(t), Some(v), None) => (m, t, v),
            _ => return Err(ParseError::MalformedRequestLine),
        };

        let headers = lines
            .filter_map(|line| {
                let (name, value) = line.split_once(':')?;
                Some((name.trim().to_string(), value.trim().to_string()))
            })
            .collect();

        Ok(Self {
            method: Method::from_token(method),
            target: target.to_string(),
            version: version.to_string(),
            headers,
            body: body.to_vec(),
        })
    }

    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Declared body length; a missing header means no body.
    pub fn content_length(&self) -> Result<usize, ParseError> {
        match self.header("Content-Length") {
            None => Ok(0),
            Some(value) => value
                .parse()
                .map_err(|_| ParseError::InvalidContentLength(value.to_string())),
        }
    }

    /// Resolve the target of a GET/POST into the origin to contact.
    pub fn origin_target(&self, default_port: u16) -> Result<OriginTarget, ParseError> {
        OriginTarget::resolve(&self.target, default_port)
    }

    /// Resolve the target of a CONNECT into `host:port`.
    pub fn authority(&self, default_port: u16) -> Result<Authority, ParseError> {
        Authority::parse(&self.target, default_port)
    }
}

/// Where a plaintext request is forwarded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OriginTarget {
    /// Host to connect to (IPv6 literals without brackets).
    pub host: String,
    pub port: u16,
    /// Value for the `Host` header.
    pub host_header: String,
    /// Path plus query, never empty.
    pub path: String,
}

impl OriginTarget {
    /// Absolute-form targets are parsed as-is; anything without a scheme is
    /// treated as `http://` followed by the target minus its leading slashes.
    ///
    /// Only `http` is forwarded. Any other scheme is rejected rather than sent
    /// as plaintext to port 80; TLS origins are reached through CONNECT.
    pub fn resolve(target: &str, default_port: u16) -> Result<Self, ParseError> {
        let absolute = if has_scheme(target) {
            target.to_string()
        } else {
            format!("http://{}", target.trim_start_matches('/'))
        };

        // `url` is only trusted for the authority; it normalizes paths.
        let url = Url::parse(&absolute).map_err(|e| match e {
            url::ParseError::EmptyHost => ParseError::MissingHost(target.to_string()),
            _ => ParseError::InvalidTarget(target.to_string()),
        })?;

        if url.scheme() != "http" {
            return Err(ParseError::UnsupportedScheme(url.scheme().to_string()));
        }

        let host = match url.host() {
            Some(Host::Domain(d)) if !d.is_empty() => d.to_string(),
            Some(Host::Ipv4(addr)) => addr.to_string(),
            Some(Host::Ipv6(addr)) => addr.to_string(),
            _ => return Err(ParseError::MissingHost(target.to_string())),
        };
        let host_str = url.host_str().unwrap_or(&host);
        let host_header = match url.port() {
            Some(port) => format!("{}:{}", host_str, port),
            None => host_str.to_string(),
        };

        Ok(Self {
            host,
            port: url.port().unwrap_or(default_port),
            host_header,
            path: literal_path(&absolute),
        })
    }

    /// `host:port` suitable for `TcpStream::connect`.
    pub fn connect_addr(&self) -> (String, u16) {
        (self.host.clone(), self.port)
    }
}

impl fmt::Display for OriginTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// `host[:port]` target of a CONNECT request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Authority {
    pub host: String,
    pub port: u16,
}

impl Authority {
    pub fn parse(target: &str, default_port: u16) -> Result<Self, ParseError> {
        let invalid = || ParseError::InvalidTarget(target.to_string());

        let (host, port) = if let Some(rest) = target.strip_prefix('[') {
            let (host, after) = rest.split_once(']').ok_or_else(invalid)?;
            match after {
                "" => (host, None),
                p => (host, Some(p.strip_prefix(':').ok_or_else(invalid)?)),
            }
        } else {
            match target.matches(':').count() {
                0 => (target, None),
                1 => {
                    let (h, p) = target.split_once(':').ok_or_else(invalid)?;
                    (h, Some(p))
                }
                // bare IPv6 literal
                _ => (target, None),
            }
        };

        if host.is_empty() {
            return Err(ParseError::MissingHost(target.to_string()));
        }
        let port = match port {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => default_port,
        };

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

impl fmt::Display for Authority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Read from the client until the end of the request head, EOF, or the limit.
///
/// The returned buffer may hold body bytes past the head terminator.
pub async fn read_head<S>(
    stream: &mut S,
    limits: &LimitsConfig,
    io_timeout: Option<Duration>,
) -> Result<Vec<u8>, ProxyError>
where
    S: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(limits.read_chunk_bytes);
    let mut chunk = vec![0u8; limits.read_chunk_bytes];

    loop {
        let n = with_timeout(io_timeout, stream.read(&mut chunk))
            .await
            .map_err(ProxyError::ClientIo)?;
        if n == 0 {
            return Ok(buf);
        }

        let scan_from = buf.len().saturating_sub(HEAD_TERMINATOR.len() - 1);
        buf.extend_from_slice(&chunk[..n]);

        if let Some(pos) = find(&buf[scan_from..], HEAD_TERMINATOR) {
            if scan_from + pos > limits.max_header_bytes {
                return Err(ProxyError::RequestTooLarge {
                    limit: limits.max_header_bytes,
                });
            }
            return Ok(buf);
        }
        if buf.len() > limits.max_header_bytes {
            return Err(ProxyError::RequestTooLarge {
                limit: limits.max_header_bytes,
            });
        }
    }
}

/// Complete `request.body` to exactly its declared `Content-Length`.
///
/// Bytes beyond the declared length are discarded.
pub async fn read_body<S>(
    stream: &mut S,
    request: &mut Request,
    limits: &LimitsConfig,
    io_timeout: Option<Duration>,
) -> Result<(), ProxyError>
where
    S: AsyncRead + Unpin,
{
    let expected = request.content_length()?;
    if expected > limits.max_body_bytes {
        return Err(ProxyError::RequestTooLarge {
            limit: limits.max_body_bytes,
        });
    }

    let mut chunk = vec![0u8; limits.read_chunk_bytes];
    while request.body.len() < expected {
        let n = with_timeout(io_timeout, stream.read(&mut chunk))
            .await
            .map_err(ProxyError::ClientIo)?;
        if n == 0 {
            return Err(ParseError::TruncatedBody {
                expected,
                received: request.body.len(),
            }
            .into());
        }
        request.body.extend_from_slice(&chunk[..n]);
    }
    request.body.truncate(expected);
    Ok(())
}

/// Path and query of an absolute URL exactly as written, minus any fragment.
fn literal_path(absolute: &str) -> String {
    let after_scheme = absolute
        .split_once("://")
        .map_or(absolute, |(_, rest)| rest);
    let rest = match after_scheme.find(['/', '?', '#']) {
        Some(pos) => &after_scheme[pos..],
        None => "",
    };
    let rest = rest.split('#').next().unwrap_or_default();

    if rest.starts_with('/') {
        rest.to_string()
    } else {
        format!("/{}", rest)
    }
}

fn has_scheme(target: &str) -> bool {
    match target.split_once("://") {
        Some((scheme, _)) => {
            let mut chars = scheme.chars();
            chars.next().is_some_and(|c| c.is_ascii_alphabetic())
                && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
        }
        None => false,
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}
