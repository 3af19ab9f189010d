//! Per-connection error taxonomy.
//!
//! Every failure while serving a connection is one of these variants. The
//! dispatcher maps each to the canned reply the client receives; none of them
//! escape the connection task.

use std::io;
use thiserror::Error;

use crate::http::request::ParseError;
use crate::http::response;

/// Errors raised while serving a single client connection.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// The request head could not be parsed.
    #[error("malformed request: {0}")]
    Parse(#[from] ParseError),

    /// The method is not one of CONNECT, GET or POST.
    #[error("method not allowed: {0}")]
    UnsupportedMethod(String),

    /// Request head or body exceeded the configured limit.
    #[error("request exceeds limit of {limit} bytes")]
    RequestTooLarge { limit: usize },

    /// TCP connect to the origin failed (forward path).
    #[error("failed to connect to origin {target}: {source}")]
    UpstreamConnect {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Writing the request to, or reading the response from, the origin failed.
    #[error("origin {target} I/O error: {source}")]
    UpstreamIo {
        target: String,
        #[source]
        source: io::Error,
    },

    /// TCP connect to the tunnel target failed.
    #[error("failed to open tunnel to {target}: {source}")]
    TunnelConnect {
        target: String,
        #[source]
        source: io::Error,
    },

    /// TLS negotiation with the tunnel target failed.
    #[error("TLS handshake with {target} failed: {source}")]
    TunnelHandshake {
        target: String,
        #[source]
        source: io::Error,
    },

    /// Reading from or writing to the client failed.
    #[error("client I/O error: {0}")]
    ClientIo(#[source] io::Error),
}

impl ProxyError {
    /// The canned reply written to the client for this failure.
    pub fn client_reply(&self) -> &'static [u8] {
        match self {
            ProxyError::UnsupportedMethod(_) => response::METHOD_NOT_ALLOWED,
            ProxyError::RequestTooLarge { .. } => response::PAYLOAD_TOO_LARGE,
            ProxyError::TunnelConnect { .. } | ProxyError::TunnelHandshake { .. } => {
                response::INTERNAL_SERVER_ERROR
            }
            ProxyError::Parse(_)
            | ProxyError::UpstreamConnect { .. }
            | ProxyError::UpstreamIo { .. }
            | ProxyError::ClientIo(_) => response::BAD_REQUEST,
        }
    }

    /// Short label used for the `outcome` metric dimension.
    pub fn kind(&self) -> &'static str {
        match self {
            ProxyError::Parse(_) => "parse_error",
            ProxyError::UnsupportedMethod(_) => "method_not_allowed",
            ProxyError::RequestTooLarge { .. } => "too_large",
            ProxyError::UpstreamConnect { .. } => "upstream_connect",
            ProxyError::UpstreamIo { .. } => "upstream_io",
            ProxyError::TunnelConnect { .. } => "tunnel_connect",
            ProxyError::TunnelHandshake { .. } => "tunnel_handshake",
            ProxyError::ClientIo(_) => "client_io",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_follow_taxonomy() {
        let e = ProxyError::UnsupportedMethod("DELETE".into());
        assert_eq!(e.client_reply(), b"HTTP/1.1 405 Method Not Allowed\r\n\r\n");

        let e = ProxyError::Parse(ParseError::MalformedRequestLine);
        assert_eq!(e.client_reply(), b"HTTP/1.1 400 Bad Request\r\n\r\n");

        let e = ProxyError::TunnelConnect {
            target: "example.com:443".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(e.client_reply(), b"HTTP/1.1 500 Internal Server Error\r\n\r\n");

        let e = ProxyError::UpstreamConnect {
            target: "example.com:80".into(),
            source: io::Error::from(io::ErrorKind::ConnectionRefused),
        };
        assert_eq!(e.client_reply(), b"HTTP/1.1 400 Bad Request\r\n\r\n");
    }
}
