//! Plaintext origin forwarding.
//!
//! One fresh TCP connection per request. The request is rebuilt from scratch
//! with `Connection: close`, and the response is whatever the origin sends
//! until it closes its side.

use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::request::{Method, OriginTarget, Request};
use crate::http::response::detect_failure;
use crate::observability::metrics;
use crate::resilience::timeouts::with_timeout;

/// Sends GET/POST requests to origin servers.
#[derive(Debug, Clone)]
pub struct OriginForwarder {
    connect_timeout: Option<Duration>,
    io_timeout: Option<Duration>,
    read_chunk_bytes: usize,
}

impl OriginForwarder {
    pub fn new(config: &ProxyConfig) -> Self {
        Self {
            connect_timeout: config.timeouts.connect(),
            io_timeout: config.timeouts.io(),
            read_chunk_bytes: config.limits.read_chunk_bytes,
        }
    }

    /// Forward `request` to `target` and return the raw response bytes.
    pub async fn forward(&self, request: &Request, target: &OriginTarget) -> Result<Vec<u8>, ProxyError> {
        let (host, port) = target.connect_addr();
        let mut origin = with_timeout(self.connect_timeout, TcpStream::connect((host.as_str(), port)))
            .await
            .map_err(|source| ProxyError::UpstreamConnect {
                target: target.to_string(),
                source,
            })?;
        tracing::info!(origin = %target, "Connected to origin");

        let upstream_io = |source: std::io::Error| ProxyError::UpstreamIo {
            target: target.to_string(),
            source,
        };

        let outgoing = build_origin_request(&request.method, target, &request.body);
        if request.method == Method::Post {
            tracing::debug!(
                body_len = request.body.len(),
                body_preview = %String::from_utf8_lossy(&request.body[..request.body.len().min(100)]),
                "Forwarding POST body"
            );
        }
        with_timeout(self.io_timeout, origin.write_all(&outgoing))
            .await
            .map_err(upstream_io)?;

        let mut response = Vec::new();
        let mut chunk = vec![0u8; self.read_chunk_bytes];
        loop {
            let n = with_timeout(self.io_timeout, origin.read(&mut chunk))
                .await
                .map_err(upstream_io)?;
            if n == 0 {
                break;
            }
            response.extend_from_slice(&chunk[..n]);
        }

        if let Some(failure) = detect_failure(&response) {
            tracing::error!(
                origin = %target,
                status = failure.status(),
                "Origin reported an error"
            );
            metrics::record_origin_failure(failure.status());
        }

        Ok(response)
    }
}

/// Rebuild the request sent to the origin.
///
/// Only the method, path and body of the client request survive; the header
/// block is regenerated.
pub fn build_origin_request(method: &Method, target: &OriginTarget, body: &[u8]) -> Vec<u8> {
    match method {
        Method::Post => {
            let mut out = format!(
                "POST {} HTTP/1.1\r\nHost: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                target.path,
                target.host_header,
                body.len()
            )
            .into_bytes();
            out.extend_from_slice(body);
            out
        }
        _ => format!(
            "GET {} HTTP/1.1\r\nHost: {}\r\nConnection: close\r\n\r\n",
            target.path, target.host_header
        )
        .into_bytes(),
    }
}
