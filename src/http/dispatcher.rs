//! Per-connection request dispatch.
//!
//! # Responsibilities
//! - Read and parse exactly one request from the client
//! - Route CONNECT to the tunnel, GET/POST to cache + origin, reject the rest
//! - Write the final bytes and close the connection on every path

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};

use crate::cache::{CacheKey, CacheStore};
use crate::config::{LimitsConfig, ProxyConfig};
use crate::error::ProxyError;
use crate::http::request::{read_body, read_head, Method, Request};
use crate::net::tls::UpstreamTls;
use crate::observability::metrics;
use crate::resilience::timeouts::with_timeout;
use crate::upstream::{OriginForwarder, TunnelRelay};

/// How a successfully served connection was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    CacheHit,
    Forwarded,
    Tunneled,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::CacheHit => "cache_hit",
            Outcome::Forwarded => "forwarded",
            Outcome::Tunneled => "tunneled",
        }
    }
}

/// Shared by every connection task; holds no per-connection state.
#[derive(Debug)]
pub struct Dispatcher {
    cache: Option<Arc<CacheStore>>,
    forwarder: OriginForwarder,
    tunnel: TunnelRelay,
    limits: LimitsConfig,
    io_timeout: Option<Duration>,
    origin_port: u16,
}

impl Dispatcher {
    /// `cache` is `None` when caching is disabled; `tls` is `None` for raw tunnels.
    pub fn new(config: &ProxyConfig, cache: Option<Arc<CacheStore>>, tls: Option<UpstreamTls>) -> Self {
        Self {
            cache,
            forwarder: OriginForwarder::new(config),
            tunnel: TunnelRelay::new(config, tls),
            limits: config.limits.clone(),
            io_timeout: config.timeouts.io(),
            origin_port: config.origin.default_port,
        }
    }

    pub fn cache(&self) -> Option<&Arc<CacheStore>> {
        self.cache.as_ref()
    }

    /// Serve one client connection to completion and close it.
    pub async fn dispatch<S>(&self, mut client: S) -> Result<Outcome, ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let start = Instant::now();
        let mut method = None;

        let result = self.handle(&mut client, &mut method).await;
        let label = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(e) => {
                match e {
                    ProxyError::Parse(_)
                    | ProxyError::UnsupportedMethod(_)
                    | ProxyError::RequestTooLarge { .. } => {
                        tracing::warn!(error = %e, "Rejecting request")
                    }
                    ProxyError::ClientIo(_) => tracing::debug!(error = %e, "Client connection failed"),
                    _ => tracing::error!(error = %e, "Failed to serve request"),
                }
                if let Err(write_err) =
                    with_timeout(self.io_timeout, client.write_all(e.client_reply())).await
                {
                    tracing::debug!(error = %write_err, "Could not deliver error reply");
                }
                e.kind()
            }
        };

        let _ = client.shutdown().await;
        drop(client);

        let method = method.as_ref().map(Method::metric_label).unwrap_or("-");
        metrics::record_request(method, label, start);
        result
    }

    async fn handle<S>(&self, client: &mut S, method: &mut Option<Method>) -> Result<Outcome, ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let raw = read_head(client, &self.limits, self.io_timeout).await?;
        tracing::debug!(bytes = raw.len(), "Request head received");

        let mut request = Request::parse(&raw)?;
        *method = Some(request.method.clone());
        tracing::info!(method = %request.method, url = %request.target, "Request");

        match request.method {
            Method::Connect => {
                self.tunnel.serve(client, &request).await?;
                Ok(Outcome::Tunneled)
            }
            Method::Get | Method::Post => self.forward(client, &mut request).await,
            Method::Other(ref token) => Err(ProxyError::UnsupportedMethod(token.clone())),
        }
    }

    async fn forward<S>(&self, client: &mut S, request: &mut Request) -> Result<Outcome, ProxyError>
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let target = request.origin_target(self.origin_port)?;
        let key = CacheKey::for_target(&request.target);

        if request.method == Method::Get {
            if let Some(payload) = self.cached(&key, &request.target).await {
                self.reply(client, &payload).await?;
                return Ok(Outcome::CacheHit);
            }
        }

        if request.method == Method::Post {
            read_body(client, request, &self.limits, self.io_timeout).await?;
        }

        let response = self.forwarder.forward(request, &target).await?;

        if !response.is_empty() {
            if let Some(cache) = &self.cache {
                match cache.store(&key, &response).await {
                    Ok(()) => tracing::info!(
                        url = %request.target,
                        path = ?cache.path_for(&key),
                        "Response cached"
                    ),
                    Err(e) => {
                        tracing::error!(error = %e, "Failed to cache response");
                        metrics::record_cache_write_error();
                    }
                }
            }
        }

        self.reply(client, &response).await?;
        Ok(Outcome::Forwarded)
    }

    async fn cached(&self, key: &CacheKey, target: &str) -> Option<Vec<u8>> {
        let cache = self.cache.as_ref()?;
        match cache.lookup(key).await {
            Ok(Some(payload)) => {
                tracing::info!(url = %target, "Serving response from cache");
                metrics::record_cache_lookup(true);
                Some(payload)
            }
            Ok(None) => {
                metrics::record_cache_lookup(false);
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Cache lookup failed, forwarding to origin");
                metrics::record_cache_lookup(false);
                None
            }
        }
    }

    async fn reply<S>(&self, client: &mut S, bytes: &[u8]) -> Result<(), ProxyError>
    where
        S: AsyncWrite + Unpin,
    {
        with_timeout(self.io_timeout, client.write_all(bytes))
            .await
            .map_err(ProxyError::ClientIo)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, AsyncReadExt};

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(&ProxyConfig::default(), None, None)
    }

    async fn exchange(dispatcher: &Dispatcher, raw: &[u8]) -> (Result<Outcome, ProxyError>, Vec<u8>) {
        let (server_side, mut client_side) = duplex(64 * 1024);
        client_side.write_all(raw).await.unwrap();
        client_side.shutdown().await.unwrap();

        let result = dispatcher.dispatch(server_side).await;
        let mut reply = Vec::new();
        client_side.read_to_end(&mut reply).await.unwrap();
        (result, reply)
    }

    #[tokio::test]
    async fn unknown_method_gets_405() {
        let (result, reply) = exchange(&dispatcher(), b"DELETE http://a.example/x HTTP/1.1\r\n\r\n").await;
        assert!(matches!(result, Err(ProxyError::UnsupportedMethod(ref m)) if m == "DELETE"));
        assert_eq!(reply, b"HTTP/1.1 405 Method Not Allowed\r\n\r\n".to_vec());
    }

    #[tokio::test]
    async fn single_token_line_gets_400() {
        let (result, reply) = exchange(&dispatcher(), b"NONSENSE\r\n\r\n").await;
        assert!(matches!(result, Err(ProxyError::Parse(_))));
        assert_eq!(reply, b"HTTP/1.1 400 Bad Request\r\n\r\n".to_vec());
    }

    #[tokio::test]
    async fn empty_connection_gets_400() {
        let (result, reply) = exchange(&dispatcher(), b"").await;
        assert!(result.is_err());
        assert_eq!(reply, b"HTTP/1.1 400 Bad Request\r\n\r\n".to_vec());
    }

    #[tokio::test]
    async fn missing_host_gets_400() {
        let (_, reply) = exchange(&dispatcher(), b"GET / HTTP/1.1\r\n\r\n").await;
        assert_eq!(reply, b"HTTP/1.1 400 Bad Request\r\n\r\n".to_vec());
    }

    #[tokio::test]
    async fn bad_connect_authority_gets_500() {
        let (result, reply) = exchange(&dispatcher(), b"CONNECT :443 HTTP/1.1\r\n\r\n").await;
        assert!(matches!(result, Err(ProxyError::TunnelConnect { .. })));
        assert_eq!(reply, b"HTTP/1.1 500 Internal Server Error\r\n\r\n".to_vec());
    }

    #[tokio::test]
    async fn oversized_body_gets_413() {
        let mut config = ProxyConfig::default();
        config.limits.max_body_bytes = 4;
        let dispatcher = Dispatcher::new(&config, None, None);

        let (result, reply) = exchange(
            &dispatcher,
            b"POST http://127.0.0.1:9/ HTTP/1.1\r\nContent-Length: 10\r\n\r\n0123456789",
        )
        .await;
        assert!(matches!(result, Err(ProxyError::RequestTooLarge { limit: 4 })));
        assert_eq!(reply, b"HTTP/1.1 413 Payload Too Large\r\n\r\n".to_vec());
    }
}
