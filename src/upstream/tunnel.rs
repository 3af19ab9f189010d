//! CONNECT tunnel relay.
//!
//! # Responsibilities
//! - Open the upstream connection (TCP, then TLS as client)
//! - Acknowledge the client with `200 Connection Established`
//! - Copy bytes both ways until either side closes or fails
//!
//! # Design Decisions
//! - The two directions are polled concurrently, so a quiet side never
//!   stalls a busy one
//! - The first direction to finish ends the session; the other is dropped
//! - Nothing is sent to the client until the upstream is ready, so setup
//!   failures can still be answered with a 500

use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;

use crate::config::ProxyConfig;
use crate::error::ProxyError;
use crate::http::request::{Authority, Request};
use crate::http::response::CONNECTION_ESTABLISHED;
use crate::net::tls::UpstreamTls;
use crate::observability::metrics;
use crate::resilience::timeouts::with_timeout;

const RELAY_BUFFER_BYTES: usize = 16 * 1024;

/// Upstream side of a tunnel.
pub enum UpstreamStream {
    Tls(Box<TlsStream<TcpStream>>),
    Plain(TcpStream),
}

/// Which side ended the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClosedBy {
    Client,
    Upstream,
}

/// Byte counts and termination cause of a finished tunnel.
#[derive(Debug)]
pub struct RelayStats {
    pub client_to_upstream: u64,
    pub upstream_to_client: u64,
    pub closed_by: ClosedBy,
    /// Set when the session ended on an I/O error rather than EOF.
    pub error: Option<io::Error>,
}

/// Establishes tunnels for CONNECT requests.
#[derive(Debug, Clone)]
pub struct TunnelRelay {
    tls: Option<UpstreamTls>,
    connect_timeout: Option<Duration>,
    default_port: u16,
}

impl TunnelRelay {
    /// `tls` is `None` when tunnels relay raw TCP.
    pub fn new(config: &ProxyConfig, tls: Option<UpstreamTls>) -> Self {
        Self {
            tls,
            connect_timeout: config.timeouts.connect(),
            default_port: config.tunnel.default_port,
        }
    }

    /// Connect to the CONNECT target, negotiating TLS when configured.
    pub async fn establish(&self, authority: &Authority) -> Result<UpstreamStream, ProxyError> {
        let tcp = with_timeout(
            self.connect_timeout,
            TcpStream::connect((authority.host.as_str(), authority.port)),
        )
        .await
        .map_err(|source| ProxyError::TunnelConnect {
            target: authority.to_string(),
            source,
        })?;

        match &self.tls {
            Some(tls) => {
                let stream = with_timeout(self.connect_timeout, tls.connect(&authority.host, tcp))
                    .await
                    .map_err(|source| ProxyError::TunnelHandshake {
                        target: authority.to_string(),
                        source,
                    })?;
                Ok(UpstreamStream::Tls(Box::new(stream)))
            }
            None => Ok(UpstreamStream::Plain(tcp)),
        }
    }

    /// Serve a CONNECT request on `client` until the tunnel closes.
    ///
    /// Errors are only returned for failures before the 200 is sent; once the
    /// tunnel is up, its end is reported through [`RelayStats`].
    pub async fn serve<C>(&self, client: &mut C, request: &Request) -> Result<RelayStats, ProxyError>
    where
        C: AsyncRead + AsyncWrite + Unpin,
    {
        let authority = request
            .authority(self.default_port)
            .map_err(|e| ProxyError::TunnelConnect {
                target: request.target.clone(),
                source: io::Error::new(io::ErrorKind::InvalidInput, e),
            })?;

        let upstream = self.establish(&authority).await?;
        tracing::info!(authority = %authority, tls = self.tls.is_some(), "Tunnel established");

        client
            .write_all(CONNECTION_ESTABLISHED)
            .await
            .map_err(ProxyError::ClientIo)?;

        // Bytes the client sent right behind the CONNECT head belong upstream.
        let early = &request.body;
        let stats = match upstream {
            UpstreamStream::Tls(mut tls) => {
                send_early(&mut tls, early).await;
                relay(client, tls).await
            }
            UpstreamStream::Plain(mut tcp) => {
                send_early(&mut tcp, early).await;
                relay(client, tcp).await
            }
        };

        metrics::record_tunnel_bytes("client_to_upstream", stats.client_to_upstream);
        metrics::record_tunnel_bytes("upstream_to_client", stats.upstream_to_client);
        match &stats.error {
            Some(e) => tracing::debug!(
                authority = %authority,
                closed_by = ?stats.closed_by,
                error = %e,
                "Tunnel ended on error"
            ),
            None => tracing::info!(
                authority = %authority,
                closed_by = ?stats.closed_by,
                sent = stats.client_to_upstream,
                received = stats.upstream_to_client,
                "Tunnel closed"
            ),
        }
        Ok(stats)
    }
}

async fn send_early<U>(upstream: &mut U, early: &[u8])
where
    U: AsyncWrite + Unpin,
{
    if early.is_empty() {
        return;
    }
    if let Err(e) = upstream.write_all(early).await {
        tracing::debug!(error = %e, "Failed to forward early tunnel bytes");
    }
}

/// Copy both directions concurrently until the first one ends.
pub async fn relay<C, U>(client: C, upstream: U) -> RelayStats
where
    C: AsyncRead + AsyncWrite + Unpin,
    U: AsyncRead + AsyncWrite + Unpin,
{
    let (mut client_read, mut client_write) = tokio::io::split(client);
    let (mut upstream_read, mut upstream_write) = tokio::io::split(upstream);

    let mut sent = 0u64;
    let mut received = 0u64;

    let (closed_by, result) = tokio::select! {
        r = pump(&mut client_read, &mut upstream_write, &mut sent) => (ClosedBy::Client, r),
        r = pump(&mut upstream_read, &mut client_write, &mut received) => (ClosedBy::Upstream, r),
    };

    RelayStats {
        client_to_upstream: sent,
        upstream_to_client: received,
        closed_by,
        error: result.err(),
    }
}

/// Copy `from` into `to` until EOF, counting bytes written.
async fn pump<R, W>(from: &mut R, to: &mut W, copied: &mut u64) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; RELAY_BUFFER_BYTES];
    loop {
        let n = from.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        to.write_all(&buf[..n]).await?;
        to.flush().await?;
        *copied += n as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn relays_both_directions() {
        let (client, mut client_peer) = duplex(1024);
        let (upstream, mut upstream_peer) = duplex(1024);

        let session = tokio::spawn(relay(client, upstream));

        client_peer.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        upstream_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");

        upstream_peer.write_all(b"pong!").await.unwrap();
        let mut buf = [0u8; 5];
        client_peer.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"pong!");

        drop(upstream_peer);
        let stats = session.await.unwrap();
        assert_eq!(stats.closed_by, ClosedBy::Upstream);
        assert_eq!(stats.client_to_upstream, 4);
        assert_eq!(stats.upstream_to_client, 5);
        assert!(stats.error.is_none());
    }

    #[tokio::test]
    async fn quiet_side_does_not_block_busy_side() {
        let (client, _client_peer) = duplex(1024);
        let (upstream, mut upstream_peer) = duplex(1024);

        let session = tokio::spawn(relay(client, upstream));

        // The client never writes; upstream → client must still flow.
        upstream_peer.write_all(b"unsolicited").await.unwrap();
        drop(upstream_peer);

        let stats = tokio::time::timeout(Duration::from_secs(5), session)
            .await
            .expect("relay stalled")
            .unwrap();
        assert_eq!(stats.upstream_to_client, 11);
    }

    #[tokio::test]
    async fn client_close_ends_session() {
        let (client, client_peer) = duplex(1024);
        let (upstream, _upstream_peer) = duplex(1024);

        let session = tokio::spawn(relay(client, upstream));
        drop(client_peer);

        let stats = session.await.unwrap();
        assert_eq!(stats.closed_by, ClosedBy::Client);
    }

    #[tokio::test]
    async fn unreachable_target_fails_before_ack() {
        let unused = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = unused.local_addr().unwrap().port();
        drop(unused);

        let relay = TunnelRelay::new(&ProxyConfig::default(), None);
        let raw = format!("CONNECT 127.0.0.1:{} HTTP/1.1\r\n\r\n", port);
        let request = Request::parse(raw.as_bytes()).unwrap();

        let (mut client, mut client_peer) = duplex(1024);
        let err = relay.serve(&mut client, &request).await.unwrap_err();
        assert!(matches!(err, ProxyError::TunnelConnect { .. }));

        drop(client);
        let mut written = Vec::new();
        client_peer.read_to_end(&mut written).await.unwrap();
        assert!(written.is_empty(), "no 200 may be sent before the upstream is ready");
    }
}
