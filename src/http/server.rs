//! Proxy server accept loop.
//!
//! # Responsibilities
//! - Accept connections from the bounded listener
//! - Spawn one task per connection running the dispatcher
//! - Stop accepting on shutdown and drain in-flight connections

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::Instrument;

use crate::cache::CacheStore;
use crate::config::ProxyConfig;
use crate::http::dispatcher::Dispatcher;
use crate::net::connection::ConnectionTracker;
use crate::net::listener::Listener;
use crate::net::tls::UpstreamTls;

/// The forward proxy.
pub struct ProxyServer {
    dispatcher: Arc<Dispatcher>,
    tracker: ConnectionTracker,
    shutdown_grace: Duration,
}

impl ProxyServer {
    /// Build a server from already initialized collaborators.
    pub fn new(config: &ProxyConfig, cache: Option<Arc<CacheStore>>, tls: Option<UpstreamTls>) -> Self {
        Self {
            dispatcher: Arc::new(Dispatcher::new(config, cache, tls)),
            tracker: ConnectionTracker::new(),
            shutdown_grace: config.timeouts.shutdown_grace(),
        }
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    /// Accept connections until `shutdown` fires, then drain.
    pub async fn run(self, listener: Listener, mut shutdown: broadcast::Receiver<()>) {
        if let Ok(addr) = listener.local_addr() {
            tracing::info!(address = %addr, "Proxy server accepting connections");
        }

        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    let (stream, peer, permit) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::error!(error = %e, "Accept failed");
                            continue;
                        }
                    };

                    let guard = self.tracker.track();
                    let span = tracing::info_span!("connection", id = %guard.id(), peer = %peer);
                    let dispatcher = Arc::clone(&self.dispatcher);

                    tokio::spawn(
                        async move {
                            tracing::info!("Connection received");
                            let _ = dispatcher.dispatch(stream).await;
                            drop(guard);
                            drop(permit);
                        }
                        .instrument(span),
                    );
                }
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, no longer accepting");
                    break;
                }
            }
        }

        drop(listener);
        let remaining = self.tracker.wait_for_drain(self.shutdown_grace).await;
        if remaining > 0 {
            tracing::warn!(remaining, "Shutdown grace elapsed with connections still open");
        }

        tracing::info!("Proxy server stopped");
    }
}
