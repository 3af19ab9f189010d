//! Startup orchestration.
//!
//! # Responsibilities
//! - Create the cache directory and open the store
//! - Build the upstream TLS client configuration
//! - Start the metrics exporter when enabled
//! - Bind the listener last, so traffic only arrives once everything is ready
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Subsystems initialize in order, not concurrently

use std::net::SocketAddr;
use std::sync::Arc;

use thiserror::Error;

use crate::cache::{CacheError, CacheStore};
use crate::config::ProxyConfig;
use crate::http::ProxyServer;
use crate::net::listener::{Listener, ListenerError};
use crate::net::tls::UpstreamTls;
use crate::observability::metrics;

/// Fatal errors while bringing the proxy up.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("cache initialization failed: {0}")]
    Cache(#[from] CacheError),

    #[error("upstream TLS setup failed: {0}")]
    Tls(#[from] rustls::Error),

    #[error("listener setup failed: {0}")]
    Listener(#[from] ListenerError),
}

/// Initialize every subsystem and bind the listener.
pub async fn start(config: &ProxyConfig) -> Result<(ProxyServer, Listener), StartupError> {
    let cache = if config.cache.enabled {
        let store = CacheStore::open(&config.cache.directory).await?;
        tracing::info!(directory = ?store.directory(), "Response cache ready");
        Some(Arc::new(store))
    } else {
        tracing::info!("Response cache disabled");
        None
    };

    let tls = if config.tunnel.upstream_tls {
        Some(UpstreamTls::with_webpki_roots()?)
    } else {
        None
    };

    if config.observability.metrics_enabled {
        match config.observability.metrics_address.parse::<SocketAddr>() {
            Ok(addr) => metrics::init_metrics(addr),
            Err(_) => tracing::error!(
                metrics_address = %config.observability.metrics_address,
                "Failed to parse metrics address"
            ),
        }
    }

    let server = ProxyServer::new(config, cache, tls);
    let listener = Listener::bind(&config.listener).await?;

    Ok((server, listener))
}
