//! Caching HTTP forward proxy (v1)
//!
//! # Architecture Overview
//!
//! ```text
//!                          ┌──────────────────────────────────────────────────┐
//!                          │                  FORWARD PROXY                    │
//!   Client                 │  ┌──────────┐    ┌────────────┐                   │
//!   ───────────────────────┼─▶│   net    │───▶│ dispatcher │──┐                │
//!                          │  │ listener │    │ (per task) │  │                │
//!                          │  └──────────┘    └────────────┘  │                │
//!                          │         ┌────────────────────────┼──────────┐     │
//!                          │         ▼                        ▼          ▼     │
//!                          │  ┌────────────┐  ┌──────────────────┐ ┌─────────┐ │
//!                          │  │   cache    │  │ origin forwarder │ │ tunnel  │─┼──▶ TLS origin
//!                          │  │ (md5 files)│  │  (TCP, to EOF)   │ │ relay   │ │
//!                          │  └────────────┘  └────────┬─────────┘ └─────────┘ │
//!                          │                           │                       │
//!                          └───────────────────────────┼───────────────────────┘
//!                                                      ▼
//!                                               Plain HTTP origin
//! ```

use std::path::PathBuf;

use clap::Parser;

use forward_proxy::config::loader::{load_or_default, ConfigError};
use forward_proxy::config::validation::validate_config;
use forward_proxy::lifecycle::{signals, startup, Shutdown};
use forward_proxy::observability::logging;

#[derive(Parser)]
#[command(name = "forward-proxy")]
#[command(about = "Caching HTTP forward proxy with CONNECT tunneling", long_about = None)]
struct Cli {
    /// IP address to listen on.
    ip: String,

    /// Port to listen on.
    port: u16,

    /// Optional TOML configuration file.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory for cached responses (overrides the config file).
    #[arg(long)]
    cache_dir: Option<PathBuf>,

    /// Log level (overrides the config file; RUST_LOG still wins).
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = load_or_default(cli.config.as_deref())?;
    config.listener.set_address(&cli.ip, cli.port);
    if let Some(dir) = cli.cache_dir {
        config.cache.directory = dir;
    }
    if let Some(level) = cli.log_level {
        config.observability.log_level = level;
    }
    validate_config(&config).map_err(ConfigError::Validation)?;

    logging::init_logging(&config.observability);
    tracing::info!("forward-proxy v{} starting", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        bind_address = %config.listener.bind_address,
        backlog = config.listener.backlog,
        cache_directory = ?config.cache.directory,
        upstream_tls = config.tunnel.upstream_tls,
        "Configuration loaded"
    );

    let (server, listener) = startup::start(&config).await?;

    let shutdown = Shutdown::new();
    let server_shutdown = shutdown.subscribe();
    let server_task = tokio::spawn(server.run(listener, server_shutdown));

    signals::wait_for_signal().await;
    shutdown.trigger();
    server_task.await?;

    tracing::info!("Shutdown complete");
    Ok(())
}
