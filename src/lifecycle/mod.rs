//! Process lifecycle: bring-up, signals and orderly stop.
//!
//! ```text
//! startup.rs   cache dir → upstream TLS roots → metrics exporter → listener
//! signals.rs   Ctrl-C / SIGTERM → Shutdown::trigger
//! shutdown.rs  broadcast → accept loop exits → in-flight connections drain
//! ```
//!
//! The listener is bound last so no client is accepted before the cache and
//! TLS configuration exist. Draining is bounded by `timeouts.shutdown_grace_secs`.

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
