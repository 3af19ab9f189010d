//! Upstream connections.
//!
//! # Data Flow
//! ```text
//! GET/POST (cache miss)
//!     → forwarder.rs (fresh TCP connection, rebuilt request, read to EOF)
//!
//! CONNECT
//!     → tunnel.rs (TCP + TLS to target, 200 to client, bidirectional relay)
//! ```
//!
//! # Design Decisions
//! - No pooling: every request opens and closes its own origin connection
//! - No retries: a failed connect is reported once

pub mod forwarder;
pub mod tunnel;

pub use forwarder::OriginForwarder;
pub use tunnel::TunnelRelay;
