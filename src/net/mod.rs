//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop, backlog, connection limits)
//!     → connection.rs (id, lifecycle tracking)
//!     → Hand off to the HTTP dispatcher
//!
//! Outgoing tunnel connection
//!     → tls.rs (client handshake toward the CONNECT target)
//! ```
//!
//! # Design Decisions
//! - Bounded accept prevents resource exhaustion
//! - Each connection tracked for graceful shutdown
//! - Upstream TLS verifies certificates against a root store

pub mod connection;
pub mod listener;
pub mod tls;
