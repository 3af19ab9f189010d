//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Socket operation (client read, origin connect/read, tunnel connect):
//!     → timeouts.rs (enforce connect/io deadline when configured)
//!     → failure reported once on the owning connection, never retried
//! ```
//!
//! # Design Decisions
//! - Deadlines are opt-in; a zero config value waits forever
//! - No retries anywhere: a failed connect or cache operation is reported once

pub mod timeouts;
