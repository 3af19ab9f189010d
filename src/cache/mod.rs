//! Response cache subsystem.
//!
//! # Data Flow
//! ```text
//! GET request
//!     → key.rs (MD5 of literal target)
//!     → store.rs lookup → hit: bytes straight to the client
//!                       → miss: forward to origin
//! GET/POST origin response (non-empty)
//!     → store.rs store (per-key lock, temp file + rename)
//! ```
//!
//! # Design Decisions
//! - No expiry, eviction, or size cap
//! - Entries are raw responses, header block and body exactly as received
//! - Cache failures are logged and never change what the client receives

pub mod key;
pub mod store;

pub use key::CacheKey;
pub use store::{CacheError, CacheStore};
