//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! Accepted TCP connection
//!     → server.rs (task per connection)
//!     → dispatcher.rs (one request, classify, route)
//!     → request.rs (bounded head read, parse, target resolution)
//!     → cache / upstream forwarder / tunnel relay
//!     → response.rs (canned replies, origin diagnostics)
//!     → Send to client, close
//! ```

pub mod dispatcher;
pub mod request;
pub mod response;
pub mod server;

pub use dispatcher::{Dispatcher, Outcome};
pub use request::{Method, Request};
pub use server::ProxyServer;
