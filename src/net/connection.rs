//! Per-connection identity and in-flight accounting.
//!
//! Every accepted socket gets a [`ConnectionGuard`] from the server's
//! [`ConnectionTracker`]. The guard carries the id shown in the `connection`
//! log span and keeps the in-flight count (and its gauge) current until the
//! connection task ends. Shutdown waits on that count.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;

use crate::observability::metrics;

/// Identifier of one client connection, unique per tracker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Hands out connection ids and counts connections still being served.
#[derive(Debug, Clone)]
pub struct ConnectionTracker {
    next_id: Arc<AtomicU64>,
    in_flight: Arc<watch::Sender<u64>>,
}

impl ConnectionTracker {
    pub fn new() -> Self {
        Self {
            next_id: Arc::new(AtomicU64::new(1)),
            in_flight: Arc::new(watch::Sender::new(0)),
        }
    }

    /// Register a freshly accepted connection.
    pub fn track(&self) -> ConnectionGuard {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.in_flight.send_modify(|n| *n += 1);
        metrics::record_active_connections(self.active_count());
        ConnectionGuard {
            id,
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    pub fn active_count(&self) -> u64 {
        *self.in_flight.borrow()
    }

    /// Wait for the in-flight count to reach zero, giving up after `grace`.
    ///
    /// Returns how many connections were still open.
    pub async fn wait_for_drain(&self, grace: Duration) -> u64 {
        let mut rx = self.in_flight.subscribe();
        let drained = tokio::time::timeout(grace, rx.wait_for(|n| *n == 0))
            .await
            .is_ok();
        if drained {
            0
        } else {
            self.active_count()
        }
    }
}

impl Default for ConnectionTracker {
    fn default() -> Self {
        Self::new()
    }
}

/// Held by a connection task for as long as it serves its client.
#[derive(Debug)]
pub struct ConnectionGuard {
    id: ConnectionId,
    in_flight: Arc<watch::Sender<u64>>,
}

impl ConnectionGuard {
    pub fn id(&self) -> ConnectionId {
        self.id
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
        metrics::record_active_connections(*self.in_flight.borrow());
        tracing::trace!(connection = %self.id, "Connection finished");
    }
}
