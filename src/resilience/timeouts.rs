//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap socket operations with an optional deadline
//! - Enforce connect timeout and per-operation I/O timeout
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities
//! - Elapsed deadlines surface as `io::ErrorKind::TimedOut`, so they travel
//!   through the same error paths as any other socket failure
//! - `None` means wait forever

use std::future::Future;
use std::io;
use std::time::Duration;

/// Run `operation`, failing with `TimedOut` if it does not finish within `limit`.
pub async fn with_timeout<T, F>(limit: Option<Duration>, operation: F) -> io::Result<T>
where
    F: Future<Output = io::Result<T>>,
{
    match limit {
        Some(limit) => tokio::time::timeout(limit, operation).await.map_err(|_| {
            io::Error::new(
                io::ErrorKind::TimedOut,
                format!("operation timed out after {:?}", limit),
            )
        })?,
        None => operation.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn passes_through_without_limit() {
        let value = with_timeout(None, async { Ok::<_, io::Error>(7) }).await.unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn elapsed_maps_to_timed_out() {
        let err = with_timeout(Some(Duration::from_millis(50)), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, io::Error>(())
        })
        .await
        .unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }
}
