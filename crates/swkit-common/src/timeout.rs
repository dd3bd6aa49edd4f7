//! Bounding utilities for network operations.

use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Run an operation with a timeout.
///
/// With `None` the operation is awaited without a bound.
pub async fn with_timeout<T, F, Fut>(
    timeout: Option<Duration>,
    operation: F,
) -> Result<T, crate::SwKitError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let Some(limit) = timeout else {
        return Ok(operation().await);
    };

    tokio::time::timeout(limit, operation()).await.map_err(|_| {
        warn!(?limit, "Operation timed out");
        crate::SwKitError::Timeout(limit)
    })
}
