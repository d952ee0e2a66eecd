//! Timeout constants and async wrappers used by the poll loop and the client.

use crate::error::{ProtocolError, Result};
use std::future::Future;
use std::time::Duration;

/// Default timeout for control-channel I/O and negotiation
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Longest a poll pass waits for a pending connection
pub const ACCEPT_WAIT: Duration = Duration::from_millis(20);

/// Run `fut` to completion or fail with `ProtocolError::Timeout`.
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}

/// Poll `fut` once; `None` when it is not immediately ready.
///
/// Tokio polls the inner future before looking at the deadline, so a zero
/// duration gives a non-blocking readiness check.
pub async fn poll_ready<F: Future>(fut: F) -> Option<F::Output> {
    tokio::time::timeout(Duration::ZERO, fut).await.ok()
}
