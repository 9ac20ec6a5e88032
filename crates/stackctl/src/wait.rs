//! Cancellable waits shared by the poll loops.
//!
//! Every suspension point in the engine goes through one of these helpers
//! so that cancellation unblocks it immediately.

use std::future::Future;
use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::aws::AwsError;
use crate::error::EngineError;

/// Sleep for `delay` unless `cancel` fires first.
pub async fn sleep_or_cancel(
    delay: Duration,
    cancel: &CancellationToken,
) -> Result<(), EngineError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        _ = tokio::time::sleep(delay) => Ok(()),
    }
}

/// Run a future to completion unless `cancel` fires first.
pub async fn cancellable<F, T>(cancel: &CancellationToken, fut: F) -> Result<T, EngineError>
where
    F: Future<Output = T>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(EngineError::Cancelled),
        out = fut => Ok(out),
    }
}

/// Backoff for one-shot remote calls that are retried on throttling.
///
/// Unbounded: throttling is retried until the call succeeds or the caller
/// cancels.
pub fn throttle_backoff() -> ExponentialBuilder {
    ExponentialBuilder::default()
        .with_min_delay(Duration::from_millis(500))
        .with_max_delay(Duration::from_secs(10))
        .without_max_times()
        .with_jitter()
}

/// Retry a remote call while it is throttled, until `cancel` fires.
///
/// Other errors are returned immediately as the inner `Err`.
pub async fn retry_throttled<F, Fut, T>(
    operation: &str,
    cancel: &CancellationToken,
    call: F,
) -> Result<Result<T, AwsError>, EngineError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AwsError>>,
{
    let retried = call
        .retry(throttle_backoff())
        .when(AwsError::is_retryable)
        .notify(|e, dur| {
            warn!(
                operation = %operation,
                delay = ?dur,
                error = %e,
                "Request throttled, retrying..."
            );
        });
    cancellable(cancel, retried).await
}
