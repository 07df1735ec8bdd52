//! Whole-call retry and deadline helpers.
//!
//! The transfer engines never retry internally. Callers that want resilience
//! wrap an entire `copy` or `pull_paths` call with [`retry_with_backoff`].

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::{OciError, Result};

/// Run `op` until it succeeds, `attempts` are exhausted, or `cancel` fires.
///
/// The wait before attempt `n + 1` is `delay * 2^(n - 1)`: with a one second
/// delay and three attempts the second attempt starts after one second and
/// the third after two more. Cancellation errors returned by `op` are not
/// retried.
pub async fn retry_with_backoff<T, F, Fut>(
    cancel: &CancellationToken,
    attempts: u32,
    delay: Duration,
    mut op: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    if attempts < 1 {
        return Err(OciError::ConfigError(
            "invalid number of attempts, must be at least 1".to_string(),
        ));
    }

    let mut attempt = 0u32;
    loop {
        if cancel.is_cancelled() {
            return Err(OciError::Canceled);
        }

        let err = match op().await {
            Ok(value) => return Ok(value),
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => e,
        };
        attempt += 1;

        tracing::warn!(
            attempt,
            attempts,
            error = %err,
            "Attempt failed"
        );

        if attempt >= attempts {
            return Err(err);
        }

        let backoff = delay.saturating_mul(2u32.saturating_pow(attempt - 1));
        tracing::debug!(backoff = ?backoff, "Retrying");

        tokio::select! {
            _ = cancel.cancelled() => return Err(OciError::Canceled),
            _ = tokio::time::sleep(backoff) => {}
        }
    }
}

/// Await `fut`, failing with `DeadlineExceeded` if it takes longer than `limit`.
pub async fn with_deadline<T, Fut>(limit: Duration, fut: Fut) -> Result<T>
where
    Fut: Future<Output = Result<T>>,
{
    match tokio::time::timeout(limit, fut).await {
        Ok(result) => result,
        Err(_) => Err(OciError::DeadlineExceeded(limit)),
    }
}
