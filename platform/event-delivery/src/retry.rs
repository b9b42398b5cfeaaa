//! Bounded retry with exponential backoff for broker writes.
//!
//! The wait between attempts observes the caller's cancellation token; an
//! attempt that is already running is never interrupted.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::{BoxError, EventError, EventResult};

/// Configuration for publish retries
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one
    pub max_attempts: u32,
    /// Wait before the second attempt; doubles after each failure
    pub initial_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(100),
        }
    }
}

/// Run `operation` until it succeeds or `policy.max_attempts` is reached.
///
/// Returns `Cancelled` if `cancel` fires during a backoff wait.
pub async fn retry_publish<F, Fut, E>(
    cancel: &CancellationToken,
    policy: &RetryPolicy,
    subject: &str,
    mut operation: F,
) -> EventResult<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<(), E>>,
    E: Into<BoxError>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut backoff = policy.initial_backoff;
    let mut attempt = 0;

    loop {
        attempt += 1;

        let err: BoxError = match operation().await {
            Ok(()) => {
                if attempt > 1 {
                    debug!(subject = %subject, attempt = attempt, "Publish succeeded after retry");
                }
                return Ok(());
            }
            Err(e) => e.into(),
        };

        if attempt >= max_attempts {
            warn!(
                subject = %subject,
                attempts = attempt,
                error = %err,
                "Publish failed after max retries"
            );
            return Err(EventError::internal_with(
                format!("publish failed after {attempt} attempts"),
                err,
            ));
        }

        warn!(
            subject = %subject,
            attempt = attempt,
            max_attempts = max_attempts,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "Publish failed, retrying with backoff"
        );

        tokio::select! {
            _ = cancel.cancelled() => {
                return Err(EventError::Cancelled(format!(
                    "publish to {subject} cancelled after {attempt} attempts: {err}"
                )));
            }
            _ = tokio::time::sleep(backoff) => {
                backoff *= 2;
            }
        }
    }
}
