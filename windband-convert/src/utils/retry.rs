//! Retry for transient storage failures
//!
//! Only `JobError::StorageFailure` is retried; every other error is returned
//! on the first attempt.

use std::future::Future;
use std::time::Duration;

use crate::error::{JobError, JobResult};

/// Delay before the first retry; doubles per further attempt
const INITIAL_BACKOFF: Duration = Duration::from_millis(50);

/// Run `operation` up to `max_attempts` times while it fails with `StorageFailure`
pub async fn retry_on_storage_failure<F, Fut, T>(
    operation_name: &str,
    max_attempts: u32,
    mut operation: F,
) -> JobResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = JobResult<T>>,
{
    let max_attempts = max_attempts.max(1);
    let mut backoff = INITIAL_BACKOFF;
    let mut attempt = 0;

    loop {
        attempt += 1;

        match operation().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(
                        operation = operation_name,
                        attempt,
                        "Storage operation succeeded after retry"
                    );
                }
                return Ok(value);
            }
            Err(JobError::StorageFailure(message)) if attempt < max_attempts => {
                tracing::warn!(
                    operation = operation_name,
                    attempt,
                    error = %message,
                    backoff_ms = backoff.as_millis() as u64,
                    "Storage operation failed, retrying"
                );
                tokio::time::sleep(backoff).await;
                backoff *= 2;
            }
            Err(err) => {
                if attempt > 1 {
                    tracing::error!(
                        operation = operation_name,
                        attempt,
                        error = %err,
                        "Storage operation failed after retries"
                    );
                }
                return Err(err);
            }
        }
    }
}
