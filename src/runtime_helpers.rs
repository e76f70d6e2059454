//! Runtime helper functions for async retry patterns
//!
//! Retry with exponential backoff for transient orchestration errors.
//! Commit retries go through `retry_task`.

use std::future::Future;

use crate::errors::{OrchestrationResult, RetryConfig};

/// Retry an operation with configurable retry logic
///
/// Non-transient errors are returned immediately. Transient errors are retried
/// up to `config.max_attempts` times with exponential backoff between
/// attempts (see `RetryConfig::delay_for_attempt`).
pub async fn retry_task<F, Fut, T>(config: RetryConfig, mut operation: F) -> OrchestrationResult<T>
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = OrchestrationResult<T>> + Send,
    T: Send + 'static,
{
    let mut attempt = 0u32;

    loop {
        match operation().await {
            Ok(value) => {
                if attempt > 0 {
                    tracing::info!(attempt = attempt + 1, "Operation succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) => {
                let Some(delay) = e.retry_delay(&config, attempt) else {
                    return Err(e);
                };

                if attempt >= config.max_attempts {
                    tracing::error!(
                        attempts = attempt + 1,
                        error = %e,
                        "Max retry attempts exceeded"
                    );
                    return Err(e);
                }

                attempt += 1;

                tracing::warn!(
                    attempt = attempt,
                    max_attempts = config.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Transient error, retrying after delay"
                );

                tokio::time::sleep(delay).await;
            }
        }
    }
}
