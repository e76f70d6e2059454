use search_orchestration::{OrchestrationError, RetryConfig, retry_task};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn config(max_attempts: u32) -> RetryConfig {
    RetryConfig {
        max_attempts,
        initial_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        max_delay: Duration::from_millis(20),
    }
}

fn commit_failed() -> OrchestrationError {
    OrchestrationError::CommitFailed {
        index: "books".to_string(),
        message: "transient".to_string(),
    }
}

#[tokio::test]
async fn test_retry_task_success() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let result = retry_task(config(3), move || {
        let count = counter_clone.fetch_add(1, Ordering::SeqCst);
        async move {
            if count < 2 {
                Err(commit_failed())
            } else {
                Ok(42)
            }
        }
    })
    .await;

    assert_eq!(result.unwrap(), 42);
    assert_eq!(counter.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_retry_task_stops_on_permanent_error() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let result: Result<(), _> = retry_task(config(3), move || {
        counter_clone.fetch_add(1, Ordering::SeqCst);
        async { Err(OrchestrationError::InvalidConfig("bad".to_string())) }
    })
    .await;

    assert!(matches!(result, Err(OrchestrationError::InvalidConfig(_))));
    assert_eq!(counter.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_retry_task_gives_up_after_max_attempts() {
    let counter = Arc::new(AtomicU32::new(0));
    let counter_clone = counter.clone();

    let result: Result<(), _> = retry_task(config(2), move || {
        counter_clone.fetch_add(1, Ordering::SeqCst);
        async { Err(commit_failed()) }
    })
    .await;

    assert!(matches!(result, Err(OrchestrationError::CommitFailed { .. })));
    assert_eq!(counter.load(Ordering::SeqCst), 3, "first try plus two retries");
}

#[test]
fn test_backoff_is_capped() {
    let retry = config(10);
    assert_eq!(retry.delay_for_attempt(0), Duration::from_millis(5));
    assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(10));
    assert_eq!(retry.delay_for_attempt(5), Duration::from_millis(20));
}
