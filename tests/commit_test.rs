//! Commit modes driven through the orchestrator

mod common;

use common::{RecordingBackend, init_tracing, wait_until};
use std::sync::Arc;
use std::time::Duration;

use search_orchestration::{
    CollectingErrorHandler, CommitMode, CommitState, IndexOrchestrator, OrchestrationError,
    OrchestratorConfig, RetryConfig, WorkItem,
};

fn start(
    backend: &Arc<RecordingBackend>,
    mode: CommitMode,
) -> (IndexOrchestrator, Arc<CollectingErrorHandler>) {
    init_tracing();
    let config = OrchestratorConfig::builder()
        .max_wait(Duration::from_millis(1))
        .commit_mode(mode)
        .commit_retry(RetryConfig {
            max_attempts: 2,
            initial_delay: Duration::from_millis(10),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_millis(50),
        })
        .build()
        .expect("valid configuration");
    let handler = Arc::new(CollectingErrorHandler::new());
    let orchestrator = IndexOrchestrator::start("books", backend.clone(), config, handler.clone())
        .expect("orchestrator starts");
    (orchestrator, handler)
}

#[tokio::test]
async fn test_immediate_mode_commits_before_resolving_futures() {
    let backend = RecordingBackend::new();
    let (orchestrator, _handler) = start(&backend, CommitMode::Immediate);

    let outcome = orchestrator
        .submit(WorkItem::add("books", "1", "A"))
        .unwrap()
        .await;
    assert!(outcome.is_success());
    assert_eq!(backend.commits(), 1);
    assert_eq!(orchestrator.commit_state(), CommitState::Idle);

    let stats = orchestrator.stats().await;
    assert_eq!(stats.commit_count, 1);
    assert!(stats.last_commit.is_some());
    orchestrator.close().await.unwrap();
    assert_eq!(backend.commits(), 1, "nothing left to commit on close");
}

#[tokio::test]
async fn test_explicit_mode_commits_only_on_flush() {
    let backend = RecordingBackend::new();
    let (orchestrator, _handler) = start(&backend, CommitMode::Explicit);

    for id in ["1", "2"] {
        let outcome = orchestrator
            .submit(WorkItem::add("books", id, "A"))
            .unwrap()
            .await;
        assert!(outcome.is_success());
    }
    assert_eq!(backend.commits(), 0);
    assert_eq!(orchestrator.commit_state(), CommitState::PendingCommit);

    orchestrator.flush().await.unwrap();
    assert_eq!(backend.commits(), 1);
    assert_eq!(orchestrator.commit_state(), CommitState::Idle);

    orchestrator.flush().await.unwrap();
    assert_eq!(backend.commits(), 1, "a flush without new writes does not commit");
    orchestrator.close().await.unwrap();
}

#[tokio::test]
async fn test_flush_dispatches_works_waiting_in_the_debounce_window() {
    init_tracing();
    let backend = RecordingBackend::new();
    let config = OrchestratorConfig::builder()
        .max_wait(Duration::from_secs(60))
        .commit_mode(CommitMode::Explicit)
        .build()
        .unwrap();
    let orchestrator = IndexOrchestrator::start(
        "books",
        backend.clone(),
        config,
        Arc::new(CollectingErrorHandler::new()),
    )
    .unwrap();

    let pending = orchestrator.submit(WorkItem::add("books", "1", "A")).unwrap();
    tokio::time::timeout(Duration::from_secs(2), orchestrator.flush())
        .await
        .expect("flush does not wait for the debounce window")
        .unwrap();
    assert!(pending.await.is_success());
    assert_eq!(backend.document("1").as_deref(), Some("A"));
    assert_eq!(backend.commits(), 1);
    orchestrator.close().await.unwrap();
}

#[tokio::test]
async fn test_close_commits_pending_writes() {
    let backend = RecordingBackend::new();
    let (orchestrator, _handler) = start(&backend, CommitMode::Explicit);

    let outcome = orchestrator
        .submit(WorkItem::add("books", "1", "A"))
        .unwrap()
        .await;
    assert!(outcome.is_success());
    assert_eq!(backend.commits(), 0);

    orchestrator.close().await.unwrap();
    assert_eq!(backend.commits(), 1);
}

#[tokio::test]
async fn test_periodic_mode_commits_on_the_timer() {
    let backend = RecordingBackend::new();
    let (orchestrator, _handler) = start(&backend, CommitMode::Periodic { interval_ms: 20 });

    let outcome = orchestrator
        .submit(WorkItem::add("books", "1", "A"))
        .unwrap()
        .await;
    assert!(outcome.is_success());

    wait_until("periodic commit", || backend.commits() >= 1).await;
    wait_until("idle after commit", || {
        orchestrator.commit_state() == CommitState::Idle
    })
    .await;

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(backend.commits(), 1, "idle ticks do not commit");
    orchestrator.close().await.unwrap();
}

#[tokio::test]
async fn test_failed_commit_keeps_writes_pending_and_is_reported() {
    let backend = RecordingBackend::new();
    let (orchestrator, handler) = start(&backend, CommitMode::Explicit);

    let outcome = orchestrator
        .submit(WorkItem::add("books", "1", "A"))
        .unwrap()
        .await;
    assert!(outcome.is_success());

    backend.fail_next_commits(1);
    assert!(matches!(
        orchestrator.flush().await,
        Err(OrchestrationError::CommitFailed { .. })
    ));
    assert_eq!(orchestrator.commit_state(), CommitState::PendingCommit);
    assert_eq!(handler.exceptions().len(), 1);

    orchestrator.flush().await.unwrap();
    assert_eq!(backend.commits(), 1);
    assert_eq!(orchestrator.commit_state(), CommitState::Idle);
    orchestrator.close().await.unwrap();
}

#[tokio::test]
async fn test_immediate_mode_retries_failed_commits_in_background() {
    let backend = RecordingBackend::new();
    backend.fail_next_commits(1);
    let (orchestrator, handler) = start(&backend, CommitMode::Immediate);

    let outcome = orchestrator
        .submit(WorkItem::add("books", "1", "A"))
        .unwrap()
        .await;
    assert!(outcome.is_success(), "commit failures do not fail the work");
    assert_eq!(handler.exceptions().len(), 1);

    wait_until("background commit retry", || backend.commits() == 1).await;
    wait_until("idle after retry", || {
        orchestrator.commit_state() == CommitState::Idle
    })
    .await;
    orchestrator.close().await.unwrap();
}
