//! Commit/flush coordination for one index
//!
//! Tracks whether applied writes still need a commit and runs commits one at
//! a time. Depending on the `CommitMode`, commits follow every work set with
//! a success, run on a timer, or only run on explicit flush and close.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::backend::BackendExecutor;
use crate::config::{CommitConfig, CommitMode};
use crate::error_handler::ErrorReporter;
use crate::errors::{OrchestrationError, OrchestrationResult, RetryConfig};
use crate::orchestrator::OrchestratorStats;
use crate::runtime_helpers::retry_task;

/// Commit state of an index
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommitState {
    /// Every applied write is committed
    Idle,
    /// Applied writes wait for a commit
    PendingCommit,
    /// A commit is running
    Committing,
}

#[derive(Debug)]
struct CommitStatus {
    state: CommitState,
    dirty_during_commit: bool,
    consecutive_failures: u32,
    next_retry_at: Option<Instant>,
    /// Last failure was a connectivity failure; recovery of the channel ends its backoff
    waiting_for_channel: bool,
}

pub(crate) struct CommitCoordinator {
    index_name: String,
    mode: CommitMode,
    retry: RetryConfig,
    executor: Arc<BackendExecutor>,
    reporter: ErrorReporter,
    stats: Arc<OrchestratorStats>,
    status: Mutex<CommitStatus>,
    flight: tokio::sync::Mutex<()>,
    retry_scheduled: AtomicBool,
    shut_down: AtomicBool,
}

impl CommitCoordinator {
    pub(crate) fn new(
        index_name: impl Into<String>,
        config: &CommitConfig,
        executor: Arc<BackendExecutor>,
        reporter: ErrorReporter,
        stats: Arc<OrchestratorStats>,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            mode: config.mode(),
            retry: config.retry().clone(),
            executor,
            reporter,
            stats,
            status: Mutex::new(CommitStatus {
                state: CommitState::Idle,
                dirty_during_commit: false,
                consecutive_failures: 0,
                next_retry_at: None,
                waiting_for_channel: false,
            }),
            flight: tokio::sync::Mutex::new(()),
            retry_scheduled: AtomicBool::new(false),
            shut_down: AtomicBool::new(false),
        }
    }

    pub(crate) fn state(&self) -> CommitState {
        self.status.lock().state
    }

    /// Record writes applied by the backend
    pub(crate) fn mark_dirty(&self) {
        let mut status = self.status.lock();
        match status.state {
            CommitState::Idle => status.state = CommitState::PendingCommit,
            CommitState::Committing => status.dirty_during_commit = true,
            CommitState::PendingCommit => {}
        }
    }

    /// Called by dispatch tasks once a work set completed
    ///
    /// In immediate mode a work set with at least one success is committed
    /// before its futures resolve; a failed commit is retried in background.
    pub(crate) async fn after_work_set(self: &Arc<Self>, succeeded: usize) {
        if succeeded == 0 {
            return;
        }
        self.mark_dirty();
        if self.mode == CommitMode::Immediate && self.commit_now().await.is_err() {
            self.schedule_retry();
        }
    }

    /// Commit now if writes are pending
    ///
    /// Returns `Ok(false)` when nothing was pending, which also covers a
    /// caller that waited for a concurrent commit covering its writes.
    pub(crate) async fn commit_now(&self) -> OrchestrationResult<bool> {
        let _flight = self.flight.lock().await;
        {
            let mut status = self.status.lock();
            if status.state == CommitState::Idle {
                return Ok(false);
            }
            status.state = CommitState::Committing;
            status.dirty_during_commit = false;
        }

        let start = Instant::now();
        let result = self.executor.commit().await;

        match result {
            Ok(()) => {
                {
                    let mut status = self.status.lock();
                    status.state = if status.dirty_during_commit {
                        CommitState::PendingCommit
                    } else {
                        CommitState::Idle
                    };
                    status.dirty_during_commit = false;
                    status.consecutive_failures = 0;
                    status.next_retry_at = None;
                    status.waiting_for_channel = false;
                }
                self.stats.record_commit().await;
                tracing::debug!(
                    index = %self.index_name,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Index committed"
                );
                Ok(true)
            }
            Err(e) => {
                let backoff = {
                    let mut status = self.status.lock();
                    status.state = CommitState::PendingCommit;
                    status.dirty_during_commit = false;
                    let backoff = self.retry.delay_for_attempt(status.consecutive_failures);
                    status.consecutive_failures = status.consecutive_failures.saturating_add(1);
                    status.next_retry_at = Some(Instant::now() + backoff);
                    status.waiting_for_channel = e.is_transient();
                    backoff
                };
                let error = OrchestrationError::CommitFailed {
                    index: self.index_name.clone(),
                    message: e.to_string(),
                };
                tracing::warn!(
                    index = %self.index_name,
                    backoff_ms = backoff.as_millis() as u64,
                    error = %e,
                    "Index commit failed"
                );
                self.reporter.report_exception("Index commit failed", &error);
                Err(error)
            }
        }
    }

    /// Retry a failed commit in background with exponential backoff
    fn schedule_retry(self: &Arc<Self>) {
        if self.shut_down.load(Ordering::Acquire) || self.retry_scheduled.swap(true, Ordering::AcqRel) {
            return;
        }
        let this = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(this.retry.initial_delay).await;
            let outcome = retry_task(this.retry.clone(), || {
                let this = Arc::clone(&this);
                async move {
                    if this.shut_down.load(Ordering::Acquire) {
                        return Ok(false);
                    }
                    this.commit_now().await
                }
            })
            .await;
            this.retry_scheduled.store(false, Ordering::Release);
            if let Err(e) = outcome {
                tracing::error!(
                    index = %this.index_name,
                    error = %e,
                    "Commit retries exhausted, writes stay pending"
                );
            }
        });
    }

    /// Start the timer of periodic mode; `None` for other modes
    pub(crate) fn spawn_periodic(
        self: &Arc<Self>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<()>> {
        let interval = self.mode.interval()?;
        let this = Arc::clone(self);
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => this.periodic_tick().await,
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(index = %this.index_name, "Periodic commit timer stopped");
        }))
    }

    /// Commit pending writes unless a failed commit is still backing off
    ///
    /// The backoff of a connectivity failure ends early once the write
    /// channel is healthy again.
    async fn periodic_tick(&self) {
        let (backing_off, waiting_for_channel) = {
            let status = self.status.lock();
            if status.state == CommitState::Idle {
                return;
            }
            let backing_off = status
                .next_retry_at
                .is_some_and(|at| at > Instant::now());
            (backing_off, status.waiting_for_channel)
        };
        if backing_off && !(waiting_for_channel && self.executor.health().is_healthy()) {
            tracing::debug!(index = %self.index_name, "Skipping periodic commit during backoff");
            return;
        }
        // Failures are reported by commit_now and retried on a later tick
        let _ = self.commit_now().await;
    }

    /// Stop background retries; the final commit is run by the caller
    pub(crate) fn shut_down(&self) {
        self.shut_down.store(true, Ordering::Release);
    }

    #[cfg(test)]
    fn next_retry_in(&self) -> Option<std::time::Duration> {
        self.status
            .lock()
            .next_retry_at
            .map(|at| at.saturating_duration_since(Instant::now()))
    }
}
