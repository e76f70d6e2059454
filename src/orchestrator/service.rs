//! Per-index orchestrator: scheduling worker, dispatch tasks and lifecycle
//!
//! Submissions only touch the queue mutex. One worker task per index pulls
//! ready works, groups them with the batcher and spawns one dispatch task per
//! work set. Dispatch tasks run the backend call, report failures, commit in
//! immediate mode, release the routing keys and resolve the futures.

use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Instant;
use tokio::sync::{Notify, Semaphore, watch};
use tokio::task::JoinHandle;

use super::queue::{OrchestrationQueue, QueueState};
use super::sender::WorkSender;
use super::stats::{OrchestratorStats, OrchestratorStatsSnapshot};
use crate::backend::{BackendExecutor, IndexEngineBackend, WriteChannelHealth};
use crate::batcher::Batcher;
use crate::commit::{CommitCoordinator, CommitState};
use crate::config::OrchestratorConfig;
use crate::error_handler::{ErrorContext, ErrorHandler, ErrorReporter, FailureAction};
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::work::{
    FailureKind, FailureReason, ItemOutcome, QueuedWork, RoutingKey, WorkFuture, WorkItem,
    WorkSet, resolve_tickets,
};

/// State shared by the orchestrator, its senders, worker and dispatch tasks
pub(crate) struct Shared {
    pub(crate) index_name: String,
    pub(crate) queue: Mutex<OrchestrationQueue>,
    /// Wakes the worker: new work, completed work set, flush or close
    pub(crate) wake: Notify,
    /// Wakes flush and close waiters after every completed work set
    progress: Notify,
    /// Submissions up to this sequence number skip the debounce window
    flush_through: AtomicU64,
    in_flight_sets: AtomicUsize,
    executor: Arc<BackendExecutor>,
    commit: Arc<CommitCoordinator>,
    reporter: ErrorReporter,
    pub(crate) stats: Arc<OrchestratorStats>,
    permits: Arc<Semaphore>,
}

impl Shared {
    pub(crate) fn submit(&self, item: WorkItem) -> OrchestrationResult<WorkFuture> {
        let future = {
            let mut queue = self.queue.lock();
            let future = queue.submit(item)?;
            self.stats
                .pending_count
                .store(queue.outstanding(), Ordering::Relaxed);
            future
        };
        self.wake.notify_one();
        Ok(future)
    }

    async fn wait_for(&self, condition: impl Fn(&OrchestrationQueue) -> bool) {
        loop {
            let notified = self.progress.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            let done = condition(&*self.queue.lock());
            if done {
                return;
            }
            notified.await;
        }
    }

    /// Resolve works that will never be dispatched
    fn resolve_unsent(&self, works: Vec<QueuedWork>, outcome: &ItemOutcome) -> usize {
        let mut resolved = 0;
        for work in works {
            resolved += work.tickets.len();
            work.resolve(outcome.clone());
        }
        self.stats.record_outcomes(0, resolved);
        resolved
    }

    /// Fail a batched work set because the index is closing
    fn cancel(&self, set: WorkSet) {
        let (items, tickets) = set.into_parts();
        {
            let mut queue = self.queue.lock();
            for (item, tickets) in items.iter().zip(&tickets) {
                queue.complete(item, tickets.iter().map(|t| t.seq), None);
            }
            self.stats
                .pending_count
                .store(queue.outstanding(), Ordering::Relaxed);
        }
        let outcome = ItemOutcome::Failed(FailureReason::closed(&self.index_name));
        let mut cancelled = 0;
        for tickets in tickets {
            cancelled += tickets.len();
            resolve_tickets(tickets, &outcome);
        }
        self.stats.record_outcomes(0, cancelled);
        tracing::debug!(index = %self.index_name, cancelled, "Batched works cancelled by close");
        self.progress.notify_waiters();
    }

    /// Execute one work set and settle its outcomes
    async fn run_work_set(self: &Arc<Self>, set: WorkSet) {
        let start = Instant::now();
        let result = self.executor.execute(&set).await;
        let work_set_id = set.id();
        let (items, tickets) = set.into_parts();
        let failures = result.failed_count();
        if let Some(reason) = &result.total_failure {
            tracing::warn!(index = %self.index_name, work_set_id, works = items.len(), %reason, "Work set failed as a whole");
        }

        let mut halts = Vec::with_capacity(items.len());
        let mut succeeded = 0;
        let mut failed = 0;
        for ((item, outcome), tickets) in items.iter().zip(&result.outcomes).zip(&tickets) {
            match outcome {
                ItemOutcome::Succeeded => {
                    succeeded += tickets.len();
                    halts.push(None);
                }
                ItemOutcome::Failed(reason) => {
                    failed += tickets.len();
                    let action = self.reporter.report(&ErrorContext {
                        index_name: self.index_name.clone(),
                        routing_key: Some(item.routing_key().clone()),
                        work_kind: Some(item.kind()),
                        work_set_id: Some(work_set_id),
                        cause: reason.clone(),
                        failures_in_work_set: failures,
                    });
                    halts.push((action == FailureAction::HaltRoutingKey).then(|| reason.clone()));
                }
            }
        }
        self.stats.record_outcomes(succeeded, failed);

        self.commit.after_work_set(succeeded).await;

        let halted = {
            let mut queue = self.queue.lock();
            let mut halted = Vec::new();
            for ((item, tickets), halt) in items.iter().zip(&tickets).zip(halts) {
                let seqs = tickets.iter().map(|t| t.seq);
                match halt {
                    Some(reason) => {
                        let drained = queue.complete(item, seqs, Some(reason.clone()));
                        if !drained.is_empty() {
                            halted.push((item.routing_key().clone(), reason, drained));
                        }
                    }
                    None => {
                        queue.complete(item, seqs, None);
                    }
                }
            }
            self.stats
                .pending_count
                .store(queue.outstanding(), Ordering::Relaxed);
            halted
        };

        for (tickets, outcome) in tickets.into_iter().zip(result.outcomes) {
            resolve_tickets(tickets, &outcome);
        }
        for (key, reason, works) in halted {
            let outcome = ItemOutcome::Failed(FailureReason::new(
                FailureKind::Halted,
                format!("routing key {key} halted after failure: {reason}"),
            ));
            let count = self.resolve_unsent(works, &outcome);
            tracing::warn!(index = %self.index_name, routing_key = %key, count, "Pending works failed by halted routing key");
        }

        tracing::debug!(
            index = %self.index_name,
            work_set_id,
            works = items.len(),
            succeeded,
            failed,
            duration_ms = start.elapsed().as_millis() as u64,
            "Work set completed"
        );
    }

    /// Spawn the dispatch of a work set, waiting for a dispatch slot
    async fn dispatch(self: &Arc<Self>, set: WorkSet) {
        let permit = Arc::clone(&self.permits).acquire_owned().await.ok();
        self.in_flight_sets.fetch_add(1, Ordering::AcqRel);
        self.stats.work_set_count.fetch_add(1, Ordering::Relaxed);
        let guard = InFlightGuard {
            shared: Arc::clone(self),
        };
        tokio::spawn(async move {
            let _permit = permit;
            guard.shared.run_work_set(set).await;
            drop(guard);
        });
    }
}

/// Releases a dispatch slot even when the dispatch task panics
struct InFlightGuard {
    shared: Arc<Shared>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared.in_flight_sets.fetch_sub(1, Ordering::AcqRel);
        self.shared.wake.notify_one();
        self.shared.progress.notify_waiters();
    }
}

/// Scheduling loop of one index
async fn worker_loop(shared: Arc<Shared>, mut batcher: Batcher) {
    loop {
        let notified = shared.wake.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let (ready, barrier_waiting, flush_due, state) = {
            let mut queue = shared.queue.lock();
            let state = queue.state();
            let ready = if state == QueueState::Open {
                queue.take_ready()
            } else {
                Default::default()
            };
            let flush_through = shared.flush_through.load(Ordering::Acquire);
            let flush_due = queue
                .oldest_outstanding()
                .is_some_and(|seq| seq <= flush_through);
            (ready, queue.barrier_waiting(), flush_due, state)
        };

        if state != QueueState::Open {
            if let Some(set) = batcher.flush() {
                shared.cancel(set);
            }
            if shared.in_flight_sets.load(Ordering::Acquire) == 0 {
                break;
            }
            notified.await;
            continue;
        }

        for work in ready.works {
            if let Some(set) = batcher.offer(work) {
                shared.dispatch(set).await;
            }
        }
        let flush_now = batcher.is_full()
            || barrier_waiting
            || ready.barrier.is_some()
            || flush_due
            || batcher.is_due(Instant::now());
        if flush_now {
            if let Some(set) = batcher.flush() {
                shared.dispatch(set).await;
            }
        }
        if let Some(barrier) = ready.barrier {
            let set = batcher.solo(barrier);
            shared.dispatch(set).await;
        }

        match batcher.deadline() {
            Some(deadline) => {
                tokio::select! {
                    _ = &mut notified => {}
                    _ = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)) => {}
                }
            }
            None => notified.await,
        }
    }
    tracing::debug!(index = %shared.index_name, "Orchestrator worker stopped");
}

/// Orchestrates index work for one index
///
/// Must be started from within a tokio runtime.
pub struct IndexOrchestrator {
    shared: Arc<Shared>,
    worker: Mutex<Option<JoinHandle<()>>>,
    timer: Mutex<Option<JoinHandle<()>>>,
    shutdown: watch::Sender<bool>,
    closed: tokio::sync::Mutex<bool>,
}

impl IndexOrchestrator {
    /// Validate the configuration and start the worker of `index_name`
    pub fn start(
        index_name: impl Into<String>,
        backend: Arc<dyn IndexEngineBackend>,
        config: OrchestratorConfig,
        error_handler: Arc<dyn ErrorHandler>,
    ) -> OrchestrationResult<Self> {
        config.validate()?;
        let index_name = index_name.into();
        let backend_name = backend.name().to_string();

        let stats = Arc::new(OrchestratorStats::new());
        let reporter = ErrorReporter::new(config.failure_policy(), error_handler);
        let executor = Arc::new(BackendExecutor::new(
            index_name.clone(),
            backend,
            config.backend_timeout(),
            Arc::new(WriteChannelHealth::default()),
        ));
        let commit = Arc::new(CommitCoordinator::new(
            index_name.clone(),
            config.commit(),
            Arc::clone(&executor),
            reporter.clone(),
            Arc::clone(&stats),
        ));

        let shared = Arc::new(Shared {
            index_name: index_name.clone(),
            queue: Mutex::new(OrchestrationQueue::new(
                index_name.clone(),
                config.ordering(),
                config.coalesce_updates(),
                config.max_pending(),
            )),
            wake: Notify::new(),
            progress: Notify::new(),
            flush_through: AtomicU64::new(0),
            in_flight_sets: AtomicUsize::new(0),
            executor,
            commit: Arc::clone(&commit),
            reporter,
            stats,
            permits: Arc::new(Semaphore::new(config.max_concurrent_dispatches())),
        });

        let (shutdown, shutdown_rx) = watch::channel(false);
        let timer = commit.spawn_periodic(shutdown_rx);
        let worker = tokio::spawn(worker_loop(Arc::clone(&shared), Batcher::new(config.batch())));

        tracing::info!(
            index = %index_name,
            backend = %backend_name,
            commit_mode = ?config.commit().mode(),
            ordering = ?config.ordering(),
            "Index orchestrator started"
        );

        Ok(Self {
            shared,
            worker: Mutex::new(Some(worker)),
            timer: Mutex::new(timer),
            shutdown,
            closed: tokio::sync::Mutex::new(false),
        })
    }

    #[must_use]
    pub fn index_name(&self) -> &str {
        &self.shared.index_name
    }

    /// Enqueue a work; never waits for I/O
    ///
    /// The returned future resolves once the work's work set completed
    /// dispatch (and, in immediate mode, was committed).
    pub fn submit(&self, item: WorkItem) -> OrchestrationResult<WorkFuture> {
        self.shared.submit(item)
    }

    /// Cloneable handle that can only submit work
    #[must_use]
    pub fn sender(&self) -> WorkSender {
        WorkSender::new(Arc::clone(&self.shared))
    }

    /// Dispatch everything submitted so far, wait for it, then commit
    pub async fn flush(&self) -> OrchestrationResult<()> {
        let target = {
            let queue = self.shared.queue.lock();
            if queue.state() != QueueState::Open {
                return Err(OrchestrationError::Closed {
                    index: self.shared.index_name.clone(),
                });
            }
            queue.last_seq()
        };
        self.shared.flush_through.fetch_max(target, Ordering::AcqRel);
        self.shared.wake.notify_one();

        self.shared
            .wait_for(|queue| queue.completed_through(target))
            .await;
        self.shared.commit.commit_now().await?;
        tracing::debug!(index = %self.shared.index_name, through = target, "Index flushed");
        Ok(())
    }

    /// Stop accepting work, fail pending works, drain in-flight work sets and commit
    ///
    /// Idempotent: later calls return `Ok(())` immediately.
    pub async fn close(&self) -> OrchestrationResult<()> {
        let mut closed = self.closed.lock().await;
        if *closed {
            return Ok(());
        }

        let drained = {
            let mut queue = self.shared.queue.lock();
            let drained = queue.begin_close();
            self.shared
                .stats
                .pending_count
                .store(queue.outstanding(), Ordering::Relaxed);
            drained
        };
        let cancelled = self.shared.resolve_unsent(
            drained,
            &ItemOutcome::Failed(FailureReason::closed(&self.shared.index_name)),
        );
        self.shared.commit.shut_down();
        self.shared.wake.notify_one();
        self.shared.progress.notify_waiters();

        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                tracing::error!(index = %self.shared.index_name, error = %e, "Orchestrator worker failed");
            }
        }
        let _ = self.shutdown.send(true);
        let timer = self.timer.lock().take();
        if let Some(timer) = timer {
            let _ = timer.await;
        }

        let result = if self.shared.commit.state() == CommitState::Idle {
            Ok(())
        } else {
            self.shared.commit.commit_now().await.map(|_| ())
        };

        self.shared.queue.lock().finish_close();
        *closed = true;
        tracing::info!(
            index = %self.shared.index_name,
            cancelled,
            "Index orchestrator closed"
        );
        result
    }

    /// Lift a fail-fast halt of `key`; returns whether it was halted
    pub fn reset_routing_key(&self, key: &RoutingKey) -> bool {
        let reset = self.shared.queue.lock().reset_routing_key(key);
        if reset {
            tracing::info!(index = %self.shared.index_name, routing_key = %key, "Routing key reset");
            self.shared.wake.notify_one();
        }
        reset
    }

    #[must_use]
    pub fn is_halted(&self, key: &RoutingKey) -> bool {
        self.shared.queue.lock().is_halted(key)
    }

    #[must_use]
    pub fn state(&self) -> QueueState {
        self.shared.queue.lock().state()
    }

    #[must_use]
    pub fn commit_state(&self) -> CommitState {
        self.shared.commit.state()
    }

    /// Whether the last backend call of this index reached the engine
    #[must_use]
    pub fn is_write_channel_healthy(&self) -> bool {
        self.shared.executor.health().is_healthy()
    }

    pub async fn stats(&self) -> OrchestratorStatsSnapshot {
        self.shared.stats.snapshot().await
    }
}

impl Drop for IndexOrchestrator {
    fn drop(&mut self) {
        let drained = self.shared.queue.lock().begin_close();
        if !drained.is_empty() {
            self.shared.resolve_unsent(
                drained,
                &ItemOutcome::Failed(FailureReason::closed(&self.shared.index_name)),
            );
        }
        self.shared.commit.shut_down();
        let _ = self.shutdown.send(true);
        self.shared.wake.notify_one();
    }
}
