//! Dispatches work sets to the index engine and normalizes their outcomes

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::{Duration, Instant};

use super::IndexEngineBackend;
use crate::errors::BackendError;
use crate::work::{DispatchResult, FailureKind, FailureReason, ItemOutcome, WorkSet};

/// Lock-free health flag of an index's write channel
///
/// Set unhealthy by transient total failures, healthy again by any
/// successful dispatch or commit. Scheduled commits are skipped while the
/// channel is unhealthy.
#[derive(Debug)]
pub struct WriteChannelHealth {
    healthy: AtomicBool,
    consecutive_failures: AtomicU32,
}

impl Default for WriteChannelHealth {
    fn default() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            consecutive_failures: AtomicU32::new(0),
        }
    }
}

impl WriteChannelHealth {
    #[inline]
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    #[inline]
    #[must_use]
    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures.load(Ordering::Relaxed)
    }

    pub fn mark_healthy(&self) {
        self.consecutive_failures.store(0, Ordering::Relaxed);
        self.healthy.store(true, Ordering::Release);
    }

    /// Returns the number of consecutive failures, this one included
    pub fn mark_unhealthy(&self) -> u32 {
        self.healthy.store(false, Ordering::Release);
        self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1
    }
}

/// Runs backend calls for one index with a timeout
pub struct BackendExecutor {
    index_name: String,
    backend: Arc<dyn IndexEngineBackend>,
    timeout: Duration,
    health: Arc<WriteChannelHealth>,
}

impl BackendExecutor {
    #[must_use]
    pub fn new(
        index_name: impl Into<String>,
        backend: Arc<dyn IndexEngineBackend>,
        timeout: Duration,
        health: Arc<WriteChannelHealth>,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            backend,
            timeout,
            health,
        }
    }

    #[must_use]
    pub fn health(&self) -> &Arc<WriteChannelHealth> {
        &self.health
    }

    /// Dispatch a work set and return one outcome per work
    ///
    /// Never fails as a whole: total failures and timeouts are reported as
    /// failed outcomes for every work of the set. Empty sets never reach the
    /// backend.
    pub async fn execute(&self, set: &WorkSet) -> DispatchResult {
        if set.is_empty() {
            return DispatchResult::empty(set.id());
        }

        let start = Instant::now();
        let call = self.backend.apply_bulk(set.items());
        let result = match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(outcomes)) if outcomes.len() == set.len() => {
                self.health.mark_healthy();
                self.normalize(set.id(), outcomes)
            }
            Ok(Ok(outcomes)) => DispatchResult::all_failed(
                set.id(),
                set.len(),
                FailureReason::new(
                    FailureKind::Backend,
                    format!(
                        "backend '{}' returned {} outcomes for {} works",
                        self.backend.name(),
                        outcomes.len(),
                        set.len()
                    ),
                ),
            ),
            Ok(Err(error)) => {
                if error.is_transient() {
                    self.health.mark_unhealthy();
                }
                DispatchResult::all_failed(set.id(), set.len(), error.to_failure())
            }
            Err(_) => {
                self.health.mark_unhealthy();
                DispatchResult::all_failed(
                    set.id(),
                    set.len(),
                    BackendError::Timeout(self.timeout).to_failure(),
                )
            }
        };

        tracing::debug!(
            index = %self.index_name,
            backend = self.backend.name(),
            work_set_id = set.id(),
            works = set.len(),
            outcome = ?result.aggregate(),
            duration_ms = start.elapsed().as_millis() as u64,
            "Work set dispatched"
        );
        result
    }

    /// Commit then refresh, each bounded by the backend timeout
    pub async fn commit(&self) -> Result<(), BackendError> {
        let outcome = async {
            tokio::time::timeout(self.timeout, self.backend.commit())
                .await
                .map_err(|_| BackendError::Timeout(self.timeout))??;
            tokio::time::timeout(self.timeout, self.backend.refresh())
                .await
                .map_err(|_| BackendError::Timeout(self.timeout))?
        }
        .await;

        match &outcome {
            Ok(()) => self.health.mark_healthy(),
            Err(e) if e.is_transient() => {
                self.health.mark_unhealthy();
            }
            Err(_) => {}
        }
        outcome
    }

    fn normalize(&self, work_set_id: u64, outcomes: Vec<ItemOutcome>) -> DispatchResult {
        if !self.backend.reports_partial_failures() {
            if let Some(reason) = outcomes.iter().find_map(ItemOutcome::failure) {
                let reason = FailureReason::new(
                    reason.kind,
                    format!("work set failed as a whole: {}", reason.message),
                );
                return DispatchResult::all_failed(work_set_id, outcomes.len(), reason);
            }
        }
        DispatchResult {
            work_set_id,
            outcomes,
            total_failure: None,
        }
    }
}
