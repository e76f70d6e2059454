//! Lock-free statistics tracking for index orchestrators
//!
//! Counters are updated by dispatch tasks without locks; only the last commit
//! time sits behind an async mutex.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;

/// Lock-free orchestration statistics
#[derive(Debug)]
pub struct OrchestratorStats {
    /// Submissions whose work was applied by the backend
    pub total_succeeded: AtomicUsize,
    /// Submissions resolved with a failure (close cancellations included)
    pub total_failed: AtomicUsize,
    /// Submitted but not yet resolved
    pub pending_count: AtomicUsize,
    pub work_set_count: AtomicUsize,
    pub commit_count: AtomicUsize,
    pub last_commit: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl OrchestratorStats {
    #[inline]
    pub fn new() -> Self {
        Self {
            total_succeeded: AtomicUsize::new(0),
            total_failed: AtomicUsize::new(0),
            pending_count: AtomicUsize::new(0),
            work_set_count: AtomicUsize::new(0),
            commit_count: AtomicUsize::new(0),
            last_commit: Arc::new(Mutex::new(None)),
        }
    }

    pub(crate) fn record_outcomes(&self, succeeded: usize, failed: usize) {
        self.total_succeeded.fetch_add(succeeded, Ordering::Relaxed);
        self.total_failed.fetch_add(failed, Ordering::Relaxed);
    }

    pub(crate) async fn record_commit(&self) {
        self.commit_count.fetch_add(1, Ordering::Relaxed);
        *self.last_commit.lock().await = Some(Utc::now());
    }

    /// Get snapshot of current statistics
    #[inline]
    pub async fn snapshot(&self) -> OrchestratorStatsSnapshot {
        OrchestratorStatsSnapshot {
            total_succeeded: self.total_succeeded.load(Ordering::Relaxed),
            total_failed: self.total_failed.load(Ordering::Relaxed),
            pending_count: self.pending_count.load(Ordering::Relaxed),
            work_set_count: self.work_set_count.load(Ordering::Relaxed),
            commit_count: self.commit_count.load(Ordering::Relaxed),
            last_commit: *self.last_commit.lock().await,
        }
    }
}

impl Default for OrchestratorStats {
    fn default() -> Self {
        Self::new()
    }
}

/// Immutable snapshot of orchestration statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OrchestratorStatsSnapshot {
    pub total_succeeded: usize,
    pub total_failed: usize,
    pub pending_count: usize,
    pub work_set_count: usize,
    pub commit_count: usize,
    pub last_commit: Option<DateTime<Utc>>,
}
