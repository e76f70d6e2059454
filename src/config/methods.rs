//! Setter methods of `OrchestratorConfigBuilder`

use std::time::Duration;

use super::builder::OrchestratorConfigBuilder;
use super::types::{CommitMode, OrderingMode};
use crate::error_handler::FailurePolicy;
use crate::errors::RetryConfig;

impl OrchestratorConfigBuilder {
    /// Maximum number of works in one work set
    #[must_use]
    pub fn max_items(mut self, max_items: usize) -> Self {
        self.config.batch.max_items = max_items;
        self
    }

    /// Maximum estimated size of one work set; a single larger work still goes alone
    #[must_use]
    pub fn max_bytes(mut self, max_bytes: usize) -> Self {
        self.config.batch.max_bytes = max_bytes;
        self
    }

    /// Debounce window before a partially filled work set is dispatched
    #[must_use]
    pub fn max_wait(mut self, max_wait: Duration) -> Self {
        self.config.batch.max_wait_ms = max_wait.as_millis() as u64;
        self
    }

    #[must_use]
    pub fn commit_mode(mut self, mode: CommitMode) -> Self {
        self.config.commit.mode = mode;
        self
    }

    /// Commit on a timer
    #[must_use]
    pub fn periodic_commit(self, interval: Duration) -> Self {
        self.commit_mode(CommitMode::Periodic {
            interval_ms: interval.as_millis() as u64,
        })
    }

    #[must_use]
    pub fn commit_retry(mut self, retry: RetryConfig) -> Self {
        self.config.commit.retry = retry;
        self
    }

    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Relax per-document ordering for independent bulk loads
    #[must_use]
    pub fn ordering(mut self, ordering: OrderingMode) -> Self {
        self.config.ordering = ordering;
        self
    }

    /// Opt into merging adjacent pending add/update works of one document
    #[must_use]
    pub fn coalesce_updates(mut self, coalesce: bool) -> Self {
        self.config.coalesce_updates = coalesce;
        self
    }

    #[must_use]
    pub fn backend_timeout(mut self, timeout: Duration) -> Self {
        self.config.backend_timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    #[must_use]
    pub fn max_pending(mut self, max_pending: usize) -> Self {
        self.config.max_pending = Some(max_pending);
        self
    }

    #[must_use]
    pub fn max_concurrent_dispatches(mut self, max: usize) -> Self {
        self.config.max_concurrent_dispatches = Some(max);
        self
    }
}
