//! Getter methods for the configuration types

use std::time::Duration;

use super::types::{
    BatchConfig, CommitConfig, CommitMode, DEFAULT_BACKEND_TIMEOUT_MS, DEFAULT_MAX_PENDING,
    OrchestratorConfig, OrderingMode,
};
use crate::error_handler::FailurePolicy;
use crate::errors::RetryConfig;

impl BatchConfig {
    #[must_use]
    pub fn max_items(&self) -> usize {
        self.max_items
    }

    #[must_use]
    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    #[must_use]
    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl CommitConfig {
    #[must_use]
    pub fn mode(&self) -> CommitMode {
        self.mode
    }

    #[must_use]
    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }
}

impl CommitMode {
    /// Timer interval for periodic commits
    #[must_use]
    pub fn interval(&self) -> Option<Duration> {
        match self {
            CommitMode::Periodic { interval_ms } => Some(Duration::from_millis(*interval_ms)),
            _ => None,
        }
    }
}

impl OrchestratorConfig {
    #[must_use]
    pub fn batch(&self) -> &BatchConfig {
        &self.batch
    }

    #[must_use]
    pub fn commit(&self) -> &CommitConfig {
        &self.commit
    }

    #[must_use]
    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }

    #[must_use]
    pub fn ordering(&self) -> OrderingMode {
        self.ordering
    }

    #[must_use]
    pub fn coalesce_updates(&self) -> bool {
        self.coalesce_updates
    }

    /// Timeout of a single backend call (default: 30 seconds)
    #[must_use]
    pub fn backend_timeout(&self) -> Duration {
        Duration::from_millis(
            self.backend_timeout_ms
                .unwrap_or(DEFAULT_BACKEND_TIMEOUT_MS),
        )
    }

    /// Pending works per index before backpressure (default: 10 000)
    #[must_use]
    pub fn max_pending(&self) -> usize {
        self.max_pending.unwrap_or(DEFAULT_MAX_PENDING)
    }

    /// Concurrent work set dispatches per index (default: number of CPUs)
    #[must_use]
    pub fn max_concurrent_dispatches(&self) -> usize {
        self.max_concurrent_dispatches
            .unwrap_or_else(num_cpus::get)
            .max(1)
    }
}
