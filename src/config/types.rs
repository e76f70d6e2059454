//! Core configuration types for index work orchestration
//!
//! `OrchestratorConfig` is shared by every orchestrator opened through an
//! `IndexingManager`. All fields have defaults so partial JSON documents load.

use serde::{Deserialize, Serialize};

use crate::error_handler::FailurePolicy;
use crate::errors::RetryConfig;

/// Default maximum number of works per work set
pub const DEFAULT_MAX_ITEMS: usize = 100;

/// Default maximum estimated bytes per work set (5 MiB)
pub const DEFAULT_MAX_BYTES: usize = 5 * 1024 * 1024;

/// Default debounce window before a partial work set is dispatched
pub const DEFAULT_MAX_WAIT_MS: u64 = 10;

/// Default timeout of a single backend call
pub const DEFAULT_BACKEND_TIMEOUT_MS: u64 = 30_000;

/// Maximum number of pending works per index before backpressure
pub const DEFAULT_MAX_PENDING: usize = 10_000;

/// Whether same-key works must wait for each other
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderingMode {
    /// At most one work set per routing key in flight
    #[default]
    Ordered,
    /// Same-key works may be in flight concurrently (independent bulk loads)
    Unordered,
}

/// When accumulated writes become visible to readers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CommitMode {
    /// Commit and refresh after every dispatched work set
    #[default]
    Immediate,
    /// Commit and refresh on a timer
    Periodic { interval_ms: u64 },
    /// Commit only on explicit flush (and on close)
    Explicit,
}

/// Work set thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub(crate) max_items: usize,
    pub(crate) max_bytes: usize,
    pub(crate) max_wait_ms: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_items: DEFAULT_MAX_ITEMS,
            max_bytes: DEFAULT_MAX_BYTES,
            max_wait_ms: DEFAULT_MAX_WAIT_MS,
        }
    }
}

/// Commit scheduling and retry
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CommitConfig {
    pub(crate) mode: CommitMode,
    pub(crate) retry: RetryConfig,
}

/// Main configuration struct for index orchestrators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    pub(crate) batch: BatchConfig,
    pub(crate) commit: CommitConfig,
    pub(crate) failure_policy: FailurePolicy,
    pub(crate) ordering: OrderingMode,

    /// Merge adjacent pending add/update works of the same document
    ///
    /// Off by default: every submission reaches the backend.
    pub(crate) coalesce_updates: bool,

    /// Timeout of a single backend call, in milliseconds
    pub(crate) backend_timeout_ms: Option<u64>,

    /// Maximum pending works per index before `submit` reports backpressure
    pub(crate) max_pending: Option<usize>,

    /// Maximum work sets of one index dispatched concurrently
    ///
    /// Default: number of CPUs
    pub(crate) max_concurrent_dispatches: Option<usize>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            batch: BatchConfig::default(),
            commit: CommitConfig::default(),
            failure_policy: FailurePolicy::default(),
            ordering: OrderingMode::default(),
            coalesce_updates: false,
            backend_timeout_ms: Some(DEFAULT_BACKEND_TIMEOUT_MS),
            max_pending: Some(DEFAULT_MAX_PENDING),
            max_concurrent_dispatches: None,
        }
    }
}
