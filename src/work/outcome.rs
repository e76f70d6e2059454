//! Per-item and per-work-set dispatch outcomes

use std::fmt;
use thiserror::Error;

/// Category of an item failure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// The engine refused the document (malformed payload, mapping conflict)
    Rejected,
    /// The backend could not be reached
    Connectivity,
    /// The backend call exceeded its timeout
    Timeout,
    /// The index was closed before the work was dispatched
    Closed,
    /// A previous failure halted the routing key (fail-fast policy)
    Halted,
    /// Any other backend failure
    Backend,
}

impl FailureKind {
    /// Transient failures may succeed if the caller resubmits
    #[must_use]
    pub fn is_transient(self) -> bool {
        matches!(self, FailureKind::Connectivity | FailureKind::Timeout)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FailureKind::Rejected => "rejected",
            FailureKind::Connectivity => "connectivity",
            FailureKind::Timeout => "timeout",
            FailureKind::Closed => "closed",
            FailureKind::Halted => "halted",
            FailureKind::Backend => "backend",
        };
        f.write_str(name)
    }
}

/// Why a work item failed
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind}: {message}")]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
}

impl FailureReason {
    #[must_use]
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Rejected, message)
    }

    #[must_use]
    pub fn closed(index_name: &str) -> Self {
        Self::new(
            FailureKind::Closed,
            format!("index '{index_name}' closed before the work was dispatched"),
        )
    }
}

/// Outcome of one work item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ItemOutcome {
    Succeeded,
    Failed(FailureReason),
}

impl ItemOutcome {
    #[inline]
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self, ItemOutcome::Succeeded)
    }

    #[inline]
    #[must_use]
    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            ItemOutcome::Succeeded => None,
            ItemOutcome::Failed(reason) => Some(reason),
        }
    }

    /// Convert into a `Result` for `?`-style handling by callers
    pub fn into_result(self) -> Result<(), FailureReason> {
        match self {
            ItemOutcome::Succeeded => Ok(()),
            ItemOutcome::Failed(reason) => Err(reason),
        }
    }
}

/// Aggregate view of a work set's outcomes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkSetOutcome {
    AllSucceeded,
    Partial { failed: usize },
    AllFailed,
}

/// Result of dispatching one work set
#[derive(Debug, Clone)]
pub struct DispatchResult {
    pub work_set_id: u64,
    /// One outcome per item, in work set order
    pub outcomes: Vec<ItemOutcome>,
    /// Set when the whole work set failed (connectivity, timeout)
    pub total_failure: Option<FailureReason>,
}

impl DispatchResult {
    #[must_use]
    pub fn empty(work_set_id: u64) -> Self {
        Self {
            work_set_id,
            outcomes: Vec::new(),
            total_failure: None,
        }
    }

    /// Every item failed for the same reason
    #[must_use]
    pub fn all_failed(work_set_id: u64, len: usize, reason: FailureReason) -> Self {
        Self {
            work_set_id,
            outcomes: vec![ItemOutcome::Failed(reason.clone()); len],
            total_failure: Some(reason),
        }
    }

    #[must_use]
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|o| !o.is_success()).count()
    }

    #[must_use]
    pub fn aggregate(&self) -> WorkSetOutcome {
        let failed = self.failed_count();
        if failed == 0 {
            WorkSetOutcome::AllSucceeded
        } else if failed == self.outcomes.len() {
            WorkSetOutcome::AllFailed
        } else {
            WorkSetOutcome::Partial { failed }
        }
    }
}
