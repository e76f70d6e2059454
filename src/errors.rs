//! Error types for index work orchestration
//!
//! `OrchestrationError` is what callers of the orchestration API see;
//! `BackendError` is what an `IndexEngineBackend` reports to the executor.
//! Per-item failures are never errors: they travel as `ItemOutcome::Failed`.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::work::{FailureKind, FailureReason, RoutingKey};

/// Result type alias for orchestration operations
pub type OrchestrationResult<T> = Result<T, OrchestrationError>;

/// Errors surfaced by the orchestration API
#[derive(Debug, Error)]
pub enum OrchestrationError {
    /// The index is closing or closed and accepts no more work
    #[error("Index '{index}' is closed")]
    Closed { index: String },

    /// No orchestrator is registered for the index
    #[error("Unknown index '{0}'")]
    UnknownIndex(String),

    /// An orchestrator is already registered for the index
    #[error("Index '{0}' is already open")]
    IndexAlreadyOpen(String),

    /// A work item was submitted to the orchestrator of another index
    #[error("Work for index '{actual}' submitted to orchestrator of index '{expected}'")]
    WrongIndex { expected: String, actual: String },

    /// The routing key was halted by the fail-fast policy
    #[error("Routing key {key} of index '{index}' is halted after failure: {reason}")]
    RoutingKeyHalted {
        index: String,
        key: RoutingKey,
        reason: FailureReason,
    },

    /// Too many works are waiting for dispatch
    #[error("Index '{index}' backpressure: {pending} pending works")]
    Backpressure { index: String, pending: usize },

    /// Configuration rejected at construction time
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Commit or refresh of the index failed
    #[error("Failed to commit index '{index}': {message}")]
    CommitFailed { index: String, message: String },

    /// Backend error outside of a work set (open, commit)
    #[error("Backend error: {0}")]
    Backend(#[from] BackendError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<anyhow::Error> for OrchestrationError {
    fn from(error: anyhow::Error) -> Self {
        OrchestrationError::Other(error.to_string())
    }
}

impl OrchestrationError {
    /// Check if error is transient and the operation may be retried
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            OrchestrationError::CommitFailed { .. }
            | OrchestrationError::Backpressure { .. }
            | OrchestrationError::Io(_) => true,
            OrchestrationError::Backend(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Backoff before retry `attempt` (zero-based); `None` for permanent errors
    #[must_use]
    pub fn retry_delay(&self, config: &RetryConfig, attempt: u32) -> Option<Duration> {
        self.is_transient().then(|| config.delay_for_attempt(attempt))
    }
}

/// Errors reported by an index engine backend
#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend cannot be reached
    #[error("Backend unreachable: {0}")]
    Connectivity(String),

    /// The backend did not answer in time
    #[error("Backend call timed out after {0:?}")]
    Timeout(Duration),

    /// The engine rejected a document
    #[error("Document '{document_id}' rejected: {reason}")]
    Rejected { document_id: String, reason: String },

    /// Unexpected HTTP status for a whole request
    #[error("HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Tantivy error wrapper
    #[error("Tantivy error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for BackendError {
    fn from(error: reqwest::Error) -> Self {
        if error.is_timeout() {
            BackendError::Connectivity(format!("request timed out: {error}"))
        } else if error.is_connect() || error.is_request() || error.is_body() {
            BackendError::Connectivity(error.to_string())
        } else {
            BackendError::Other(error.to_string())
        }
    }
}

impl BackendError {
    /// Whether the error invalidates the whole work set rather than one item
    #[must_use]
    pub fn is_total(&self) -> bool {
        !matches!(self, BackendError::Rejected { .. })
    }

    /// Check if error is transient and should be retried
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            BackendError::Connectivity(_) | BackendError::Timeout(_) | BackendError::Io(_) => {
                true
            }
            BackendError::Http { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Convert into the reason attached to failed items
    #[must_use]
    pub fn to_failure(&self) -> FailureReason {
        let kind = match self {
            BackendError::Connectivity(_) | BackendError::Io(_) => FailureKind::Connectivity,
            BackendError::Timeout(_) => FailureKind::Timeout,
            BackendError::Rejected { .. } => FailureKind::Rejected,
            BackendError::Http { status, .. } if *status == 429 || *status >= 500 => {
                FailureKind::Connectivity
            }
            _ => FailureKind::Backend,
        };
        FailureReason::new(kind, self.to_string())
    }
}

/// Retry configuration for commits and other retried operations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Maximum number of retry attempts
    pub max_attempts: u32,
    /// Initial retry delay
    pub initial_delay: Duration,
    /// Backoff multiplier for exponential backoff
    pub backoff_multiplier: f64,
    /// Maximum retry delay
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_millis(100),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Calculate delay for given attempt number (0-based)
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let multiplier = self.backoff_multiplier.powi(attempt.min(i32::MAX as u32) as i32);
        let delay_ms = (self.initial_delay.as_millis() as f64 * multiplier) as u64;
        let delay = Duration::from_millis(delay_ms);

        if delay > self.max_delay {
            self.max_delay
        } else {
            delay
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_documents_do_not_fail_the_whole_set() {
        let rejected = BackendError::Rejected {
            document_id: "1".to_string(),
            reason: "mapper_parsing_exception".to_string(),
        };
        assert!(!rejected.is_total());
        assert!(!rejected.is_transient());
        assert_eq!(rejected.to_failure().kind, FailureKind::Rejected);

        let down = BackendError::Connectivity("connection refused".to_string());
        assert!(down.is_total());
        assert!(down.is_transient());
        assert_eq!(down.to_failure().kind, FailureKind::Connectivity);
    }

    #[test]
    fn throttled_http_maps_to_connectivity() {
        let throttled = BackendError::Http {
            status: 429,
            body: "too many requests".to_string(),
        };
        assert!(throttled.is_transient());
        assert_eq!(throttled.to_failure().kind, FailureKind::Connectivity);

        let bad_request = BackendError::Http {
            status: 400,
            body: "bad".to_string(),
        };
        assert!(!bad_request.is_transient());
        assert_eq!(bad_request.to_failure().kind, FailureKind::Backend);
    }

    #[test]
    fn only_transient_errors_suggest_a_retry_delay() {
        let config = RetryConfig::default();
        let commit = OrchestrationError::CommitFailed {
            index: "books".to_string(),
            message: "refresh timed out".to_string(),
        };
        assert_eq!(commit.retry_delay(&config, 0), Some(config.initial_delay));
        assert_eq!(commit.retry_delay(&config, 1), Some(config.delay_for_attempt(1)));

        let invalid = OrchestrationError::InvalidConfig("max_items must be positive".to_string());
        assert_eq!(invalid.retry_delay(&config, 0), None);
    }
}
