//! Central sink for work and background failures
//!
//! The orchestrator reports every failed work item through an `ErrorReporter`,
//! which forwards an `ErrorContext` to the configured `ErrorHandler` and tells
//! the orchestrator what to do with the routing key according to the
//! `FailurePolicy`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::errors::OrchestrationError;
use crate::work::{FailureKind, FailureReason, RoutingKey, WorkKind};

/// What happens to a routing key after one of its works failed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Record the failure; later works of the key are still dispatched
    #[default]
    LogAndContinue,
    /// Fail pending works of the key and refuse new ones until reset
    FailFast,
}

/// Decision taken for the routing key of a failed work
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureAction {
    Continue,
    HaltRoutingKey,
}

/// Everything known about one failed work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    pub index_name: String,
    pub routing_key: Option<RoutingKey>,
    pub work_kind: Option<WorkKind>,
    pub work_set_id: Option<u64>,
    pub cause: FailureReason,
    /// Failures in the same work set, this one included
    pub failures_in_work_set: usize,
}

impl ErrorContext {
    /// Document id of the failed work, when it targets one document
    #[must_use]
    pub fn document_id(&self) -> Option<&str> {
        self.routing_key
            .as_ref()
            .map(RoutingKey::document_id)
            .filter(|id| !id.is_empty())
    }
}

/// Receives failures surfaced by the backend executor and the commit coordinator
pub trait ErrorHandler: Send + Sync + 'static {
    /// A work item failed
    fn handle(&self, context: &ErrorContext);

    /// A failure outside of any work item (commit, refresh)
    fn handle_exception(&self, message: &str, error: &OrchestrationError);
}

/// Default handler: structured error logs
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingErrorHandler;

impl ErrorHandler for LoggingErrorHandler {
    fn handle(&self, context: &ErrorContext) {
        tracing::error!(
            index = %context.index_name,
            document_id = context.document_id().unwrap_or("-"),
            tenant_id = context
                .routing_key
                .as_ref()
                .and_then(RoutingKey::tenant_id)
                .unwrap_or("-"),
            work_kind = %context.work_kind.map_or_else(|| "-".to_string(), |k| k.to_string()),
            work_set_id = context.work_set_id.unwrap_or_default(),
            failures_in_work_set = context.failures_in_work_set,
            cause = %context.cause,
            "Index work failed"
        );
    }

    fn handle_exception(&self, message: &str, error: &OrchestrationError) {
        tracing::error!(error = %error, "{message}");
    }
}

/// Keeps every reported failure in memory
#[derive(Debug, Default)]
pub struct CollectingErrorHandler {
    contexts: Mutex<Vec<ErrorContext>>,
    exceptions: Mutex<Vec<String>>,
}

impl CollectingErrorHandler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn contexts(&self) -> Vec<ErrorContext> {
        self.contexts.lock().clone()
    }

    /// Messages of background failures, formatted as `message: error`
    #[must_use]
    pub fn exceptions(&self) -> Vec<String> {
        self.exceptions.lock().clone()
    }

    pub fn clear(&self) {
        self.contexts.lock().clear();
        self.exceptions.lock().clear();
    }
}

impl ErrorHandler for CollectingErrorHandler {
    fn handle(&self, context: &ErrorContext) {
        self.contexts.lock().push(context.clone());
    }

    fn handle_exception(&self, message: &str, error: &OrchestrationError) {
        self.exceptions.lock().push(format!("{message}: {error}"));
    }
}

/// Applies the failure policy and forwards failures to the handler
#[derive(Clone)]
pub(crate) struct ErrorReporter {
    policy: FailurePolicy,
    handler: Arc<dyn ErrorHandler>,
}

impl ErrorReporter {
    pub(crate) fn new(policy: FailurePolicy, handler: Arc<dyn ErrorHandler>) -> Self {
        Self { policy, handler }
    }

    /// Report a failed work and decide what happens to its routing key
    ///
    /// Close cancellations are not failures of the work and are not reported.
    pub(crate) fn report(&self, context: &ErrorContext) -> FailureAction {
        if context.cause.kind == FailureKind::Closed {
            return FailureAction::Continue;
        }
        self.handler.handle(context);
        match (self.policy, context.work_kind) {
            (FailurePolicy::FailFast, Some(kind)) if !kind.is_barrier() => {
                FailureAction::HaltRoutingKey
            }
            _ => FailureAction::Continue,
        }
    }

    pub(crate) fn report_exception(&self, message: &str, error: &OrchestrationError) {
        self.handler.handle_exception(message, error);
    }
}
