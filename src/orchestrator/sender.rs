//! Cloneable submission handle
//!
//! A `WorkSender` shares the orchestrator's queue and can be handed to any
//! number of producer tasks. It cannot flush or close the index.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use super::service::Shared;
use crate::errors::OrchestrationResult;
use crate::work::{WorkFuture, WorkItem};

/// Handle for submitting works to one index
#[derive(Clone)]
pub struct WorkSender {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for WorkSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkSender")
            .field("index", &self.shared.index_name)
            .field(
                "pending_count",
                &self.shared.stats.pending_count.load(Ordering::Relaxed),
            )
            .finish()
    }
}

impl WorkSender {
    pub(super) fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    #[must_use]
    pub fn index_name(&self) -> &str {
        &self.shared.index_name
    }

    /// Enqueue a work; see `IndexOrchestrator::submit`
    #[inline]
    pub fn submit(&self, item: WorkItem) -> OrchestrationResult<WorkFuture> {
        self.shared.submit(item)
    }
}
