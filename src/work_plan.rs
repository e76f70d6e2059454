//! Per-session collection of works submitted and awaited together

use futures::future::join_all;
use imstr::ImString;

use crate::errors::OrchestrationError;
use crate::manager::IndexingManager;
use crate::work::{FailureKind, FailureReason, ItemOutcome, Payload, RoutingKey, WorkItem, WorkKind};

/// Works collected for one index (and tenant) during a session
#[derive(Debug, Clone)]
pub struct WorkPlan {
    index_name: ImString,
    tenant_id: Option<ImString>,
    works: Vec<WorkItem>,
}

/// Outcome of one planned work
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedOutcome {
    pub routing_key: RoutingKey,
    pub kind: WorkKind,
    pub outcome: ItemOutcome,
}

/// Outcomes of an executed plan, in planning order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkPlanReport {
    pub outcomes: Vec<PlannedOutcome>,
}

impl WorkPlanReport {
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.outcomes.iter().all(|o| o.outcome.is_success())
    }

    pub fn failures(&self) -> impl Iterator<Item = &PlannedOutcome> {
        self.outcomes.iter().filter(|o| !o.outcome.is_success())
    }
}

impl WorkPlan {
    #[must_use]
    pub fn new(index_name: impl Into<ImString>) -> Self {
        Self {
            index_name: index_name.into(),
            tenant_id: None,
            works: Vec::new(),
        }
    }

    /// Scope every work of the plan to a tenant
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<ImString>) -> Self {
        let tenant_id: ImString = tenant_id.into();
        self.tenant_id = (!tenant_id.is_empty()).then_some(tenant_id);
        self
    }

    pub fn add(&mut self, document_id: impl Into<ImString>, payload: impl Into<Payload>) -> &mut Self {
        let item = WorkItem::add(self.index_name.clone(), document_id, payload);
        self.push(item)
    }

    pub fn update(&mut self, document_id: impl Into<ImString>, payload: impl Into<Payload>) -> &mut Self {
        let item = WorkItem::update(self.index_name.clone(), document_id, payload);
        self.push(item)
    }

    pub fn delete(&mut self, document_id: impl Into<ImString>) -> &mut Self {
        let item = WorkItem::delete(self.index_name.clone(), document_id);
        self.push(item)
    }

    pub fn delete_all(&mut self) -> &mut Self {
        let item = WorkItem::delete_all(self.index_name.clone());
        self.push(item)
    }

    fn push(&mut self, item: WorkItem) -> &mut Self {
        let item = match &self.tenant_id {
            Some(tenant) => item.with_tenant(tenant.clone()),
            None => item,
        };
        self.works.push(item);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.works.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.works.is_empty()
    }

    /// Drop every planned work without submitting it
    pub fn discard(&mut self) {
        if !self.works.is_empty() {
            tracing::debug!(index = %self.index_name, discarded = self.works.len(), "Work plan discarded");
        }
        self.works.clear();
    }

    /// Submit the planned works in order and wait for all of them
    ///
    /// Submission happens before the first poll of the returned future, so
    /// the plan's order is fixed even if the future is awaited later.
    /// Works refused at submission are reported as failed outcomes.
    pub fn execute(
        self,
        manager: &IndexingManager,
    ) -> impl Future<Output = WorkPlanReport> + Send + 'static {
        let mut planned = Vec::with_capacity(self.works.len());
        let mut futures = Vec::with_capacity(self.works.len());
        for item in self.works {
            planned.push((item.routing_key().clone(), item.kind()));
            futures.push(manager.submit(item));
        }

        async move {
            let outcomes = join_all(futures.into_iter().map(|submitted| async move {
                match submitted {
                    Ok(future) => future.await,
                    Err(e) => ItemOutcome::Failed(refusal(&e)),
                }
            }))
            .await;

            WorkPlanReport {
                outcomes: planned
                    .into_iter()
                    .zip(outcomes)
                    .map(|((routing_key, kind), outcome)| PlannedOutcome {
                        routing_key,
                        kind,
                        outcome,
                    })
                    .collect(),
            }
        }
    }
}

fn refusal(error: &OrchestrationError) -> FailureReason {
    let kind = match error {
        OrchestrationError::Closed { .. } => FailureKind::Closed,
        OrchestrationError::RoutingKeyHalted { .. } => FailureKind::Halted,
        _ => FailureKind::Rejected,
    };
    FailureReason::new(kind, error.to_string())
}
