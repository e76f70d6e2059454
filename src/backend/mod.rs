//! Index engine capability interface and its implementations
//!
//! The orchestrator only talks to engines through `IndexEngineBackend`.
//! Two adapters are provided:
//!
//! - `TantivyBackend` - embedded engine, Lucene-style writer/reader model
//! - `ElasticsearchBackend` - remote engine through the bulk HTTP API

pub mod elasticsearch;
pub mod executor;
pub mod tantivy;

pub use self::elasticsearch::ElasticsearchBackend;
pub use self::executor::{BackendExecutor, WriteChannelHealth};
pub use self::tantivy::TantivyBackend;

use futures::future::BoxFuture;

use crate::errors::BackendError;
use crate::work::{ItemOutcome, Payload, WorkItem, WorkKind};

/// Write primitives of an index engine
///
/// Implementations must be cheap to share (`Arc<dyn IndexEngineBackend>`).
/// Every method returns a boxed future so the trait stays object safe.
pub trait IndexEngineBackend: Send + Sync + 'static {
    /// Engine name used in logs
    fn name(&self) -> &str;

    fn apply_add<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
        document_id: &'a str,
        payload: &'a Payload,
    ) -> BoxFuture<'a, Result<(), BackendError>>;

    fn apply_update<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
        document_id: &'a str,
        payload: &'a Payload,
    ) -> BoxFuture<'a, Result<(), BackendError>>;

    fn apply_delete<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
        document_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>>;

    /// Delete every document, or every document of `tenant_id`
    fn apply_delete_all<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), BackendError>>;

    /// Make applied writes durable
    fn commit(&self) -> BoxFuture<'_, Result<(), BackendError>>;

    /// Make committed writes visible to readers
    fn refresh(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async { Ok(()) })
    }

    /// Whether `apply_bulk` can fail single items while others succeed
    ///
    /// When `false`, the executor fails the whole work set as soon as one item fails.
    fn reports_partial_failures(&self) -> bool {
        true
    }

    /// Apply works in order, one outcome per work
    ///
    /// The default walks the works through the single-document primitives.
    /// An error that is not item-specific (`BackendError::is_total`) aborts
    /// the call and fails the whole work set.
    fn apply_bulk<'a>(
        &'a self,
        items: &'a [WorkItem],
    ) -> BoxFuture<'a, Result<Vec<ItemOutcome>, BackendError>> {
        Box::pin(async move {
            let mut outcomes = Vec::with_capacity(items.len());
            for item in items {
                let tenant = item.tenant_id();
                let id = item.document_id();
                let result = match (item.kind(), item.payload()) {
                    (WorkKind::Add, Some(payload)) => self.apply_add(tenant, id, payload).await,
                    (WorkKind::Update, Some(payload)) => {
                        self.apply_update(tenant, id, payload).await
                    }
                    (WorkKind::Add | WorkKind::Update, None) => Err(missing_payload(item)),
                    (WorkKind::Delete, _) => self.apply_delete(tenant, id).await,
                    (WorkKind::DeleteAll, _) => self.apply_delete_all(tenant).await,
                };
                match result {
                    Ok(()) => outcomes.push(ItemOutcome::Succeeded),
                    Err(e) if e.is_total() => return Err(e),
                    Err(e) => outcomes.push(ItemOutcome::Failed(e.to_failure())),
                }
            }
            Ok(outcomes)
        })
    }
}

pub(crate) fn missing_payload(item: &WorkItem) -> BackendError {
    BackendError::Rejected {
        document_id: item.document_id().to_string(),
        reason: format!("{} work without payload", item.kind()),
    }
}
