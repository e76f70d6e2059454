//! Test utilities shared by the orchestration test suite

#![allow(dead_code)]

use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::Semaphore;

use search_orchestration::{
    BackendError, IndexEngineBackend, ItemOutcome, OrchestratorConfig, Payload, WorkItem, WorkKind,
};

static TRACING: Once = Once::new();

/// Route test logs through the test writer; `RUST_LOG` selects the level
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_test_writer()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
            )
            .try_init();
    });
}

/// Configuration with a short debounce window for tests
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig::builder()
        .max_wait(Duration::from_millis(5))
        .backend_timeout(Duration::from_secs(5))
        .build()
        .expect("valid test configuration")
}

/// Poll `condition` until it holds; panics after two seconds
pub async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !condition() {
        assert!(tokio::time::Instant::now() < deadline, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
}

/// One work as the backend applied it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Applied {
    pub kind: WorkKind,
    pub key: String,
    pub body: Option<String>,
}

impl Applied {
    fn of(item: &WorkItem) -> Self {
        Self {
            kind: item.kind(),
            key: item.routing_key().to_string(),
            body: item.payload().and_then(Payload::as_str).map(str::to_string),
        }
    }
}

/// In-memory engine recording every call it receives
///
/// Documents live in a map keyed by `tenant/id`. Failures, delays and a
/// gate holding bulk calls can be injected per test.
#[derive(Default)]
pub struct RecordingBackend {
    bulks: Mutex<Vec<Vec<Applied>>>,
    documents: Mutex<HashMap<String, String>>,
    commits: AtomicUsize,
    failing_commits: AtomicUsize,
    rejected_ids: Mutex<HashSet<String>>,
    down: AtomicBool,
    delay: Mutex<Option<Duration>>,
    gate: Mutex<Option<Arc<Semaphore>>>,
    waiting: AtomicUsize,
    active_keys: Mutex<HashMap<String, usize>>,
    max_same_key: AtomicUsize,
    active_sets: AtomicUsize,
    max_active_sets: AtomicUsize,
}

impl RecordingBackend {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Bulk calls received, one entry per work set
    pub fn bulks(&self) -> Vec<Vec<Applied>> {
        self.bulks.lock().clone()
    }

    /// Every applied work, in application order
    pub fn applied(&self) -> Vec<Applied> {
        self.bulks.lock().iter().flatten().cloned().collect()
    }

    /// Applied works of one routing key, in application order
    pub fn applied_for(&self, key: &str) -> Vec<Applied> {
        self.applied().into_iter().filter(|a| a.key == key).collect()
    }

    pub fn document(&self, key: &str) -> Option<String> {
        self.documents.lock().get(key).cloned()
    }

    pub fn document_count(&self) -> usize {
        self.documents.lock().len()
    }

    pub fn commits(&self) -> usize {
        self.commits.load(Ordering::SeqCst)
    }

    /// Highest number of work sets holding the same key at once
    pub fn max_same_key(&self) -> usize {
        self.max_same_key.load(Ordering::SeqCst)
    }

    pub fn max_active_sets(&self) -> usize {
        self.max_active_sets.load(Ordering::SeqCst)
    }

    /// Bulk calls currently held by the gate
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn reject(&self, document_id: &str) {
        self.rejected_ids.lock().insert(document_id.to_string());
    }

    pub fn accept_all(&self) {
        self.rejected_ids.lock().clear();
    }

    /// Fail every bulk call with a connectivity error
    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    pub fn fail_next_commits(&self, count: usize) {
        self.failing_commits.store(count, Ordering::SeqCst);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock() = Some(delay);
    }

    /// Hold bulk calls until `release` is called
    pub fn hold(&self) {
        *self.gate.lock() = Some(Arc::new(Semaphore::new(0)));
    }

    pub fn release(&self) {
        if let Some(gate) = self.gate.lock().take() {
            gate.add_permits(Semaphore::MAX_PERMITS / 2);
        }
    }

    fn enter(&self, items: &[WorkItem]) {
        let sets = self.active_sets.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active_sets.fetch_max(sets, Ordering::SeqCst);
        let mut active = self.active_keys.lock();
        for item in items.iter().filter(|i| !i.kind().is_barrier()) {
            let count = active.entry(item.routing_key().to_string()).or_default();
            *count += 1;
            self.max_same_key.fetch_max(*count, Ordering::SeqCst);
        }
    }

    fn leave(&self, items: &[WorkItem]) {
        self.active_sets.fetch_sub(1, Ordering::SeqCst);
        let mut active = self.active_keys.lock();
        for item in items.iter().filter(|i| !i.kind().is_barrier()) {
            let key = item.routing_key().to_string();
            if let Some(count) = active.get_mut(&key) {
                *count -= 1;
                if *count == 0 {
                    active.remove(&key);
                }
            }
        }
    }

    fn apply(&self, item: &WorkItem) -> Result<(), BackendError> {
        if self.rejected_ids.lock().contains(item.document_id()) {
            return Err(BackendError::Rejected {
                document_id: item.document_id().to_string(),
                reason: "injected rejection".to_string(),
            });
        }
        let key = item.routing_key().to_string();
        let mut documents = self.documents.lock();
        match item.kind() {
            WorkKind::Add | WorkKind::Update => {
                let body = item
                    .payload()
                    .and_then(Payload::as_str)
                    .unwrap_or_default()
                    .to_string();
                documents.insert(key, body);
            }
            WorkKind::Delete => {
                documents.remove(&key);
            }
            WorkKind::DeleteAll => match item.tenant_id() {
                Some(tenant) => documents.retain(|k, _| !k.starts_with(&format!("{tenant}/"))),
                None => documents.clear(),
            },
        }
        Ok(())
    }

    async fn run_bulk(&self, items: &[WorkItem]) -> Result<Vec<ItemOutcome>, BackendError> {
        self.enter(items);
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            if let Ok(permit) = gate.acquire().await {
                permit.forget();
            }
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }
        let delay = *self.delay.lock();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.leave(items);

        if self.down.load(Ordering::SeqCst) {
            return Err(BackendError::Connectivity("injected outage".to_string()));
        }
        self.bulks.lock().push(items.iter().map(Applied::of).collect());
        Ok(items
            .iter()
            .map(|item| match self.apply(item) {
                Ok(()) => ItemOutcome::Succeeded,
                Err(e) => ItemOutcome::Failed(e.to_failure()),
            })
            .collect())
    }

    fn single(&self, item: WorkItem) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            let outcome = self.run_bulk(std::slice::from_ref(&item)).await?;
            match outcome.into_iter().next() {
                Some(ItemOutcome::Failed(reason)) => Err(BackendError::Rejected {
                    document_id: item.document_id().to_string(),
                    reason: reason.message,
                }),
                _ => Ok(()),
            }
        })
    }
}

fn scoped(item: WorkItem, tenant_id: Option<&str>) -> WorkItem {
    match tenant_id {
        Some(tenant) => item.with_tenant(tenant),
        None => item,
    }
}

impl IndexEngineBackend for RecordingBackend {
    fn name(&self) -> &str {
        "recording"
    }

    fn apply_add<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
        document_id: &'a str,
        payload: &'a Payload,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        self.single(scoped(WorkItem::add("test", document_id, payload.clone()), tenant_id))
    }

    fn apply_update<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
        document_id: &'a str,
        payload: &'a Payload,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        self.single(scoped(WorkItem::update("test", document_id, payload.clone()), tenant_id))
    }

    fn apply_delete<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
        document_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        self.single(scoped(WorkItem::delete("test", document_id), tenant_id))
    }

    fn apply_delete_all<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        self.single(scoped(WorkItem::delete_all("test"), tenant_id))
    }

    fn commit(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            let failing = self.failing_commits.load(Ordering::SeqCst);
            if failing > 0 {
                self.failing_commits.store(failing - 1, Ordering::SeqCst);
                return Err(BackendError::Connectivity("injected commit failure".to_string()));
            }
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }

    fn apply_bulk<'a>(
        &'a self,
        items: &'a [WorkItem],
    ) -> BoxFuture<'a, Result<Vec<ItemOutcome>, BackendError>> {
        Box::pin(self.run_bulk(items))
    }
}
