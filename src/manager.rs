//! Registry of per-index orchestrators
//!
//! Routes submissions to the orchestrator of their index. Each index has its
//! own queue lock and worker, so work on one index never waits for another.
//!
//! A closed index stays registered: submissions and flushes for it fail with
//! `Closed` until it is reopened. Reopening is only allowed once its close
//! has fully drained.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use std::sync::Arc;

use crate::backend::IndexEngineBackend;
use crate::config::OrchestratorConfig;
use crate::error_handler::{ErrorHandler, LoggingErrorHandler};
use crate::errors::{OrchestrationError, OrchestrationResult};
use crate::orchestrator::{IndexOrchestrator, OrchestratorStatsSnapshot, QueueState};
use crate::work::{RoutingKey, WorkFuture, WorkItem};

pub struct IndexingManager {
    config: OrchestratorConfig,
    error_handler: Arc<dyn ErrorHandler>,
    indexes: DashMap<String, Arc<IndexOrchestrator>>,
}

impl IndexingManager {
    /// Manager whose indexes default to `config` and report to `error_handler`
    pub fn new(
        config: OrchestratorConfig,
        error_handler: Arc<dyn ErrorHandler>,
    ) -> OrchestrationResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            error_handler,
            indexes: DashMap::new(),
        })
    }

    /// Manager with default configuration and logging error handler
    #[must_use]
    pub fn with_defaults() -> Self {
        Self {
            config: OrchestratorConfig::default(),
            error_handler: Arc::new(LoggingErrorHandler),
            indexes: DashMap::new(),
        }
    }

    /// Start the orchestrator of `index_name` with the manager's configuration
    pub fn open_index(
        &self,
        index_name: &str,
        backend: Arc<dyn IndexEngineBackend>,
    ) -> OrchestrationResult<Arc<IndexOrchestrator>> {
        self.open_index_with_config(index_name, backend, self.config.clone())
    }

    /// Start the orchestrator of `index_name` with its own configuration
    pub fn open_index_with_config(
        &self,
        index_name: &str,
        backend: Arc<dyn IndexEngineBackend>,
        config: OrchestratorConfig,
    ) -> OrchestrationResult<Arc<IndexOrchestrator>> {
        let entry = self.indexes.entry(index_name.to_string());
        let reopening = match &entry {
            Entry::Occupied(existing) if existing.get().state() != QueueState::Closed => {
                return Err(OrchestrationError::IndexAlreadyOpen(index_name.to_string()));
            }
            Entry::Occupied(_) => true,
            Entry::Vacant(_) => false,
        };
        let orchestrator = Arc::new(IndexOrchestrator::start(
            index_name,
            backend,
            config,
            Arc::clone(&self.error_handler),
        )?);
        entry.insert(Arc::clone(&orchestrator));
        if reopening {
            tracing::info!(index = %index_name, "Index reopened");
        }
        Ok(orchestrator)
    }

    /// Orchestrator of a registered index, open or closed
    pub fn index(&self, index_name: &str) -> OrchestrationResult<Arc<IndexOrchestrator>> {
        self.indexes
            .get(index_name)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| OrchestrationError::UnknownIndex(index_name.to_string()))
    }

    /// Route a work to the orchestrator of its index
    pub fn submit(&self, item: WorkItem) -> OrchestrationResult<WorkFuture> {
        match self.indexes.get(item.index_name()) {
            Some(orchestrator) => orchestrator.submit(item),
            None => Err(OrchestrationError::UnknownIndex(item.index_name().to_string())),
        }
    }

    pub async fn flush(&self, index_name: &str) -> OrchestrationResult<()> {
        self.index(index_name)?.flush().await
    }

    /// Close the index; it stays registered as closed
    ///
    /// Closing an already closed index returns `Ok(())`.
    pub async fn close(&self, index_name: &str) -> OrchestrationResult<()> {
        self.index(index_name)?.close().await
    }

    /// Close every open index; returns the first error after trying all
    pub async fn close_all(&self) -> OrchestrationResult<()> {
        let names = self.index_names();
        let results = futures::future::join_all(names.iter().map(|name| self.close(name))).await;
        let mut first_error = None;
        for (name, result) in names.iter().zip(results) {
            if let Err(e) = result {
                tracing::error!(index = %name, error = %e, "Failed to close index");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    pub fn reset_routing_key(&self, index_name: &str, key: &RoutingKey) -> OrchestrationResult<bool> {
        Ok(self.index(index_name)?.reset_routing_key(key))
    }

    pub async fn stats(&self, index_name: &str) -> OrchestrationResult<OrchestratorStatsSnapshot> {
        Ok(self.index(index_name)?.stats().await)
    }

    /// Names of the indexes not yet closed, sorted
    #[must_use]
    pub fn index_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .indexes
            .iter()
            .filter(|e| e.value().state() != QueueState::Closed)
            .map(|e| e.key().clone())
            .collect();
        names.sort();
        names
    }
}
