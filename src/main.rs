// search-orchestrator: feeds NDJSON work records from stdin into a tantivy index.
//
// Usage: search-orchestrator <index-dir> [config.json]
//
// One record per line:
//   {"op":"add","id":"1","tenant":"acme","body":"some text"}
//   {"op":"delete","id":"1"}
//   {"op":"delete_all"}

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use search_orchestration::backend::tantivy::DEFAULT_WRITER_BUDGET;
use search_orchestration::{
    IndexOrchestrator, ItemOutcome, LoggingErrorHandler, OrchestrationError, OrchestratorConfig,
    TantivyBackend, WorkFuture, WorkItem, WorkKind,
};

const INDEX_NAME: &str = "default";

#[derive(Debug, Deserialize)]
struct WorkRecord {
    op: WorkKind,
    #[serde(default)]
    id: String,
    #[serde(default)]
    tenant: Option<String>,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

impl WorkRecord {
    fn into_item(self) -> Result<WorkItem> {
        let body = match self.body {
            Some(serde_json::Value::String(text)) => Some(text),
            Some(other) => Some(other.to_string()),
            None => None,
        };
        let item = match (self.op, body) {
            (WorkKind::Add, Some(body)) => WorkItem::add(INDEX_NAME, self.id.as_str(), body),
            (WorkKind::Update, Some(body)) => WorkItem::update(INDEX_NAME, self.id.as_str(), body),
            (WorkKind::Add | WorkKind::Update, None) => bail!("{} record without body", self.op),
            (WorkKind::Delete, _) => WorkItem::delete(INDEX_NAME, self.id.as_str()),
            (WorkKind::DeleteAll, _) => WorkItem::delete_all(INDEX_NAME),
        };
        if self.op != WorkKind::DeleteAll && self.id.is_empty() {
            bail!("{} record without id", self.op);
        }
        Ok(match self.tenant {
            Some(tenant) => item.with_tenant(tenant.as_str()),
            None => item,
        })
    }
}

async fn settle(futures: &mut Vec<WorkFuture>, failed: &mut usize) {
    for outcome in futures::future::join_all(futures.drain(..)).await {
        if let ItemOutcome::Failed(reason) = outcome {
            *failed += 1;
            tracing::debug!(%reason, "Work failed");
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let mut args = std::env::args().skip(1);
    let Some(index_dir) = args.next() else {
        bail!("usage: search-orchestrator <index-dir> [config.json]");
    };
    let config = match args.next() {
        Some(path) => OrchestratorConfig::from_json_file(&path)
            .with_context(|| format!("Failed to load configuration from {path}"))?,
        None => OrchestratorConfig::default(),
    };

    let backend = Arc::new(
        TantivyBackend::open_in_dir(&index_dir, DEFAULT_WRITER_BUDGET)
            .with_context(|| format!("Failed to open index at {index_dir}"))?,
    );
    let orchestrator = IndexOrchestrator::start(
        INDEX_NAME,
        backend.clone(),
        config,
        Arc::new(LoggingErrorHandler),
    )?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut futures = Vec::new();
    let mut failed = 0usize;
    let mut invalid = 0usize;
    let mut line_number = 0usize;

    while let Some(line) = lines.next_line().await? {
        line_number += 1;
        if line.trim().is_empty() {
            continue;
        }
        let item = match serde_json::from_str::<WorkRecord>(&line)
            .map_err(anyhow::Error::from)
            .and_then(WorkRecord::into_item)
        {
            Ok(item) => item,
            Err(e) => {
                invalid += 1;
                tracing::warn!(line = line_number, error = %e, "Skipping invalid record");
                continue;
            }
        };

        loop {
            match orchestrator.submit(item.clone()) {
                Ok(future) => {
                    futures.push(future);
                    break;
                }
                Err(OrchestrationError::Backpressure { .. }) => settle(&mut futures, &mut failed).await,
                Err(e) => return Err(e.into()),
            }
        }
    }

    settle(&mut futures, &mut failed).await;
    orchestrator.flush().await?;
    let stats = orchestrator.stats().await;
    orchestrator.close().await?;

    tracing::info!(
        succeeded = stats.total_succeeded,
        failed,
        invalid,
        documents = backend.document_count(),
        "Done"
    );
    println!("{}", serde_json::to_string_pretty(&stats)?);
    Ok(())
}
