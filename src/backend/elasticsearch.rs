//! Elasticsearch backend over the bulk HTTP API
//!
//! Adds and updates are sent as `index` actions, deletes as `delete` actions,
//! in one NDJSON `_bulk` request per run of document works. `DeleteAll` is a
//! `_delete_by_query` and splits the bulk around it. Commit maps to `_refresh`.

use futures::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;
use url::Url;

use super::IndexEngineBackend;
use crate::errors::BackendError;
use crate::work::{FailureKind, FailureReason, ItemOutcome, Payload, WorkItem, WorkKind};

/// Field holding the tenant id in indexed sources
pub const TENANT_FIELD: &str = "_tenant_id";

#[derive(Debug, Deserialize)]
struct BulkResponse {
    #[serde(default)]
    errors: bool,
    #[serde(default)]
    items: Vec<BulkResponseItem>,
}

#[derive(Debug, Deserialize)]
struct BulkResponseItem {
    #[serde(alias = "index", alias = "delete", alias = "create", alias = "update")]
    result: BulkItemResult,
}

#[derive(Debug, Deserialize)]
struct BulkItemResult {
    status: u16,
    #[serde(default)]
    error: Option<Value>,
}

pub struct ElasticsearchBackend {
    client: Client,
    base_url: Url,
    index: String,
}

impl ElasticsearchBackend {
    /// Backend writing to `index` on the cluster at `base_url`
    pub fn new(
        base_url: &str,
        index: impl Into<String>,
        request_timeout: Duration,
    ) -> Result<Self, BackendError> {
        let mut base_url = Url::parse(base_url)
            .map_err(|e| BackendError::Other(format!("Invalid Elasticsearch URL '{base_url}': {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::Other(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            base_url,
            index: index.into(),
        })
    }

    fn endpoint(&self, action: &str) -> Result<Url, BackendError> {
        self.base_url
            .join(&format!("{}/{action}", self.index))
            .map_err(|e| BackendError::Other(format!("Invalid endpoint for '{action}': {e}")))
    }

    /// Send a request; 5xx and 429 answers are errors for the whole call
    async fn send(&self, request: reqwest::RequestBuilder) -> Result<(StatusCode, String), BackendError> {
        let response = request.send().await?;
        let status = response.status();
        let body = response.text().await?;
        if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
            return Err(BackendError::Http {
                status: status.as_u16(),
                body,
            });
        }
        Ok((status, body))
    }

    /// Source document sent to the engine, tenant injected
    fn source(item: &WorkItem, payload: &Payload) -> Result<Value, String> {
        let mut source: Value = serde_json::from_slice(payload.as_bytes())
            .map_err(|e| format!("payload is not valid JSON: {e}"))?;
        let Some(object) = source.as_object_mut() else {
            return Err("payload is not a JSON object".to_string());
        };
        if let Some(tenant) = item.tenant_id() {
            object.insert(TENANT_FIELD.to_string(), Value::String(tenant.to_string()));
        }
        Ok(source)
    }

    /// One `_bulk` request for a run of document works
    async fn bulk_documents(&self, items: &[WorkItem]) -> Result<Vec<ItemOutcome>, BackendError> {
        let mut outcomes: Vec<Option<ItemOutcome>> = vec![None; items.len()];
        let mut sent = Vec::with_capacity(items.len());
        let mut body = String::new();

        for (position, item) in items.iter().enumerate() {
            let id = item.routing_key().qualified_id();
            let lines = match (item.kind(), item.payload()) {
                (WorkKind::Delete, _) => Ok(vec![json!({ "delete": { "_id": id } })]),
                (_, Some(payload)) => Self::source(item, payload)
                    .map(|source| vec![json!({ "index": { "_id": id } }), source]),
                (_, None) => Err(format!("{} work without payload", item.kind())),
            };
            match lines {
                Ok(lines) => {
                    for line in lines {
                        body.push_str(&line.to_string());
                        body.push('\n');
                    }
                    sent.push(position);
                }
                Err(reason) => {
                    outcomes[position] = Some(ItemOutcome::Failed(FailureReason::rejected(format!(
                        "document '{}': {reason}",
                        item.document_id()
                    ))));
                }
            }
        }

        if !sent.is_empty() {
            let request = self
                .client
                .post(self.endpoint("_bulk")?)
                .header("Content-Type", "application/x-ndjson")
                .body(body);
            let (status, text) = self.send(request).await?;
            if !status.is_success() {
                return Err(BackendError::Http {
                    status: status.as_u16(),
                    body: text,
                });
            }
            let response: BulkResponse = serde_json::from_str(&text)
                .map_err(|e| BackendError::Other(format!("Malformed bulk response: {e}")))?;
            if response.items.len() != sent.len() {
                return Err(BackendError::Other(format!(
                    "Bulk response has {} items for {} actions",
                    response.items.len(),
                    sent.len()
                )));
            }
            if response.errors {
                tracing::debug!(index = %self.index, "Bulk response reports item errors");
            }
            for (position, item) in sent.into_iter().zip(response.items) {
                outcomes[position] = Some(Self::item_outcome(&items[position], item.result));
            }
        }

        Ok(outcomes
            .into_iter()
            .map(|outcome| outcome.unwrap_or(ItemOutcome::Succeeded))
            .collect())
    }

    fn item_outcome(item: &WorkItem, result: BulkItemResult) -> ItemOutcome {
        let status = result.status;
        if (200..300).contains(&status) || (item.kind() == WorkKind::Delete && status == 404) {
            return ItemOutcome::Succeeded;
        }
        let reason = result
            .error
            .as_ref()
            .and_then(|e| e.get("reason").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| format!("status {status}"));
        let kind = if status == 429 || status >= 500 {
            FailureKind::Connectivity
        } else {
            FailureKind::Rejected
        };
        ItemOutcome::Failed(FailureReason::new(
            kind,
            format!("document '{}': {reason}", item.document_id()),
        ))
    }

    async fn delete_by_query(&self, tenant_id: Option<&str>) -> Result<(), BackendError> {
        let query = match tenant_id {
            Some(tenant) => json!({ "query": { "term": { TENANT_FIELD: tenant } } }),
            None => json!({ "query": { "match_all": {} } }),
        };
        let mut url = self.endpoint("_delete_by_query")?;
        url.query_pairs_mut().append_pair("conflicts", "proceed");
        let (status, body) = self.send(self.client.post(url).json(&query)).await?;
        if status.is_success() || status == StatusCode::NOT_FOUND {
            Ok(())
        } else {
            Err(BackendError::Rejected {
                document_id: String::new(),
                reason: format!("delete by query failed with {status}: {body}"),
            })
        }
    }

    async fn apply_single(&self, item: WorkItem) -> Result<(), BackendError> {
        let outcome = self
            .bulk_documents(std::slice::from_ref(&item))
            .await?
            .into_iter()
            .next()
            .unwrap_or(ItemOutcome::Succeeded);
        match outcome {
            ItemOutcome::Succeeded => Ok(()),
            ItemOutcome::Failed(reason) if reason.kind == FailureKind::Connectivity => {
                Err(BackendError::Connectivity(reason.message))
            }
            ItemOutcome::Failed(reason) => Err(BackendError::Rejected {
                document_id: item.document_id().to_string(),
                reason: reason.message,
            }),
        }
    }

    fn work(&self, item: WorkItem, tenant_id: Option<&str>) -> WorkItem {
        match tenant_id {
            Some(tenant) => item.with_tenant(tenant),
            None => item,
        }
    }
}

impl IndexEngineBackend for ElasticsearchBackend {
    fn name(&self) -> &str {
        "elasticsearch"
    }

    fn apply_add<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
        document_id: &'a str,
        payload: &'a Payload,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        let item = self.work(
            WorkItem::add(self.index.as_str(), document_id, payload.clone()),
            tenant_id,
        );
        Box::pin(self.apply_single(item))
    }

    fn apply_update<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
        document_id: &'a str,
        payload: &'a Payload,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        let item = self.work(
            WorkItem::update(self.index.as_str(), document_id, payload.clone()),
            tenant_id,
        );
        Box::pin(self.apply_single(item))
    }

    fn apply_delete<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
        document_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        let item = self.work(WorkItem::delete(self.index.as_str(), document_id), tenant_id);
        Box::pin(self.apply_single(item))
    }

    fn apply_delete_all<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(self.delete_by_query(tenant_id))
    }

    fn commit(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            let (status, body) = self.send(self.client.post(self.endpoint("_refresh")?)).await?;
            if status.is_success() {
                Ok(())
            } else {
                Err(BackendError::Http {
                    status: status.as_u16(),
                    body,
                })
            }
        })
    }

    fn apply_bulk<'a>(
        &'a self,
        items: &'a [WorkItem],
    ) -> BoxFuture<'a, Result<Vec<ItemOutcome>, BackendError>> {
        Box::pin(async move {
            let mut outcomes = Vec::with_capacity(items.len());
            let mut start = 0;
            while start < items.len() {
                if items[start].kind().is_barrier() {
                    let outcome = match self.delete_by_query(items[start].tenant_id()).await {
                        Ok(()) => ItemOutcome::Succeeded,
                        Err(e) if e.is_total() => return Err(e),
                        Err(e) => ItemOutcome::Failed(e.to_failure()),
                    };
                    outcomes.push(outcome);
                    start += 1;
                    continue;
                }
                let end = items[start..]
                    .iter()
                    .position(|item| item.kind().is_barrier())
                    .map_or(items.len(), |offset| start + offset);
                outcomes.extend(self.bulk_documents(&items[start..end]).await?);
                start = end;
            }
            Ok(outcomes)
        })
    }
}
