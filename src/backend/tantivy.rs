//! Embedded Tantivy engine backend
//!
//! Documents are stored with three fields: `_id` (qualified document id),
//! `_tenant` (tenant id, absent for tenant-less documents) and `body`
//! (the UTF-8 payload, tokenized and stored). Writes go to a single shared
//! `IndexWriter`; they become durable on `commit` and visible on `refresh`.

use futures::future::BoxFuture;
use std::path::Path;
use tantivy::collector::{Count, TopDocs};
use tantivy::directory::MmapDirectory;
use tantivy::query::TermQuery;
use tantivy::schema::{Field, IndexRecordOption, STORED, STRING, Schema, TEXT, Value};
use tantivy::{Index, IndexReader, IndexWriter, ReloadPolicy, TantivyDocument, Term};
use tokio::sync::Mutex;

use super::IndexEngineBackend;
use crate::errors::BackendError;
use crate::work::{Payload, RoutingKey};

/// Writer heap budget used when none is given
pub const DEFAULT_WRITER_BUDGET: usize = 50_000_000;

#[derive(Clone, Copy)]
struct Fields {
    id: Field,
    tenant: Field,
    body: Field,
}

fn build_schema() -> (Schema, Fields) {
    let mut builder = Schema::builder();
    let id = builder.add_text_field("_id", STRING | STORED);
    let tenant = builder.add_text_field("_tenant", STRING);
    let body = builder.add_text_field("body", TEXT | STORED);
    (builder.build(), Fields { id, tenant, body })
}

pub struct TantivyBackend {
    reader: IndexReader,
    writer: Mutex<IndexWriter>,
    fields: Fields,
}

impl TantivyBackend {
    /// Backend over a RAM-only index
    pub fn in_memory() -> Result<Self, BackendError> {
        let (schema, fields) = build_schema();
        Self::from_index(Index::create_in_ram(schema), fields, DEFAULT_WRITER_BUDGET)
    }

    /// Backend over an on-disk index, created when the directory holds none
    pub fn open_in_dir(path: impl AsRef<Path>, writer_budget: usize) -> Result<Self, BackendError> {
        let path = path.as_ref();
        std::fs::create_dir_all(path)?;
        let (schema, fields) = build_schema();
        let directory = MmapDirectory::open(path)
            .map_err(|e| BackendError::Other(format!("Failed to open index directory {path:?}: {e}")))?;
        let index = Index::open_or_create(directory, schema)?;
        tracing::info!(path = %path.display(), "Opened tantivy index");
        Self::from_index(index, fields, writer_budget)
    }

    fn from_index(index: Index, fields: Fields, writer_budget: usize) -> Result<Self, BackendError> {
        let writer = index.writer_with_num_threads(1, writer_budget)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        Ok(Self {
            reader,
            writer: Mutex::new(writer),
            fields,
        })
    }

    /// Number of documents visible to readers
    #[must_use]
    pub fn document_count(&self) -> u64 {
        self.reader.searcher().num_docs()
    }

    /// Number of visible documents whose body contains `word`
    pub fn count_matching(&self, word: &str) -> Result<usize, BackendError> {
        let term = Term::from_field_text(self.fields.body, &word.to_lowercase());
        let query = TermQuery::new(term, IndexRecordOption::Basic);
        Ok(self.reader.searcher().search(&query, &Count)?)
    }

    /// Stored body of a visible document
    pub fn stored_body(
        &self,
        tenant_id: Option<&str>,
        document_id: &str,
    ) -> Result<Option<String>, BackendError> {
        let searcher = self.reader.searcher();
        let query = TermQuery::new(self.id_term(tenant_id, document_id), IndexRecordOption::Basic);
        let hits = searcher.search(&query, &TopDocs::with_limit(1))?;
        let Some((_, address)) = hits.into_iter().next() else {
            return Ok(None);
        };
        let doc: TantivyDocument = searcher.doc(address)?;
        Ok(doc
            .get_first(self.fields.body)
            .and_then(|v| v.as_str())
            .map(str::to_string))
    }

    fn id_term(&self, tenant_id: Option<&str>, document_id: &str) -> Term {
        let qualified = RoutingKey::new(tenant_id, document_id).qualified_id();
        Term::from_field_text(self.fields.id, &qualified)
    }

    fn document(
        &self,
        tenant_id: Option<&str>,
        document_id: &str,
        payload: &Payload,
    ) -> Result<TantivyDocument, BackendError> {
        let body = payload.as_str().ok_or_else(|| BackendError::Rejected {
            document_id: document_id.to_string(),
            reason: "payload is not valid UTF-8".to_string(),
        })?;
        let mut doc = TantivyDocument::default();
        doc.add_text(
            self.fields.id,
            RoutingKey::new(tenant_id, document_id).qualified_id(),
        );
        if let Some(tenant) = tenant_id {
            doc.add_text(self.fields.tenant, tenant);
        }
        doc.add_text(self.fields.body, body);
        Ok(doc)
    }
}

impl IndexEngineBackend for TantivyBackend {
    fn name(&self) -> &str {
        "tantivy"
    }

    fn apply_add<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
        document_id: &'a str,
        payload: &'a Payload,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let doc = self.document(tenant_id, document_id, payload)?;
            self.writer.lock().await.add_document(doc)?;
            Ok(())
        })
    }

    fn apply_update<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
        document_id: &'a str,
        payload: &'a Payload,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let doc = self.document(tenant_id, document_id, payload)?;
            let writer = self.writer.lock().await;
            writer.delete_term(self.id_term(tenant_id, document_id));
            writer.add_document(doc)?;
            Ok(())
        })
    }

    fn apply_delete<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
        document_id: &'a str,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            self.writer
                .lock()
                .await
                .delete_term(self.id_term(tenant_id, document_id));
            Ok(())
        })
    }

    fn apply_delete_all<'a>(
        &'a self,
        tenant_id: Option<&'a str>,
    ) -> BoxFuture<'a, Result<(), BackendError>> {
        Box::pin(async move {
            let writer = self.writer.lock().await;
            match tenant_id {
                Some(tenant) => {
                    writer.delete_term(Term::from_field_text(self.fields.tenant, tenant));
                }
                None => {
                    writer.delete_all_documents()?;
                }
            }
            Ok(())
        })
    }

    fn commit(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            let start = std::time::Instant::now();
            let mut writer = self.writer.lock().await;
            let opstamp = writer.prepare_commit()?.commit_future().await?;
            tracing::debug!(
                opstamp,
                duration_ms = start.elapsed().as_millis() as u64,
                "Tantivy commit completed"
            );
            Ok(())
        })
    }

    fn refresh(&self) -> BoxFuture<'_, Result<(), BackendError>> {
        Box::pin(async move {
            self.reader.reload()?;
            Ok(())
        })
    }

    fn reports_partial_failures(&self) -> bool {
        true
    }
}
