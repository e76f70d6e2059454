//! Immutable index work items and their routing keys

use imstr::ImString;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Fixed per-operation overhead added to byte estimates (action line, framing)
pub const WORK_OVERHEAD_BYTES: usize = 64;

/// Kind of index mutation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkKind {
    Add,
    Update,
    Delete,
    DeleteAll,
}

impl WorkKind {
    /// Whether the work carries a document payload
    #[inline]
    #[must_use]
    pub fn has_payload(self) -> bool {
        matches!(self, WorkKind::Add | WorkKind::Update)
    }

    /// Index-wide works order against every other work of the index
    #[inline]
    #[must_use]
    pub fn is_barrier(self) -> bool {
        matches!(self, WorkKind::DeleteAll)
    }
}

impl fmt::Display for WorkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            WorkKind::Add => "add",
            WorkKind::Update => "update",
            WorkKind::Delete => "delete",
            WorkKind::DeleteAll => "delete_all",
        };
        f.write_str(name)
    }
}

/// Opaque serialized document body, shared by reference across threads
#[derive(Clone, PartialEq, Eq)]
pub struct Payload(Arc<[u8]>);

impl Payload {
    #[inline]
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// The payload as UTF-8 text, if it is valid UTF-8
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.0).ok()
    }

    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.as_str() {
            Some(text) if text.len() <= 64 => write!(f, "Payload({text:?})"),
            _ => write!(f, "Payload({} bytes)", self.0.len()),
        }
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Payload(Arc::from(bytes))
    }
}

impl From<&[u8]> for Payload {
    fn from(bytes: &[u8]) -> Self {
        Payload(Arc::from(bytes))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Payload(Arc::from(text.into_bytes()))
    }
}

impl From<&str> for Payload {
    fn from(text: &str) -> Self {
        Payload(Arc::from(text.as_bytes()))
    }
}

/// Ordering identity of a document: `(tenant, document id)`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RoutingKey {
    tenant_id: Option<ImString>,
    document_id: ImString,
}

impl RoutingKey {
    #[must_use]
    pub fn new(tenant_id: Option<&str>, document_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.filter(|t| !t.is_empty()).map(ImString::from),
            document_id: ImString::from(document_id),
        }
    }

    #[inline]
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref()
    }

    #[inline]
    #[must_use]
    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Identifier used by engines: `{tenant}_{id}` for tenant documents
    ///
    /// `_` and `\` are escaped in the tenant and in tenant-less ids, so the
    /// first bare `_` always ends the tenant and no two keys share an id.
    #[must_use]
    pub fn qualified_id(&self) -> String {
        match &self.tenant_id {
            Some(tenant) => {
                let mut id = escape_separator(tenant);
                id.push('_');
                id.push_str(&self.document_id);
                id
            }
            None => escape_separator(&self.document_id),
        }
    }
}

fn escape_separator(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if c == '_' || c == '\\' {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

impl fmt::Display for RoutingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tenant_id {
            Some(tenant) => write!(f, "{tenant}/{}", self.document_id),
            None => write!(f, "{}", self.document_id),
        }
    }
}

/// A single immutable index mutation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkItem {
    index_name: ImString,
    key: RoutingKey,
    kind: WorkKind,
    payload: Option<Payload>,
}

impl WorkItem {
    fn new(
        index_name: impl Into<ImString>,
        document_id: impl Into<ImString>,
        kind: WorkKind,
        payload: Option<Payload>,
    ) -> Self {
        Self {
            index_name: index_name.into(),
            key: RoutingKey {
                tenant_id: None,
                document_id: document_id.into(),
            },
            kind,
            payload,
        }
    }

    /// Add a new document
    #[must_use]
    pub fn add(
        index_name: impl Into<ImString>,
        document_id: impl Into<ImString>,
        payload: impl Into<Payload>,
    ) -> Self {
        Self::new(index_name, document_id, WorkKind::Add, Some(payload.into()))
    }

    /// Replace an existing document
    #[must_use]
    pub fn update(
        index_name: impl Into<ImString>,
        document_id: impl Into<ImString>,
        payload: impl Into<Payload>,
    ) -> Self {
        Self::new(index_name, document_id, WorkKind::Update, Some(payload.into()))
    }

    /// Delete a document
    #[must_use]
    pub fn delete(index_name: impl Into<ImString>, document_id: impl Into<ImString>) -> Self {
        Self::new(index_name, document_id, WorkKind::Delete, None)
    }

    /// Delete every document of the index (of the tenant, when one is set)
    #[must_use]
    pub fn delete_all(index_name: impl Into<ImString>) -> Self {
        Self::new(index_name, "", WorkKind::DeleteAll, None)
    }

    /// Scope the work to a tenant
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<ImString>) -> Self {
        let tenant_id: ImString = tenant_id.into();
        self.key.tenant_id = if tenant_id.is_empty() {
            None
        } else {
            Some(tenant_id)
        };
        self
    }

    #[inline]
    #[must_use]
    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    #[inline]
    #[must_use]
    pub fn tenant_id(&self) -> Option<&str> {
        self.key.tenant_id()
    }

    #[inline]
    #[must_use]
    pub fn document_id(&self) -> &str {
        self.key.document_id()
    }

    #[inline]
    #[must_use]
    pub fn kind(&self) -> WorkKind {
        self.kind
    }

    #[inline]
    #[must_use]
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    #[inline]
    #[must_use]
    pub fn routing_key(&self) -> &RoutingKey {
        &self.key
    }

    /// Rough size of the work once serialized for the engine
    #[must_use]
    pub fn estimated_size(&self) -> usize {
        WORK_OVERHEAD_BYTES
            + self.key.document_id.len()
            + self.key.tenant_id.as_ref().map_or(0, |t| t.len())
            + self.payload.as_ref().map_or(0, Payload::len)
    }

    /// Merge a later same-key add/update into this one
    ///
    /// The later payload wins; the merged work is an update if either side is.
    /// Returns `None` when either side is not an add or update.
    pub(crate) fn coalesce(&self, later: &WorkItem) -> Option<WorkItem> {
        if !self.kind.has_payload() || !later.kind.has_payload() || self.key != later.key {
            return None;
        }
        let kind = if self.kind == WorkKind::Update || later.kind == WorkKind::Update {
            WorkKind::Update
        } else {
            WorkKind::Add
        };
        Some(WorkItem {
            index_name: later.index_name.clone(),
            key: later.key.clone(),
            kind,
            payload: later.payload.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constructors_enforce_payload_presence() {
        assert!(WorkItem::add("books", "1", "{}").payload().is_some());
        assert!(WorkItem::update("books", "1", "{}").payload().is_some());
        assert!(WorkItem::delete("books", "1").payload().is_none());
        assert!(WorkItem::delete_all("books").payload().is_none());
    }

    #[test]
    fn empty_tenant_means_no_tenant() {
        let item = WorkItem::delete("books", "1").with_tenant("");
        assert_eq!(item.tenant_id(), None);
        assert_eq!(item.routing_key().qualified_id(), "1");

        let item = WorkItem::delete("books", "1").with_tenant("acme");
        assert_eq!(item.routing_key().qualified_id(), "acme_1");
        assert_eq!(item.routing_key().to_string(), "acme/1");
    }

    #[test]
    fn engine_ids_do_not_collide_across_tenants() {
        let keys = [
            RoutingKey::new(Some("a_b"), "c"),
            RoutingKey::new(Some("a"), "b_c"),
            RoutingKey::new(None, "a_b_c"),
            RoutingKey::new(Some("a"), "1"),
            RoutingKey::new(None, "a_1"),
            RoutingKey::new(Some("a\\"), "1"),
            RoutingKey::new(None, "a\\_1"),
        ];
        let ids: ahash::AHashSet<String> = keys.iter().map(RoutingKey::qualified_id).collect();
        assert_eq!(ids.len(), keys.len());
        assert_eq!(RoutingKey::new(Some("a_b"), "c").qualified_id(), "a\\_b_c");
        assert_eq!(RoutingKey::new(None, "a_1").qualified_id(), "a\\_1");
        assert_eq!(RoutingKey::new(None, "42").qualified_id(), "42");
    }

    #[test]
    fn same_id_in_different_tenants_routes_separately() {
        let a = WorkItem::delete("books", "1").with_tenant("a");
        let b = WorkItem::delete("books", "1").with_tenant("b");
        assert_ne!(a.routing_key(), b.routing_key());
    }

    #[test]
    fn coalesce_keeps_latest_payload_and_never_merges_deletes() {
        let add = WorkItem::add("books", "1", "A");
        let update = WorkItem::update("books", "1", "B");
        let merged = add.coalesce(&update).expect("add+update merge");
        assert_eq!(merged.kind(), WorkKind::Update);
        assert_eq!(merged.payload().and_then(Payload::as_str), Some("B"));

        let delete = WorkItem::delete("books", "1");
        assert!(add.coalesce(&delete).is_none());
        assert!(delete.coalesce(&add).is_none());
        assert!(add.coalesce(&WorkItem::add("books", "2", "C")).is_none());
    }

    #[test]
    fn estimated_size_counts_payload_and_ids() {
        let item = WorkItem::add("books", "42", "0123456789").with_tenant("t");
        assert_eq!(item.estimated_size(), WORK_OVERHEAD_BYTES + 2 + 1 + 10);
    }
}
