//! Document store contract.
//!
//! The settings cache persists through an external document store. This
//! trait names the operations it needs, abstractly: schema checks and
//! creation, paginated listing, lookup through an index, and CRUD. Any
//! backend (LMDB, a hosted document database, the in-memory store used by
//! tests) plugs in by implementing it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guildsync_core::StoreError;

/// JSON object payload of a document.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// Store-assigned reference of a document, unique within its collection.
pub type DocRef = u64;

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// A document together with its store metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredDocument {
    /// Store-assigned reference.
    pub doc_ref: DocRef,
    /// Last time the payload was written.
    pub ts: DateTime<Utc>,
    /// The payload.
    pub data: Document,
}

/// One page of a collection listing.
#[derive(Debug, Clone, Default)]
pub struct Page {
    /// Documents in ascending reference order.
    pub documents: Vec<StoredDocument>,
    /// Cursor for the next page; `None` on the last page.
    pub after: Option<DocRef>,
}

/// Result of an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created(DocRef),
    Updated(DocRef),
}

impl UpsertOutcome {
    pub fn doc_ref(&self) -> DocRef {
        match self {
            Self::Created(r) | Self::Updated(r) => *r,
        }
    }
}

/// Document store operations required by the settings persistence layer.
///
/// Index terms are strings; the caller decides how a field value is
/// rendered into a term and must do so consistently.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Check whether a collection exists.
    async fn collection_exists(&self, collection: &str) -> StoreResult<bool>;

    /// Create a collection. Creating an existing collection is a no-op.
    async fn create_collection(&self, collection: &str) -> StoreResult<()>;

    /// Check whether an index exists.
    async fn index_exists(&self, index: &str) -> StoreResult<bool>;

    /// Create an index over `field` of every document in `collection`.
    /// Creating an existing index is a no-op.
    async fn create_index(&self, index: &str, collection: &str, field: &str) -> StoreResult<()>;

    /// List up to `size` documents with a reference greater than `after`.
    async fn list_page(
        &self,
        collection: &str,
        after: Option<DocRef>,
        size: usize,
    ) -> StoreResult<Page>;

    /// Find the document whose indexed field renders to `term`.
    async fn find_by_term(&self, index: &str, term: &str) -> StoreResult<Option<StoredDocument>>;

    /// Insert a new document.
    async fn create(&self, collection: &str, data: Document) -> StoreResult<DocRef>;

    /// Replace the payload of an existing document.
    async fn update(&self, collection: &str, doc_ref: DocRef, data: Document) -> StoreResult<()>;

    /// Delete a document. Returns whether it existed.
    async fn delete(&self, collection: &str, doc_ref: DocRef) -> StoreResult<bool>;

    /// Replace the payload of the document matching `term`, or create one.
    ///
    /// Implementations MUST perform the lookup and the write as one atomic
    /// step with respect to every other writer of the store. A payload whose
    /// indexed field does not render to `term` is refused with
    /// [`StoreError::InvalidDocument`].
    async fn upsert_by_term(
        &self,
        index: &str,
        collection: &str,
        term: &str,
        data: Document,
    ) -> StoreResult<UpsertOutcome>;
}

/// Render a field value into an index term.
pub fn index_term(value: &serde_json::Value) -> String {
    value.to_string()
}

/// Check that `data` is indexed under `term` through `field`.
pub(crate) fn ensure_term(field: &str, term: &str, data: &Document) -> StoreResult<()> {
    match data.get(field).map(index_term) {
        Some(found) if found == term => Ok(()),
        found => Err(StoreError::InvalidDocument {
            reason: format!(
                "field {field:?} indexes as {} but the upsert targets {term}",
                found.as_deref().unwrap_or("nothing")
            ),
        }),
    }
}
