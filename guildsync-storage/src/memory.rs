//! In-memory document store.
//!
//! Keeps every collection in process memory behind a single `RwLock`, so
//! each operation, upsert included, is atomic. Used by tests and by hosts
//! that do not need durability. Write counters and injected failures let
//! tests observe exactly which operations reached the store.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use chrono::Utc;
use guildsync_core::StoreError;

use crate::document::{
    ensure_term, index_term, DocRef, Document, DocumentStore, Page, StoreResult, StoredDocument, UpsertOutcome,
};

#[derive(Debug, Clone)]
struct IndexDef {
    collection: String,
    field: String,
    /// term -> document reference
    terms: HashMap<String, DocRef>,
}

#[derive(Debug, Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<DocRef, StoredDocument>>,
    indexes: HashMap<String, IndexDef>,
    next_ref: DocRef,
}

impl Inner {
    fn allocate_ref(&mut self) -> DocRef {
        self.next_ref += 1;
        self.next_ref
    }

    fn collection_mut(&mut self, collection: &str) -> StoreResult<&mut BTreeMap<DocRef, StoredDocument>> {
        self.collections
            .get_mut(collection)
            .ok_or_else(|| StoreError::CollectionMissing {
                collection: collection.to_string(),
            })
    }

    /// Drop index entries pointing at `doc_ref` and add entries for `data`.
    fn reindex(&mut self, collection: &str, doc_ref: DocRef, data: Option<&Document>) {
        for index in self.indexes.values_mut() {
            if index.collection != collection {
                continue;
            }
            index.terms.retain(|_, r| *r != doc_ref);
            if let Some(value) = data.and_then(|d| d.get(&index.field)) {
                index.terms.insert(index_term(value), doc_ref);
            }
        }
    }

    fn insert_document(&mut self, collection: &str, data: Document) -> StoreResult<DocRef> {
        let doc_ref = self.allocate_ref();
        let stored = StoredDocument {
            doc_ref,
            ts: Utc::now(),
            data,
        };
        self.collection_mut(collection)?.insert(doc_ref, stored.clone());
        self.reindex(collection, doc_ref, Some(&stored.data));
        Ok(doc_ref)
    }

    fn replace_document(&mut self, collection: &str, doc_ref: DocRef, data: Document) -> StoreResult<()> {
        let docs = self.collection_mut(collection)?;
        let doc = docs
            .get_mut(&doc_ref)
            .ok_or_else(|| StoreError::DocumentNotFound {
                collection: collection.to_string(),
                doc_ref,
            })?;
        doc.data = data.clone();
        doc.ts = Utc::now();
        self.reindex(collection, doc_ref, Some(&data));
        Ok(())
    }
}

/// In-memory [`DocumentStore`].
#[derive(Debug, Default, Clone)]
pub struct InMemoryDocumentStore {
    inner: Arc<RwLock<Inner>>,
    writes: Arc<AtomicU64>,
    list_calls: Arc<AtomicU64>,
    pending_failures: Arc<AtomicUsize>,
}

impl InMemoryDocumentStore {
    /// Create an empty store with no collections.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful create/update/delete/upsert operations.
    pub fn write_count(&self) -> u64 {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of `list_page` calls served.
    pub fn list_calls(&self) -> u64 {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Make the next `count` write operations fail with a backend error.
    pub fn fail_next_writes(&self, count: usize) {
        self.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Snapshot of every payload in a collection, in reference order.
    pub fn documents(&self, collection: &str) -> Vec<Document> {
        self.read()
            .ok()
            .and_then(|inner| {
                inner
                    .collections
                    .get(collection)
                    .map(|docs| docs.values().map(|d| d.data.clone()).collect())
            })
            .unwrap_or_default()
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Inner>> {
        self.inner.read().map_err(|_| StoreError::LockPoisoned)
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Inner>> {
        self.inner.write().map_err(|_| StoreError::LockPoisoned)
    }

    fn check_injected_failure(&self) -> StoreResult<()> {
        let consumed = self
            .pending_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if consumed.is_ok() {
            return Err(StoreError::Backend {
                reason: "injected write failure".to_string(),
            });
        }
        Ok(())
    }

    fn record_write(&self) {
        self.writes.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl DocumentStore for InMemoryDocumentStore {
    async fn collection_exists(&self, collection: &str) -> StoreResult<bool> {
        Ok(self.read()?.collections.contains_key(collection))
    }

    async fn create_collection(&self, collection: &str) -> StoreResult<()> {
        self.write()?
            .collections
            .entry(collection.to_string())
            .or_default();
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> StoreResult<bool> {
        Ok(self.read()?.indexes.contains_key(index))
    }

    async fn create_index(&self, index: &str, collection: &str, field: &str) -> StoreResult<()> {
        let mut inner = self.write()?;
        if inner.indexes.contains_key(index) {
            return Ok(());
        }
        let docs = inner
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionMissing {
                collection: collection.to_string(),
            })?;
        let terms = docs
            .values()
            .filter_map(|d| d.data.get(field).map(|v| (index_term(v), d.doc_ref)))
            .collect();
        inner.indexes.insert(
            index.to_string(),
            IndexDef {
                collection: collection.to_string(),
                field: field.to_string(),
                terms,
            },
        );
        Ok(())
    }

    async fn list_page(
        &self,
        collection: &str,
        after: Option<DocRef>,
        size: usize,
    ) -> StoreResult<Page> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let inner = self.read()?;
        let docs = inner
            .collections
            .get(collection)
            .ok_or_else(|| StoreError::CollectionMissing {
                collection: collection.to_string(),
            })?;

        let start = after.map_or(0, |r| r.saturating_add(1));
        let mut range = docs.range(start..);
        let documents: Vec<StoredDocument> =
            range.by_ref().take(size).map(|(_, d)| d.clone()).collect();
        let after = match (documents.last(), range.next()) {
            (Some(last), Some(_)) => Some(last.doc_ref),
            _ => None,
        };
        Ok(Page { documents, after })
    }

    async fn find_by_term(&self, index: &str, term: &str) -> StoreResult<Option<StoredDocument>> {
        let inner = self.read()?;
        let def = inner
            .indexes
            .get(index)
            .ok_or_else(|| StoreError::IndexMissing {
                index: index.to_string(),
            })?;
        Ok(def.terms.get(term).and_then(|doc_ref| {
            inner
                .collections
                .get(&def.collection)
                .and_then(|docs| docs.get(doc_ref))
                .cloned()
        }))
    }

    async fn create(&self, collection: &str, data: Document) -> StoreResult<DocRef> {
        self.check_injected_failure()?;
        let doc_ref = self.write()?.insert_document(collection, data)?;
        self.record_write();
        Ok(doc_ref)
    }

    async fn update(&self, collection: &str, doc_ref: DocRef, data: Document) -> StoreResult<()> {
        self.check_injected_failure()?;
        self.write()?.replace_document(collection, doc_ref, data)?;
        self.record_write();
        Ok(())
    }

    async fn delete(&self, collection: &str, doc_ref: DocRef) -> StoreResult<bool> {
        self.check_injected_failure()?;
        let mut inner = self.write()?;
        let existed = inner.collection_mut(collection)?.remove(&doc_ref).is_some();
        if existed {
            inner.reindex(collection, doc_ref, None);
            drop(inner);
            self.record_write();
        }
        Ok(existed)
    }

    async fn upsert_by_term(
        &self,
        index: &str,
        collection: &str,
        term: &str,
        data: Document,
    ) -> StoreResult<UpsertOutcome> {
        self.check_injected_failure()?;
        let mut inner = self.write()?;
        let def = inner
            .indexes
            .get(index)
            .ok_or_else(|| StoreError::IndexMissing {
                index: index.to_string(),
            })?;
        ensure_term(&def.field, term, &data)?;
        let existing = def.terms.get(term).copied();

        let outcome = match existing {
            Some(doc_ref) => {
                inner.replace_document(collection, doc_ref, data)?;
                UpsertOutcome::Updated(doc_ref)
            }
            None => UpsertOutcome::Created(inner.insert_document(collection, data)?),
        };
        drop(inner);
        self.record_write();
        Ok(outcome)
    }
}
