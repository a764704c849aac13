//! Persistence adapter between tenant records and the document store.
//!
//! One document per tenant, `{ id: <storage id>, <key>: <value>, ... }`,
//! found through an index on `id`. The global tenant is stored under the
//! sentinel identifier.

use std::sync::Arc;

use futures_util::stream::{self, Stream, TryStreamExt};
use guildsync_core::{
    SettingsConfig, SettingsError, SettingsRecord, SettingsResult, TenantId, ID_FIELD,
};
use tracing::{debug, info};

use crate::document::{DocRef, DocumentStore, StoreResult, UpsertOutcome};

/// Tenant-level CRUD over a [`DocumentStore`].
///
/// Performs no retries. Every store error reaches the caller.
pub struct SettingsRepository<S: DocumentStore> {
    store: Arc<S>,
    collection: String,
    index: String,
    page_size: usize,
}

impl<S: DocumentStore> SettingsRepository<S> {
    pub fn new(store: Arc<S>, config: &SettingsConfig) -> Self {
        Self {
            store,
            collection: config.collection.clone(),
            index: config.index.clone(),
            page_size: config.page_size.max(1),
        }
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// Create the collection and the `id` index when missing.
    ///
    /// Safe to call on every startup.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        if !self.store.collection_exists(&self.collection).await? {
            self.store.create_collection(&self.collection).await?;
            info!(collection = %self.collection, "Created settings collection");
        }
        if !self.store.index_exists(&self.index).await? {
            self.store
                .create_index(&self.index, &self.collection, ID_FIELD)
                .await?;
            info!(index = %self.index, collection = %self.collection, "Created settings index");
        }
        Ok(())
    }

    /// Every persisted tenant record, fetched a page at a time as the
    /// stream is polled.
    ///
    /// A document whose `id` is not a valid storage identifier ends the
    /// stream with [`SettingsError::Config`].
    pub fn load_all(
        &self,
    ) -> impl Stream<Item = SettingsResult<(TenantId, SettingsRecord)>> + Send + '_ {
        let pages = stream::try_unfold(Some(None), move |cursor: Option<Option<DocRef>>| async move {
            let Some(after) = cursor else {
                return Ok::<_, SettingsError>(None);
            };
            let page = self
                .store
                .list_page(&self.collection, after, self.page_size)
                .await?;
            debug!(
                collection = %self.collection,
                documents = page.documents.len(),
                more = page.after.is_some(),
                "Fetched settings page"
            );
            let next = page.after.map(Some);
            Ok(Some((page.documents, next)))
        });

        pages
            .map_ok(|documents| {
                stream::iter(documents.into_iter().map(|doc| {
                    let (id, record) = SettingsRecord::from_document(doc.data)?;
                    Ok::<_, SettingsError>((id.tenant(), record))
                }))
            })
            .try_flatten()
    }

    /// Fetch one tenant's persisted record.
    pub async fn fetch(&self, tenant: &TenantId) -> SettingsResult<Option<SettingsRecord>> {
        let term = tenant.storage_id().index_term();
        match self.store.find_by_term(&self.index, &term).await? {
            Some(doc) => Ok(Some(SettingsRecord::from_document(doc.data)?.1)),
            None => Ok(None),
        }
    }

    /// Replace the tenant's persisted payload, creating the document if it
    /// does not exist yet. One atomic store operation.
    pub async fn upsert(
        &self,
        tenant: &TenantId,
        record: &SettingsRecord,
    ) -> StoreResult<UpsertOutcome> {
        let id = tenant.storage_id();
        let outcome = self
            .store
            .upsert_by_term(
                &self.index,
                &self.collection,
                &id.index_term(),
                record.to_document(&id),
            )
            .await?;
        debug!(tenant = %tenant, outcome = ?outcome, keys = record.len(), "Persisted settings");
        Ok(outcome)
    }

    /// Delete the tenant's document. Absent is not an error.
    pub async fn remove(&self, tenant: &TenantId) -> StoreResult<bool> {
        let term = tenant.storage_id().index_term();
        let Some(doc) = self.store.find_by_term(&self.index, &term).await? else {
            return Ok(false);
        };
        let removed = self.store.delete(&self.collection, doc.doc_ref).await?;
        debug!(tenant = %tenant, removed, "Deleted settings document");
        Ok(removed)
    }
}
