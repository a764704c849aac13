//! LMDB-backed document store.
//!
//! Uses the heed crate (Rust bindings for LMDB) to keep tenant documents in
//! a memory-mapped, durable key-value store.
//!
//! # Layout
//!
//! Three named databases live in one environment:
//! - `meta`: schema objects (`collection/<name>`, `index/<name>`) and the
//!   document reference sequence
//! - `docs`: `[collection][0x00][ref: 8 bytes BE]` -> `[ts millis: 8 bytes LE][json]`
//! - `terms`: `[index][0x00][term]` -> `[ref: 8 bytes BE]`
//!
//! Big-endian references keep a collection's documents in insertion order,
//! so pagination is a range scan from the cursor.
//!
//! # Atomicity
//!
//! Every mutating operation, including the lookup half of an upsert, runs
//! inside a single LMDB write transaction. LMDB admits one writer at a time,
//! which makes `upsert_by_term` atomic against all other writers.

use std::ops::Bound;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use guildsync_core::{SettingsConfig, StoreError};
use heed::types::Bytes;
use heed::{Database, Env, EnvOpenOptions, RoTxn, RwTxn};
use serde::{Deserialize, Serialize};

use crate::document::{
    ensure_term, index_term, DocRef, Document, DocumentStore, Page, StoreResult, StoredDocument, UpsertOutcome,
};

const SEPARATOR: u8 = 0x00;
const SEQUENCE_KEY: &[u8] = b"seq";
const COLLECTION_PREFIX: &str = "collection/";
const INDEX_PREFIX: &str = "index/";

/// Error type for LMDB store operations.
#[derive(Debug, thiserror::Error)]
pub enum LmdbStoreError {
    /// Failed to open or create the LMDB environment.
    #[error("Failed to open LMDB environment: {0}")]
    EnvOpen(String),

    /// Failed to open a database within the environment.
    #[error("Failed to open database: {0}")]
    DbOpen(String),

    /// Transaction error.
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// Stored bytes could not be decoded.
    #[error("Corrupt record: {0}")]
    Corrupt(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<LmdbStoreError> for StoreError {
    fn from(e: LmdbStoreError) -> Self {
        StoreError::Backend {
            reason: e.to_string(),
        }
    }
}

impl From<heed::Error> for LmdbStoreError {
    fn from(e: heed::Error) -> Self {
        LmdbStoreError::Transaction(e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct IndexMeta {
    collection: String,
    field: String,
}

/// LMDB-backed [`DocumentStore`].
///
/// # Example
///
/// ```ignore
/// let store = LmdbDocumentStore::open("/var/lib/guildsync", 64)?;
/// store.create_collection("guilds").await?;
/// ```
#[derive(Clone)]
pub struct LmdbDocumentStore {
    env: Env,
    meta: Database<Bytes, Bytes>,
    docs: Database<Bytes, Bytes>,
    terms: Database<Bytes, Bytes>,
}

impl LmdbDocumentStore {
    /// Open (or create) an environment under `path`.
    ///
    /// # Arguments
    ///
    /// * `path` - Directory where LMDB files will be stored
    /// * `max_size_mb` - Maximum size of the map in megabytes
    pub fn open<P: AsRef<Path>>(path: P, max_size_mb: usize) -> Result<Self, LmdbStoreError> {
        std::fs::create_dir_all(&path)?;

        // SAFETY: the environment directory is owned by this store; no other
        // mapping of the same files is opened with different flags.
        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(max_size_mb * 1024 * 1024)
                .max_dbs(3)
                .open(path.as_ref())
        }
        .map_err(|e| LmdbStoreError::EnvOpen(e.to_string()))?;

        let mut wtxn = env.write_txn()?;
        let meta = env
            .create_database(&mut wtxn, Some("meta"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let docs = env
            .create_database(&mut wtxn, Some("docs"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        let terms = env
            .create_database(&mut wtxn, Some("terms"))
            .map_err(|e| LmdbStoreError::DbOpen(e.to_string()))?;
        wtxn.commit()?;

        Ok(Self {
            env,
            meta,
            docs,
            terms,
        })
    }

    /// Open the environment named by `lmdb_path` in `config`.
    pub fn from_config(config: &SettingsConfig) -> Result<Self, LmdbStoreError> {
        let path = config
            .lmdb_path
            .as_ref()
            .ok_or_else(|| LmdbStoreError::EnvOpen("lmdb_path is not configured".to_string()))?;
        Self::open(path, config.lmdb_map_size_mb)
    }

    fn read_txn(&self) -> Result<RoTxn<'_>, LmdbStoreError> {
        Ok(self.env.read_txn()?)
    }

    fn write_txn(&self) -> Result<RwTxn<'_>, LmdbStoreError> {
        Ok(self.env.write_txn()?)
    }

    fn collection_exists_in(&self, txn: &RoTxn, collection: &str) -> Result<bool, LmdbStoreError> {
        let key = format!("{COLLECTION_PREFIX}{collection}");
        Ok(self.meta.get(txn, key.as_bytes())?.is_some())
    }

    fn require_collection(&self, txn: &RoTxn, collection: &str) -> StoreResult<()> {
        if self.collection_exists_in(txn, collection)? {
            Ok(())
        } else {
            Err(StoreError::CollectionMissing {
                collection: collection.to_string(),
            })
        }
    }

    fn index_meta(&self, txn: &RoTxn, index: &str) -> Result<Option<IndexMeta>, LmdbStoreError> {
        let key = format!("{INDEX_PREFIX}{index}");
        match self.meta.get(txn, key.as_bytes())? {
            Some(bytes) => serde_json::from_slice(bytes)
                .map(Some)
                .map_err(|e| LmdbStoreError::Corrupt(e.to_string())),
            None => Ok(None),
        }
    }

    /// Every index defined over `collection`, by name.
    fn indexes_for(&self, txn: &RoTxn, collection: &str) -> Result<Vec<(String, IndexMeta)>, LmdbStoreError> {
        let mut found = Vec::new();
        for entry in self.meta.prefix_iter(txn, INDEX_PREFIX.as_bytes())? {
            let (key, value) = entry?;
            let meta: IndexMeta =
                serde_json::from_slice(value).map_err(|e| LmdbStoreError::Corrupt(e.to_string()))?;
            if meta.collection == collection {
                let name = String::from_utf8_lossy(&key[INDEX_PREFIX.len()..]).into_owned();
                found.push((name, meta));
            }
        }
        Ok(found)
    }

    fn next_ref(&self, wtxn: &mut RwTxn) -> Result<DocRef, LmdbStoreError> {
        let current = match self.meta.get(wtxn, SEQUENCE_KEY)? {
            Some(bytes) => decode_ref(bytes)?,
            None => 0,
        };
        let next = current + 1;
        self.meta.put(wtxn, SEQUENCE_KEY, &next.to_be_bytes())?;
        Ok(next)
    }

    fn load_doc(&self, txn: &RoTxn, collection: &str, doc_ref: DocRef) -> Result<Option<StoredDocument>, LmdbStoreError> {
        match self.docs.get(txn, &doc_key(collection, doc_ref))? {
            Some(bytes) => decode_doc(doc_ref, bytes).map(Some),
            None => Ok(None),
        }
    }

    /// Write a payload and keep every index over the collection in step.
    fn write_doc(
        &self,
        wtxn: &mut RwTxn,
        collection: &str,
        doc_ref: DocRef,
        previous: Option<&Document>,
        data: &Document,
    ) -> Result<(), LmdbStoreError> {
        self.docs
            .put(wtxn, &doc_key(collection, doc_ref), &encode_doc(Utc::now(), data)?)?;
        self.reindex(wtxn, collection, doc_ref, previous, Some(data))
    }

    fn reindex(
        &self,
        wtxn: &mut RwTxn,
        collection: &str,
        doc_ref: DocRef,
        previous: Option<&Document>,
        current: Option<&Document>,
    ) -> Result<(), LmdbStoreError> {
        for (name, meta) in self.indexes_for(wtxn, collection)? {
            if let Some(old) = previous.and_then(|d| d.get(&meta.field)) {
                let key = term_key(&name, &index_term(old));
                let points_here = match self.terms.get(wtxn, &key)? {
                    Some(bytes) => decode_ref(bytes)? == doc_ref,
                    None => false,
                };
                if points_here {
                    self.terms.delete(wtxn, &key)?;
                }
            }
            if let Some(new) = current.and_then(|d| d.get(&meta.field)) {
                self.terms
                    .put(wtxn, &term_key(&name, &index_term(new)), &doc_ref.to_be_bytes())?;
            }
        }
        Ok(())
    }

    fn lookup_term(&self, txn: &RoTxn, index: &str, term: &str) -> Result<Option<DocRef>, LmdbStoreError> {
        match self.terms.get(txn, &term_key(index, term))? {
            Some(bytes) => decode_ref(bytes).map(Some),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl DocumentStore for LmdbDocumentStore {
    async fn collection_exists(&self, collection: &str) -> StoreResult<bool> {
        let rtxn = self.read_txn()?;
        Ok(self.collection_exists_in(&rtxn, collection)?)
    }

    async fn create_collection(&self, collection: &str) -> StoreResult<()> {
        let mut wtxn = self.write_txn()?;
        let key = format!("{COLLECTION_PREFIX}{collection}");
        self.meta
            .put(&mut wtxn, key.as_bytes(), b"1")
            .map_err(LmdbStoreError::from)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(())
    }

    async fn index_exists(&self, index: &str) -> StoreResult<bool> {
        let rtxn = self.read_txn()?;
        Ok(self.index_meta(&rtxn, index)?.is_some())
    }

    async fn create_index(&self, index: &str, collection: &str, field: &str) -> StoreResult<()> {
        let mut wtxn = self.write_txn()?;
        if self.index_meta(&wtxn, index)?.is_some() {
            return Ok(());
        }
        self.require_collection(&wtxn, collection)?;

        let meta = IndexMeta {
            collection: collection.to_string(),
            field: field.to_string(),
        };
        let encoded = serde_json::to_vec(&meta).map_err(|e| StoreError::Serialization {
            reason: e.to_string(),
        })?;
        let key = format!("{INDEX_PREFIX}{index}");
        self.meta
            .put(&mut wtxn, key.as_bytes(), &encoded)
            .map_err(LmdbStoreError::from)?;

        // Backfill terms for documents written before the index existed.
        let prefix = collection_prefix(collection);
        let mut backfill = Vec::new();
        for entry in self.docs.prefix_iter(&wtxn, &prefix).map_err(LmdbStoreError::from)? {
            let (key, value) = entry.map_err(LmdbStoreError::from)?;
            let doc_ref = decode_ref(&key[prefix.len()..])?;
            let stored = decode_doc(doc_ref, value)?;
            if let Some(v) = stored.data.get(field) {
                backfill.push((index_term(v), doc_ref));
            }
        }
        for (term, doc_ref) in backfill {
            self.terms
                .put(&mut wtxn, &term_key(index, &term), &doc_ref.to_be_bytes())
                .map_err(LmdbStoreError::from)?;
        }

        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(())
    }

    async fn list_page(
        &self,
        collection: &str,
        after: Option<DocRef>,
        size: usize,
    ) -> StoreResult<Page> {
        let rtxn = self.read_txn()?;
        self.require_collection(&rtxn, collection)?;

        let prefix = collection_prefix(collection);
        let start = doc_key(collection, after.map_or(0, |r| r.saturating_add(1)));
        let bounds: (Bound<&[u8]>, Bound<&[u8]>) = (Bound::Included(start.as_slice()), Bound::Unbounded);

        let mut documents = Vec::with_capacity(size);
        let mut has_more = false;
        for entry in self.docs.range(&rtxn, &bounds).map_err(LmdbStoreError::from)? {
            let (key, value) = entry.map_err(LmdbStoreError::from)?;
            if !key.starts_with(&prefix) {
                break;
            }
            if documents.len() == size {
                has_more = true;
                break;
            }
            let doc_ref = decode_ref(&key[prefix.len()..])?;
            documents.push(decode_doc(doc_ref, value)?);
        }

        let after = if has_more {
            documents.last().map(|d: &StoredDocument| d.doc_ref)
        } else {
            None
        };
        Ok(Page { documents, after })
    }

    async fn find_by_term(&self, index: &str, term: &str) -> StoreResult<Option<StoredDocument>> {
        let rtxn = self.read_txn()?;
        let meta = self
            .index_meta(&rtxn, index)?
            .ok_or_else(|| StoreError::IndexMissing {
                index: index.to_string(),
            })?;
        match self.lookup_term(&rtxn, index, term)? {
            Some(doc_ref) => Ok(self.load_doc(&rtxn, &meta.collection, doc_ref)?),
            None => Ok(None),
        }
    }

    async fn create(&self, collection: &str, data: Document) -> StoreResult<DocRef> {
        let mut wtxn = self.write_txn()?;
        self.require_collection(&wtxn, collection)?;
        let doc_ref = self.next_ref(&mut wtxn)?;
        self.write_doc(&mut wtxn, collection, doc_ref, None, &data)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(doc_ref)
    }

    async fn update(&self, collection: &str, doc_ref: DocRef, data: Document) -> StoreResult<()> {
        let mut wtxn = self.write_txn()?;
        let previous = self
            .load_doc(&wtxn, collection, doc_ref)?
            .ok_or_else(|| StoreError::DocumentNotFound {
                collection: collection.to_string(),
                doc_ref,
            })?;
        self.write_doc(&mut wtxn, collection, doc_ref, Some(&previous.data), &data)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(())
    }

    async fn delete(&self, collection: &str, doc_ref: DocRef) -> StoreResult<bool> {
        let mut wtxn = self.write_txn()?;
        let Some(previous) = self.load_doc(&wtxn, collection, doc_ref)? else {
            return Ok(false);
        };
        self.docs
            .delete(&mut wtxn, &doc_key(collection, doc_ref))
            .map_err(LmdbStoreError::from)?;
        self.reindex(&mut wtxn, collection, doc_ref, Some(&previous.data), None)?;
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(true)
    }

    async fn upsert_by_term(
        &self,
        index: &str,
        collection: &str,
        term: &str,
        data: Document,
    ) -> StoreResult<UpsertOutcome> {
        let mut wtxn = self.write_txn()?;
        let Some(meta) = self.index_meta(&wtxn, index)? else {
            return Err(StoreError::IndexMissing {
                index: index.to_string(),
            });
        };
        ensure_term(&meta.field, term, &data)?;
        self.require_collection(&wtxn, collection)?;

        let existing = match self.lookup_term(&wtxn, index, term)? {
            Some(doc_ref) => self
                .load_doc(&wtxn, collection, doc_ref)?
                .map(|doc| (doc_ref, doc)),
            None => None,
        };

        let outcome = match existing {
            Some((doc_ref, previous)) => {
                self.write_doc(&mut wtxn, collection, doc_ref, Some(&previous.data), &data)?;
                UpsertOutcome::Updated(doc_ref)
            }
            None => {
                let doc_ref = self.next_ref(&mut wtxn)?;
                self.write_doc(&mut wtxn, collection, doc_ref, None, &data)?;
                UpsertOutcome::Created(doc_ref)
            }
        };
        wtxn.commit().map_err(LmdbStoreError::from)?;
        Ok(outcome)
    }
}

fn collection_prefix(collection: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(collection.len() + 1);
    key.extend_from_slice(collection.as_bytes());
    key.push(SEPARATOR);
    key
}

fn doc_key(collection: &str, doc_ref: DocRef) -> Vec<u8> {
    let mut key = collection_prefix(collection);
    key.extend_from_slice(&doc_ref.to_be_bytes());
    key
}

fn term_key(index: &str, term: &str) -> Vec<u8> {
    let mut key = Vec::with_capacity(index.len() + 1 + term.len());
    key.extend_from_slice(index.as_bytes());
    key.push(SEPARATOR);
    key.extend_from_slice(term.as_bytes());
    key
}

fn decode_ref(bytes: &[u8]) -> Result<DocRef, LmdbStoreError> {
    let raw: [u8; 8] = bytes
        .try_into()
        .map_err(|_| LmdbStoreError::Corrupt("reference is not 8 bytes".into()))?;
    Ok(u64::from_be_bytes(raw))
}

/// Format: [timestamp millis: 8 bytes LE][json payload]
fn encode_doc(ts: DateTime<Utc>, data: &Document) -> Result<Vec<u8>, LmdbStoreError> {
    let json = serde_json::to_vec(data).map_err(|e| LmdbStoreError::Corrupt(e.to_string()))?;
    let mut bytes = Vec::with_capacity(8 + json.len());
    bytes.extend_from_slice(&ts.timestamp_millis().to_le_bytes());
    bytes.extend_from_slice(&json);
    Ok(bytes)
}

fn decode_doc(doc_ref: DocRef, bytes: &[u8]) -> Result<StoredDocument, LmdbStoreError> {
    if bytes.len() < 8 {
        return Err(LmdbStoreError::Corrupt(format!(
            "document {doc_ref} is truncated"
        )));
    }
    let ts_bytes: [u8; 8] = bytes[0..8]
        .try_into()
        .map_err(|_| LmdbStoreError::Corrupt("invalid timestamp".into()))?;
    let ts = DateTime::from_timestamp_millis(i64::from_le_bytes(ts_bytes)).unwrap_or_else(Utc::now);
    let data: Document =
        serde_json::from_slice(&bytes[8..]).map_err(|e| LmdbStoreError::Corrupt(e.to_string()))?;
    Ok(StoredDocument { doc_ref, ts, data })
}
