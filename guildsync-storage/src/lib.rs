//! guildsync Storage - Persistence Adapter and Settings Cache
//!
//! This crate provides:
//! - The abstract [`DocumentStore`] contract the settings layer persists through
//! - [`InMemoryDocumentStore`] for tests and single-process deployments
//! - [`LmdbDocumentStore`], a durable backend built on heed
//! - [`SettingsRepository`], tenant-level CRUD with paginated loading
//! - [`SettingsCache`], the write-through resident cache

pub mod cache;
pub mod document;
pub mod lmdb;
pub mod memory;
pub mod repository;

pub use cache::{SettingsCache, TenantLocks};
pub use document::{
    index_term, DocRef, Document, DocumentStore, Page, StoreResult, StoredDocument, UpsertOutcome,
};
pub use lmdb::{LmdbDocumentStore, LmdbStoreError};
pub use memory::InMemoryDocumentStore;
pub use repository::SettingsRepository;
