//! Error types for guildsync operations

use thiserror::Error;

/// Document store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Collection does not exist: {collection}")]
    CollectionMissing { collection: String },

    #[error("Index does not exist: {index}")]
    IndexMissing { index: String },

    #[error("Document {doc_ref} not found in {collection}")]
    DocumentNotFound { collection: String, doc_ref: u64 },

    #[error("Store backend failure: {reason}")]
    Backend { reason: String },

    #[error("Serialization failed: {reason}")]
    Serialization { reason: String },

    #[error("Invalid document: {reason}")]
    InvalidDocument { reason: String },

    #[error("Store lock poisoned")]
    LockPoisoned,
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid tenant identifier {value}: {reason}")]
    InvalidTenantId { value: String, reason: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Failed to read config file: {reason}")]
    Io { reason: String },

    #[error("Failed to parse config TOML: {reason}")]
    Parse { reason: String },
}

/// Cross-shard broadcast errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ShardError {
    #[error("Failed to serialize shard message: {reason}")]
    Serialization { reason: String },

    #[error("Failed to deserialize shard message: {reason}")]
    Deserialization { reason: String },

    #[error("Broadcast transport failed: {reason}")]
    Transport { reason: String },
}

/// Provider lifecycle errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ProviderError {
    #[error("Settings provider is not initialized")]
    NotInitialized,

    #[error("Settings provider is already initialized")]
    AlreadyInitialized,
}

/// Master error type for all guildsync errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SettingsError {
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    #[error("Shard error: {0}")]
    Shard(#[from] ShardError),

    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),
}

/// Result type alias for guildsync operations.
pub type SettingsResult<T> = Result<T, SettingsError>;
