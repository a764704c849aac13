//! Settings cache configuration.
//!
//! Loaded from environment variables with defaults, or from a TOML file.
//! Unset or unparsable environment values fall back to the default.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::ShardId;

/// Configuration for the settings cache and its document store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SettingsConfig {
    /// Collection holding one document per tenant.
    pub collection: String,

    /// Index mapping a document's `id` field to the document.
    pub index: String,

    /// Documents fetched per page during the startup load.
    pub page_size: usize,

    /// Shard identifiers owned by this process. Empty means not sharded,
    /// in which case global changes are never broadcast.
    pub shard_ids: BTreeSet<ShardId>,

    /// Directory of the LMDB environment, when the LMDB store is used.
    pub lmdb_path: Option<PathBuf>,

    /// Maximum size of the LMDB map in megabytes.
    pub lmdb_map_size_mb: usize,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        Self {
            collection: "guilds".to_string(),
            index: "guild_by_id".to_string(),
            page_size: 64,
            shard_ids: BTreeSet::new(),
            lmdb_path: None,
            lmdb_map_size_mb: 64,
        }
    }
}

impl SettingsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create SettingsConfig from environment variables.
    ///
    /// Environment variables:
    /// - `GUILDSYNC_COLLECTION`: collection name (default: guilds)
    /// - `GUILDSYNC_INDEX`: id index name (default: guild_by_id)
    /// - `GUILDSYNC_PAGE_SIZE`: startup page size (default: 64)
    /// - `GUILDSYNC_SHARD_IDS`: comma-separated shard ids (default: none)
    /// - `GUILDSYNC_LMDB_PATH`: LMDB directory (default: unset)
    /// - `GUILDSYNC_LMDB_MAP_SIZE_MB`: LMDB map size (default: 64)
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`SettingsConfig::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let collection = lookup("GUILDSYNC_COLLECTION")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.collection);

        let index = lookup("GUILDSYNC_INDEX")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or(defaults.index);

        let page_size = lookup("GUILDSYNC_PAGE_SIZE")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.page_size);

        let shard_ids = lookup("GUILDSYNC_SHARD_IDS")
            .map(|s| {
                s.split(',')
                    .filter_map(|id| id.trim().parse().ok())
                    .collect()
            })
            .unwrap_or_default();

        let lmdb_path = lookup("GUILDSYNC_LMDB_PATH")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        let lmdb_map_size_mb = lookup("GUILDSYNC_LMDB_MAP_SIZE_MB")
            .and_then(|s| s.trim().parse().ok())
            .unwrap_or(defaults.lmdb_map_size_mb);

        Self {
            collection,
            index,
            page_size,
            shard_ids,
            lmdb_path,
            lmdb_map_size_mb,
        }
    }

    /// Load and validate a TOML config file.
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            reason: format!("{}: {}", path.display(), e),
        })?;
        let config = Self::from_toml_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        toml::from_str(contents).map_err(|e| ConfigError::Parse {
            reason: e.to_string(),
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.collection.trim().is_empty() {
            return Err(invalid("collection", &self.collection, "must not be empty"));
        }
        if self.index.trim().is_empty() {
            return Err(invalid("index", &self.index, "must not be empty"));
        }
        if self.page_size == 0 {
            return Err(invalid("page_size", "0", "must be > 0"));
        }
        if self.lmdb_map_size_mb == 0 {
            return Err(invalid("lmdb_map_size_mb", "0", "must be > 0"));
        }
        Ok(())
    }

    /// Whether this process takes part in cross-shard broadcast.
    pub fn is_sharded(&self) -> bool {
        !self.shard_ids.is_empty()
    }

    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub fn with_index(mut self, index: impl Into<String>) -> Self {
        self.index = index.into();
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_shard_ids(mut self, ids: impl IntoIterator<Item = ShardId>) -> Self {
        self.shard_ids = ids.into_iter().collect();
        self
    }

    pub fn with_lmdb_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.lmdb_path = Some(path.into());
        self
    }

    pub fn with_lmdb_map_size_mb(mut self, size: usize) -> Self {
        self.lmdb_map_size_mb = size;
        self
    }
}

fn invalid(field: &str, value: &str, reason: &str) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}
