//! Wire message for global-setting changes.

use std::collections::BTreeSet;

use guildsync_core::{SettingValue, ShardError, ShardId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// "Apply this global key/value change unless your shard set overlaps
/// `origin_shard_ids`."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardMessage {
    /// Time-ordered message id, for log correlation.
    pub id: Uuid,
    /// Shards owned by the sending process.
    pub origin_shard_ids: BTreeSet<ShardId>,
    pub key: String,
    /// `None` unsets the key.
    pub value: Option<SettingValue>,
}

impl ShardMessage {
    pub fn new(
        origin_shard_ids: BTreeSet<ShardId>,
        key: impl Into<String>,
        value: Option<SettingValue>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            origin_shard_ids,
            key: key.into(),
            value,
        }
    }

    /// Whether a process owning `local` sent this message, or shares a
    /// shard with its sender.
    pub fn overlaps(&self, local: &BTreeSet<ShardId>) -> bool {
        !self.origin_shard_ids.is_disjoint(local)
    }

    pub fn to_json(&self) -> Result<String, ShardError> {
        serde_json::to_string(self).map_err(|e| ShardError::Serialization {
            reason: e.to_string(),
        })
    }

    pub fn from_json(payload: &str) -> Result<Self, ShardError> {
        serde_json::from_str(payload).map_err(|e| ShardError::Deserialization {
            reason: e.to_string(),
        })
    }
}
