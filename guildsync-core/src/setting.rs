//! Setting values, keys and the per-tenant settings record.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::tenant::StorageId;

/// Key of the command prefix override.
pub const PREFIX_KEY: &str = "prefix";

/// Document field holding the storage identifier. Never a setting key.
pub const ID_FIELD: &str = "id";

const COMMAND_KEY_PREFIX: &str = "cmd-";
const GROUP_KEY_PREFIX: &str = "grp-";

/// A single setting value.
///
/// "Unset" is not a value: it is the absence of the key from a record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SettingValue {
    Bool(bool),
    Number(serde_json::Number),
    Text(String),
}

impl SettingValue {
    /// Build a numeric value. Returns `None` for NaN and infinities.
    pub fn number(value: f64) -> Option<Self> {
        serde_json::Number::from_f64(value).map(Self::Number)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// Convert a raw document field. Nulls, arrays and objects are not
    /// setting values and yield `None`.
    pub fn from_json(value: serde_json::Value) -> Option<Self> {
        match value {
            serde_json::Value::Bool(b) => Some(Self::Bool(b)),
            serde_json::Value::Number(n) => Some(Self::Number(n)),
            serde_json::Value::String(s) => Some(Self::Text(s)),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Bool(b) => serde_json::Value::Bool(*b),
            Self::Number(n) => serde_json::Value::Number(n.clone()),
            Self::Text(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for SettingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

impl From<bool> for SettingValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for SettingValue {
    fn from(value: i64) -> Self {
        Self::Number(value.into())
    }
}

impl From<u64> for SettingValue {
    fn from(value: u64) -> Self {
        Self::Number(value.into())
    }
}

impl From<String> for SettingValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<&str> for SettingValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

/// Builders for the reserved key shapes.
pub struct SettingKey;

impl SettingKey {
    /// `cmd-<name>`: enable flag for a named command.
    pub fn command(name: &str) -> String {
        format!("{COMMAND_KEY_PREFIX}{name}")
    }

    /// `grp-<id>`: enable flag for a named group.
    pub fn group(id: &str) -> String {
        format!("{GROUP_KEY_PREFIX}{id}")
    }

    /// Reject keys that would clash with the document layout.
    pub fn validate(key: &str) -> Result<(), ConfigError> {
        if key.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "key".to_string(),
                value: key.to_string(),
                reason: "must not be empty".to_string(),
            });
        }
        if key == ID_FIELD {
            return Err(ConfigError::InvalidValue {
                field: "key".to_string(),
                value: key.to_string(),
                reason: "reserved for the document identifier".to_string(),
            });
        }
        Ok(())
    }
}

/// The full key/value payload of one tenant.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SettingsRecord {
    values: BTreeMap<String, SettingValue>,
}

impl SettingsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&SettingValue> {
        self.values.get(key)
    }

    /// Assign a key, returning the previous value.
    pub fn insert(&mut self, key: impl Into<String>, value: SettingValue) -> Option<SettingValue> {
        self.values.insert(key.into(), value)
    }

    /// Mark a key unset, returning the previous value.
    pub fn remove(&mut self, key: &str) -> Option<SettingValue> {
        self.values.remove(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &SettingValue)> {
        self.values.iter()
    }

    /// Command prefix override, if defined as text.
    pub fn prefix(&self) -> Option<&str> {
        self.get(PREFIX_KEY).and_then(SettingValue::as_str)
    }

    /// Enable flag for a command, if defined as a boolean.
    pub fn command_enabled(&self, name: &str) -> Option<bool> {
        self.get(&SettingKey::command(name))
            .and_then(SettingValue::as_bool)
    }

    /// Enable flag for a group, if defined as a boolean.
    pub fn group_enabled(&self, id: &str) -> Option<bool> {
        self.get(&SettingKey::group(id)).and_then(SettingValue::as_bool)
    }

    /// Render the persisted payload `{ id, <key>: <value>, ... }`.
    ///
    /// A setting named `id` is never written: the field belongs to `id`.
    pub fn to_document(&self, id: &StorageId) -> serde_json::Map<String, serde_json::Value> {
        let mut doc = serde_json::Map::with_capacity(self.values.len() + 1);
        for (key, value) in self.values.iter().filter(|(key, _)| key.as_str() != ID_FIELD) {
            doc.insert(key.clone(), value.to_json());
        }
        doc.insert(ID_FIELD.to_string(), id.to_json());
        doc
    }

    /// Split a persisted payload into its identifier and settings.
    ///
    /// Fields holding nulls or structured values are skipped.
    pub fn from_document(
        mut doc: serde_json::Map<String, serde_json::Value>,
    ) -> Result<(StorageId, Self), ConfigError> {
        let raw_id = doc.remove(ID_FIELD).ok_or_else(|| ConfigError::InvalidTenantId {
            value: "<missing>".to_string(),
            reason: "document has no id field".to_string(),
        })?;
        let id = StorageId::from_json(&raw_id)?;
        let values = doc
            .into_iter()
            .filter_map(|(k, v)| SettingValue::from_json(v).map(|v| (k, v)))
            .collect();
        Ok((id, Self { values }))
    }
}

impl FromIterator<(String, SettingValue)> for SettingsRecord {
    fn from_iter<I: IntoIterator<Item = (String, SettingValue)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
        }
    }
}
