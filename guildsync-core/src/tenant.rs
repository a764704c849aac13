//! Tenant identity and its storage mapping.
//!
//! A tenant is either a real guild, named by an opaque string, or the
//! reserved `"global"` tenant that holds process-wide defaults. The global
//! tenant is persisted under a sentinel storage identifier that can never
//! collide with a guild ID.

use std::fmt;

use crate::error::ConfigError;

/// Reserved tenant name for process-wide defaults.
pub const GLOBAL_TENANT: &str = "global";

/// Textual spelling of the sentinel storage identifier.
const SENTINEL_TEXT: &str = "0";

/// Identifier of a real guild.
///
/// Only obtainable through validation, so it is never empty and never one
/// of the reserved spellings `"0"` and `"global"`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GuildId(String);

impl GuildId {
    pub fn new(id: impl Into<String>) -> Result<Self, ConfigError> {
        let id = id.into();
        let reason = match id.as_str() {
            "" => "must not be empty",
            SENTINEL_TEXT => "reserved for the global sentinel",
            GLOBAL_TENANT => "reserved for the global tenant",
            _ => return Ok(Self(id)),
        };
        Err(ConfigError::InvalidTenantId {
            value: id,
            reason: reason.to_string(),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for GuildId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for GuildId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

/// Identifier of a settings tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TenantId {
    /// The reserved tenant holding defaults for every guild.
    Global,
    /// A real guild.
    Guild(GuildId),
}

impl TenantId {
    /// Parse a tenant identifier supplied by the host.
    ///
    /// `"global"` maps to [`TenantId::Global`]. The empty string and the
    /// sentinel spelling are rejected because they cannot round-trip
    /// through storage.
    pub fn parse(value: &str) -> Result<Self, ConfigError> {
        if value == GLOBAL_TENANT {
            return Ok(Self::Global);
        }
        GuildId::new(value).map(Self::Guild)
    }

    /// Construct a guild tenant. Unlike [`parse`](Self::parse), `"global"`
    /// is rejected.
    pub fn guild(id: impl Into<String>) -> Result<Self, ConfigError> {
        GuildId::new(id).map(Self::Guild)
    }

    pub fn is_global(&self) -> bool {
        matches!(self, Self::Global)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Global => GLOBAL_TENANT,
            Self::Guild(id) => id.as_str(),
        }
    }

    /// The identifier this tenant's document is stored under.
    pub fn storage_id(&self) -> StorageId {
        match self {
            Self::Global => StorageId::Sentinel,
            Self::Guild(id) => StorageId::Guild(id.clone()),
        }
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TenantId {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl From<GuildId> for TenantId {
    fn from(id: GuildId) -> Self {
        Self::Guild(id)
    }
}

/// Identifier carried in the `id` field of a persisted document.
///
/// The number `0` for the sentinel and a JSON string for guilds.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum StorageId {
    Sentinel,
    Guild(GuildId),
}

impl StorageId {
    /// Map a persisted identifier back to its tenant.
    pub fn tenant(&self) -> TenantId {
        match self {
            Self::Sentinel => TenantId::Global,
            Self::Guild(id) => TenantId::Guild(id.clone()),
        }
    }

    /// Interpret a raw JSON `id` field.
    ///
    /// Older writers stored the global record as `"0"` or `"global"`; both
    /// are read as the sentinel. No guild can be stored under either.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, ConfigError> {
        match value {
            serde_json::Value::Number(n) if n.as_u64() == Some(0) => Ok(Self::Sentinel),
            serde_json::Value::String(s) if s == SENTINEL_TEXT || s == GLOBAL_TENANT => {
                Ok(Self::Sentinel)
            }
            serde_json::Value::String(s) => GuildId::new(s.as_str()).map(Self::Guild),
            other => Err(ConfigError::InvalidTenantId {
                value: other.to_string(),
                reason: "the guild must be a guild ID or \"global\"".to_string(),
            }),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Sentinel => serde_json::Value::from(0u64),
            Self::Guild(id) => serde_json::Value::String(id.as_str().to_string()),
        }
    }

    /// Canonical lookup term for the `id` index.
    pub fn index_term(&self) -> String {
        self.to_json().to_string()
    }
}
