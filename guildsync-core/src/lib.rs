//! guildsync Core - Tenant Settings Types and Contracts
//!
//! Pure data structures and the seams every other crate plugs into:
//! tenant identity, setting values and records, host application contracts,
//! the global-change notifier, errors and configuration.
//! This crate performs no I/O beyond reading a config file.

pub mod config;
pub mod error;
pub mod host;
pub mod notify;
pub mod setting;
pub mod tenant;

pub use config::SettingsConfig;
pub use error::{
    ConfigError, ProviderError, SettingsError, SettingsResult, ShardError, StoreError,
};
pub use host::{CommandInfo, GroupInfo, HostRuntime, SettingsTarget};
pub use notify::ShardNotifier;
pub use setting::{SettingKey, SettingValue, SettingsRecord, ID_FIELD, PREFIX_KEY};
pub use tenant::{GuildId, StorageId, TenantId, GLOBAL_TENANT};

/// Identifier of one process instance of the host application.
pub type ShardId = u32;
