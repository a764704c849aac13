//! guildsync Provider - Host-Facing Settings Facade
//!
//! Wires the persistence adapter, the settings cache, the event binder and
//! the optional shard broadcaster into one [`SettingsProvider`] with an
//! explicit `init`/`destroy` lifecycle. Also hosts the tracing subscriber
//! setup used by binaries embedding the provider.

pub mod provider;
pub mod telemetry;

pub use provider::SettingsProvider;
pub use telemetry::{init_tracing, TelemetryConfig, TelemetryError};

// Re-exported so hosts can depend on this crate alone.
pub use guildsync_core::{
    CommandInfo, GroupInfo, GuildId, HostRuntime, ProviderError, SettingValue, SettingsConfig,
    SettingsError, SettingsRecord, SettingsResult, SettingsTarget, TenantId,
};
pub use guildsync_events::{EventEmitter, InProcessEmitter, LifecycleEvent};
pub use guildsync_shard::{BroadcastEval, LocalShardBus, ShardBroadcaster, ShardReceiver};
pub use guildsync_storage::{DocumentStore, InMemoryDocumentStore, LmdbDocumentStore};
