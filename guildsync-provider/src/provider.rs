//! Host-facing settings provider.
//!
//! Owns the cache, the event binding and the lifecycle. Nothing is global:
//! every collaborator is handed in at construction.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use guildsync_core::{
    HostRuntime, ProviderError, SettingValue, SettingsConfig, SettingsRecord, SettingsResult,
    TenantId,
};
use guildsync_events::{EventBinder, EventEmitter, RuntimeApplier};
use guildsync_shard::{ShardBroadcaster, ShardReceiver};
use guildsync_storage::{DocumentStore, SettingsCache, SettingsRepository};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Per-guild settings with write-through persistence.
///
/// # Lifecycle
///
/// 1. [`SettingsProvider::init`] prepares the schema, loads every record,
///    projects them onto the host and subscribes to lifecycle events.
/// 2. Reads and writes are served.
/// 3. [`SettingsProvider::destroy`] unsubscribes. The provider may be
///    initialised again afterwards.
///
/// # Example
///
/// ```ignore
/// let provider = SettingsProvider::new(store, host, emitter, config, None);
/// provider.init().await?;
/// provider.set(&TenantId::guild("g1")?, "prefix", "!".into()).await?;
/// ```
pub struct SettingsProvider<S: DocumentStore + 'static> {
    config: SettingsConfig,
    cache: Arc<SettingsCache<S>>,
    applier: RuntimeApplier,
    binder: EventBinder<S>,
    ready: AtomicBool,
    lifecycle: Mutex<()>,
}

impl<S: DocumentStore + 'static> SettingsProvider<S> {
    /// Wire a provider. No I/O happens until [`init`](Self::init).
    ///
    /// `broadcaster` receives every global write once it is persisted.
    pub fn new(
        store: Arc<S>,
        host: Arc<dyn HostRuntime>,
        emitter: Arc<dyn EventEmitter>,
        config: SettingsConfig,
        broadcaster: Option<ShardBroadcaster>,
    ) -> Self {
        let repository = SettingsRepository::new(store, &config);
        let cache = match broadcaster {
            Some(broadcaster) => SettingsCache::new(repository).with_notifier(Arc::new(broadcaster)),
            None => SettingsCache::new(repository),
        };
        let cache = Arc::new(cache);
        let applier = RuntimeApplier::new(host);
        let binder = EventBinder::new(cache.clone(), applier.clone(), emitter);

        Self {
            config,
            cache,
            applier,
            binder,
            ready: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
        }
    }

    /// Load every persisted record and start serving.
    ///
    /// Returns the number of records loaded. On error the provider stays
    /// not ready and no handler is bound.
    pub async fn init(&self) -> SettingsResult<usize> {
        let _lifecycle = self.lifecycle.lock().await;
        if self.is_ready() {
            return Err(ProviderError::AlreadyInitialized.into());
        }

        self.config.validate()?;
        self.cache.repository().ensure_schema().await?;
        let loaded = self.cache.load().await?;

        let snapshot = self.snapshot();
        let applied = self
            .applier
            .apply_all(snapshot.iter().map(|(tenant, settings)| (tenant, settings)));
        let handlers = self.binder.bind();

        self.ready.store(true, Ordering::Release);
        info!(
            records = loaded,
            applied,
            handlers,
            sharded = self.config.is_sharded(),
            "Settings provider initialized"
        );
        Ok(loaded)
    }

    /// Unsubscribe from lifecycle events. Returns how many handlers were
    /// detached; calling it again returns 0.
    ///
    /// Resident settings stay in memory but writes are refused until the
    /// next `init`.
    pub async fn destroy(&self) -> usize {
        let _lifecycle = self.lifecycle.lock().await;
        self.ready.store(false, Ordering::Release);
        let detached = self.binder.unbind();
        if detached > 0 {
            info!(handlers = detached, "Settings provider destroyed");
        }
        detached
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Acquire)
    }

    /// Cached value of `key`, or `default`.
    ///
    /// Before `init` completes every lookup resolves to `default`.
    pub fn get(&self, tenant: &TenantId, key: &str, default: impl Into<SettingValue>) -> SettingValue {
        if !self.is_ready() {
            debug!(tenant = %tenant, key = %key, "Read before init, using default");
            return default.into();
        }
        self.cache.get(tenant, key, default)
    }

    pub async fn set(
        &self,
        tenant: &TenantId,
        key: &str,
        value: SettingValue,
    ) -> SettingsResult<SettingValue> {
        self.ensure_ready()?;
        self.cache.set(tenant, key, value).await
    }

    pub async fn remove(&self, tenant: &TenantId, key: &str) -> SettingsResult<Option<SettingValue>> {
        self.ensure_ready()?;
        self.cache.remove(tenant, key).await
    }

    /// Drop a tenant's settings from memory and from the store.
    pub async fn clear(&self, tenant: &TenantId) -> SettingsResult<bool> {
        self.ensure_ready()?;
        self.cache.clear(tenant).await
    }

    pub fn cache(&self) -> &Arc<SettingsCache<S>> {
        &self.cache
    }

    pub fn config(&self) -> &SettingsConfig {
        &self.config
    }

    /// Receiver applying sibling broadcasts to this provider's cache,
    /// using the configured shard identifiers for self-exclusion.
    pub fn shard_receiver(&self) -> ShardReceiver<S> {
        ShardReceiver::new(self.config.shard_ids.clone(), self.cache.clone())
    }

    fn ensure_ready(&self) -> Result<(), ProviderError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(ProviderError::NotInitialized)
        }
    }

    fn snapshot(&self) -> Vec<(TenantId, SettingsRecord)> {
        self.cache
            .tenants()
            .into_iter()
            .filter_map(|tenant| {
                let settings = self.cache.record(&tenant)?;
                Some((tenant, settings))
            })
            .collect()
    }
}

impl<S: DocumentStore + 'static> fmt::Debug for SettingsProvider<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SettingsProvider")
            .field("ready", &self.is_ready())
            .field("tenants", &self.cache.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use guildsync_core::{SettingsError, StoreError};
    use guildsync_events::{EventName, InProcessEmitter, LifecycleEvent};
    use guildsync_shard::ShardMessage;
    use guildsync_storage::InMemoryDocumentStore;
    use guildsync_test_utils::assertions::{assert_not_initialized, assert_persisted};
    use guildsync_test_utils::fixtures::{guild, sample_host, sample_record, settings_config};
    use guildsync_test_utils::{FailingStore, MockHost};

    struct Harness {
        store: Arc<InMemoryDocumentStore>,
        host: Arc<MockHost>,
        emitter: Arc<InProcessEmitter>,
        provider: SettingsProvider<InMemoryDocumentStore>,
    }

    fn harness() -> Harness {
        let store = Arc::new(InMemoryDocumentStore::new());
        let host = Arc::new(sample_host());
        let emitter = Arc::new(InProcessEmitter::new());
        let provider = SettingsProvider::new(
            store.clone(),
            host.clone(),
            emitter.clone(),
            settings_config(),
            None,
        );
        Harness {
            store,
            host,
            emitter,
            provider,
        }
    }

    #[tokio::test]
    async fn test_writes_before_init_are_refused() {
        let h = harness();
        let g1 = guild("g1");

        assert_not_initialized(&h.provider.set(&g1, "prefix", "!".into()).await);
        assert_not_initialized(&h.provider.remove(&g1, "prefix").await);
        assert_not_initialized(&h.provider.clear(&g1).await);
        assert_eq!(h.provider.get(&g1, "prefix", "?"), SettingValue::from("?"));
        assert_eq!(h.store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_init_creates_schema_and_binds() {
        let h = harness();
        assert_eq!(h.provider.init().await.unwrap(), 0);

        assert!(h.provider.is_ready());
        for name in EventName::ALL {
            assert_eq!(h.emitter.listener_count(name), 1);
        }
    }

    #[tokio::test]
    async fn test_double_init_is_rejected() {
        let h = harness();
        h.provider.init().await.unwrap();

        assert_eq!(
            h.provider.init().await,
            Err(SettingsError::Provider(ProviderError::AlreadyInitialized))
        );
        for name in EventName::ALL {
            assert_eq!(h.emitter.listener_count(name), 1);
        }
    }

    #[tokio::test]
    async fn test_init_failure_leaves_provider_not_ready() {
        let emitter = Arc::new(InProcessEmitter::new());
        let provider = SettingsProvider::new(
            Arc::new(FailingStore::new("connection refused")),
            Arc::new(MockHost::new()),
            emitter.clone(),
            settings_config(),
            None,
        );

        assert_eq!(
            provider.init().await,
            Err(SettingsError::Store(StoreError::Backend {
                reason: "connection refused".to_string()
            }))
        );
        assert!(!provider.is_ready());
        assert_eq!(emitter.listener_count(EventName::PrefixChanged), 0);
    }

    #[tokio::test]
    async fn test_invalid_config_fails_init() {
        let provider = SettingsProvider::new(
            Arc::new(InMemoryDocumentStore::new()),
            Arc::new(MockHost::new()),
            Arc::new(InProcessEmitter::new()),
            SettingsConfig::default().with_page_size(0),
            None,
        );
        assert!(matches!(provider.init().await, Err(SettingsError::Config(_))));
        assert!(!provider.is_ready());
    }

    #[tokio::test]
    async fn test_destroy_is_idempotent() {
        let h = harness();
        h.provider.init().await.unwrap();

        assert_eq!(h.provider.destroy().await, EventName::ALL.len());
        assert_eq!(h.provider.destroy().await, 0);
        assert!(!h.provider.is_ready());
        assert_eq!(h.emitter.listener_count(EventName::TenantAvailable), 0);
        assert_not_initialized(&h.provider.set(&TenantId::Global, "prefix", "!".into()).await);
    }

    #[tokio::test]
    async fn test_reinit_after_destroy() {
        let h = harness();
        h.provider.init().await.unwrap();
        h.provider.set(&guild("g1"), "prefix", "!".into()).await.unwrap();
        h.provider.destroy().await;

        assert_eq!(h.provider.init().await.unwrap(), 1);
        assert_eq!(h.provider.get(&guild("g1"), "prefix", "?"), SettingValue::from("!"));
    }

    #[tokio::test]
    async fn test_init_projects_global_and_available_guilds() {
        let h = harness();
        let seed = SettingsProvider::new(
            h.store.clone(),
            Arc::new(MockHost::new()),
            Arc::new(InProcessEmitter::new()),
            settings_config(),
            None,
        );
        seed.init().await.unwrap();
        for tenant in [TenantId::Global, guild("g1"), guild("g2")] {
            for (key, value) in sample_record().iter() {
                seed.set(&tenant, key, value.clone()).await.unwrap();
            }
        }

        let g1 = h.host.add_guild("g1");
        assert_eq!(h.provider.init().await.unwrap(), 3);

        let defaults = h.host.defaults_target();
        assert_eq!(defaults.prefix().as_deref(), Some("!"));
        assert_eq!(defaults.command_enabled("ping"), Some(false));
        assert_eq!(g1.prefix().as_deref(), Some("!"));
        assert_eq!(g1.group_enabled("util"), Some(true));
        assert!(h.host.guild_target("g2").is_none());
    }

    #[tokio::test]
    async fn test_events_write_through_provider_cache() {
        let h = harness();
        h.provider.init().await.unwrap();
        let g1 = guild("g1");

        h.emitter
            .emit(LifecycleEvent::PrefixChanged {
                tenant: g1.clone(),
                prefix: Some(">".to_string()),
            })
            .await;

        assert_eq!(h.provider.get(&g1, "prefix", "?"), SettingValue::from(">"));
        let mut expected = SettingsRecord::new();
        expected.insert("prefix", ">".into());
        assert_persisted(&h.store, "guilds", &g1, &expected);
    }

    #[tokio::test]
    async fn test_shard_receiver_uses_configured_ids() {
        let store = Arc::new(InMemoryDocumentStore::new());
        let provider = SettingsProvider::new(
            store,
            Arc::new(MockHost::new()),
            Arc::new(InProcessEmitter::new()),
            settings_config().with_shard_ids([3]),
            None,
        );
        provider.init().await.unwrap();
        let receiver = provider.shard_receiver();

        let own = ShardMessage::new([3].into_iter().collect(), "prefix", Some(SettingValue::from("!")));
        assert!(!receiver.handle(&own));
        let sibling = ShardMessage::new([4].into_iter().collect(), "prefix", Some(SettingValue::from("!")));
        assert!(receiver.handle(&sibling));
        assert_eq!(
            provider.get(&TenantId::Global, "prefix", "?"),
            SettingValue::from("!")
        );
    }
}
