//! Write-through settings cache.
//!
//! Reads are served from memory only. Writes mutate the resident record
//! first and then persist the whole record. A failed persistence is NOT
//! rolled back: the cache stays ahead of the store until the next
//! successful write of that tenant, and the error reaches the caller.

use std::collections::HashMap;
use std::pin::pin;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use futures_util::TryStreamExt;
use guildsync_core::{
    SettingKey, SettingValue, SettingsRecord, SettingsResult, ShardNotifier, StoreError, TenantId,
};
use tracing::{debug, info, warn};

use super::tenant_lock::TenantLocks;
use crate::document::DocumentStore;
use crate::repository::SettingsRepository;

/// In-memory map of tenant to settings, kept in step with the store through
/// its own write path.
///
/// Writes to one tenant are serialised end to end, so concurrent `set`
/// calls on distinct keys of the same tenant all reach the store. Writes to
/// different tenants proceed independently.
///
/// # Example
///
/// ```ignore
/// let cache = SettingsCache::new(repository).with_notifier(broadcaster);
/// cache.load().await?;
/// cache.set(&TenantId::Global, "prefix", "!".into()).await?;
/// assert_eq!(cache.get(&TenantId::Global, "prefix", "?"), "!".into());
/// ```
pub struct SettingsCache<S: DocumentStore> {
    records: RwLock<HashMap<TenantId, SettingsRecord>>,
    repository: SettingsRepository<S>,
    notifier: Option<Arc<dyn ShardNotifier>>,
    locks: TenantLocks,
}

impl<S: DocumentStore> SettingsCache<S> {
    pub fn new(repository: SettingsRepository<S>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            repository,
            notifier: None,
            locks: TenantLocks::new(),
        }
    }

    /// Announce every global-scope write to `notifier`.
    pub fn with_notifier(mut self, notifier: Arc<dyn ShardNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn repository(&self) -> &SettingsRepository<S> {
        &self.repository
    }

    /// Replace the resident map with every persisted record.
    ///
    /// Returns the number of records loaded.
    pub async fn load(&self) -> SettingsResult<usize> {
        let mut stream = pin!(self.repository.load_all());
        let mut loaded = HashMap::new();
        while let Some((tenant, record)) = stream.try_next().await? {
            loaded.insert(tenant, record);
        }

        let count = loaded.len();
        *self.write_records()? = loaded;
        info!(records = count, "Loaded tenant settings");
        Ok(count)
    }

    /// Cached value of `key`, or `default` when the tenant has no record or
    /// the key is unset.
    pub fn get(&self, tenant: &TenantId, key: &str, default: impl Into<SettingValue>) -> SettingValue {
        self.value(tenant, key).unwrap_or_else(|| default.into())
    }

    /// Cached value of `key`, `None` when unset.
    pub fn value(&self, tenant: &TenantId, key: &str) -> Option<SettingValue> {
        self.read_records()
            .get(tenant)
            .and_then(|record| record.get(key))
            .cloned()
    }

    /// Snapshot of a tenant's record.
    pub fn record(&self, tenant: &TenantId) -> Option<SettingsRecord> {
        self.read_records().get(tenant).cloned()
    }

    /// Whether a record exists, even an empty one.
    pub fn contains(&self, tenant: &TenantId) -> bool {
        self.read_records().contains_key(tenant)
    }

    pub fn tenants(&self) -> Vec<TenantId> {
        self.read_records().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.read_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read_records().is_empty()
    }

    /// Assign `key` and persist the tenant's full record.
    ///
    /// Global writes are announced to the notifier once persisted. Returns
    /// the written value.
    pub async fn set(
        &self,
        tenant: &TenantId,
        key: &str,
        value: SettingValue,
    ) -> SettingsResult<SettingValue> {
        SettingKey::validate(key)?;
        let guard = self.locks.acquire(tenant).await;

        let snapshot = {
            let mut records = self.write_records()?;
            let record = records.entry(tenant.clone()).or_default();
            record.insert(key, value.clone());
            record.clone()
        };
        self.persist(tenant, &snapshot).await?;
        drop(guard);

        debug!(tenant = %tenant, key = %key, value = %value, "Setting stored");
        if tenant.is_global() {
            self.announce(key, Some(&value)).await;
        }
        Ok(value)
    }

    /// Unset `key`, returning its previous value.
    ///
    /// Performs no I/O when the tenant has no record or the key is already
    /// unset.
    pub async fn remove(&self, tenant: &TenantId, key: &str) -> SettingsResult<Option<SettingValue>> {
        let guard = self.locks.acquire(tenant).await;

        let (previous, snapshot) = {
            let mut records = self.write_records()?;
            let Some(record) = records.get_mut(tenant) else {
                return Ok(None);
            };
            let Some(previous) = record.remove(key) else {
                return Ok(None);
            };
            (previous, record.clone())
        };
        self.persist(tenant, &snapshot).await?;
        drop(guard);

        debug!(tenant = %tenant, key = %key, "Setting removed");
        if tenant.is_global() {
            self.announce(key, None).await;
        }
        Ok(Some(previous))
    }

    /// Drop the tenant's record from the cache and the store.
    ///
    /// Returns whether a cached record existed.
    pub async fn clear(&self, tenant: &TenantId) -> SettingsResult<bool> {
        let _guard = self.locks.acquire(tenant).await;

        if self.write_records()?.remove(tenant).is_none() {
            return Ok(false);
        }
        if let Err(e) = self.repository.remove(tenant).await {
            warn!(
                tenant = %tenant,
                error = %e,
                "Settings cleared from cache but not from the store"
            );
            return Err(e.into());
        }
        debug!(tenant = %tenant, "Settings cleared");
        Ok(true)
    }

    /// Apply a global change received from a sibling shard.
    ///
    /// Creates the global record if needed. Neither persists nor announces.
    /// Reserved keys are refused like they are for local writes.
    pub fn apply_remote(&self, key: &str, value: Option<SettingValue>) -> SettingsResult<()> {
        SettingKey::validate(key)?;
        let mut records = self.write_records()?;
        let record = records.entry(TenantId::Global).or_default();
        match value {
            Some(value) => {
                record.insert(key, value);
            }
            None => {
                record.remove(key);
            }
        }
        Ok(())
    }

    async fn persist(&self, tenant: &TenantId, record: &SettingsRecord) -> SettingsResult<()> {
        if let Err(e) = self.repository.upsert(tenant, record).await {
            warn!(
                tenant = %tenant,
                error = %e,
                "Failed to persist settings; cache is ahead of the store"
            );
            return Err(e.into());
        }
        Ok(())
    }

    async fn announce(&self, key: &str, value: Option<&SettingValue>) {
        if let Some(notifier) = &self.notifier {
            notifier.global_changed(key, value).await;
        }
    }

    fn read_records(&self) -> RwLockReadGuard<'_, HashMap<TenantId, SettingsRecord>> {
        // Readers never fail: a writer that panicked mid-assignment leaves a
        // map that is still structurally valid.
        self.records.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_records(&self) -> Result<RwLockWriteGuard<'_, HashMap<TenantId, SettingsRecord>>, StoreError> {
        self.records.write().map_err(|_| StoreError::LockPoisoned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryDocumentStore;
    use async_trait::async_trait;
    use guildsync_core::{ConfigError, SettingsConfig, SettingsError};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingNotifier {
        calls: Mutex<Vec<(String, Option<SettingValue>)>>,
    }

    #[async_trait]
    impl ShardNotifier for RecordingNotifier {
        async fn global_changed(&self, key: &str, value: Option<&SettingValue>) {
            self.calls
                .lock()
                .unwrap()
                .push((key.to_string(), value.cloned()));
        }
    }

    async fn cache() -> (Arc<InMemoryDocumentStore>, SettingsCache<InMemoryDocumentStore>) {
        let store = Arc::new(InMemoryDocumentStore::new());
        let repository = SettingsRepository::new(store.clone(), &SettingsConfig::default());
        repository.ensure_schema().await.unwrap();
        (store, SettingsCache::new(repository))
    }

    fn guild(id: &str) -> TenantId {
        TenantId::guild(id).unwrap()
    }

    #[tokio::test]
    async fn test_get_unknown_tenant_returns_default() {
        let (_, cache) = cache().await;
        assert_eq!(cache.get(&guild("g1"), "prefix", "?"), SettingValue::from("?"));
        assert!(!cache.contains(&guild("g1")));
    }

    #[tokio::test]
    async fn test_set_then_get_and_persisted() {
        let (store, cache) = cache().await;
        let tenant = guild("g1");

        let written = cache.set(&tenant, "prefix", "!".into()).await.unwrap();
        assert_eq!(written, SettingValue::from("!"));
        assert_eq!(cache.get(&tenant, "prefix", "?"), SettingValue::from("!"));

        let docs = store.documents("guilds");
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].get("prefix"), Some(&serde_json::json!("!")));
    }

    #[tokio::test]
    async fn test_set_rejects_id_key() {
        let (store, cache) = cache().await;
        let err = cache.set(&guild("g1"), "id", "x".into()).await.unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Config(ConfigError::InvalidValue { .. })
        ));
        assert_eq!(store.write_count(), 0);
        assert!(!cache.contains(&guild("g1")));
    }

    #[tokio::test]
    async fn test_remove_unset_key_does_no_io() {
        let (store, cache) = cache().await;
        let tenant = guild("g1");

        assert_eq!(cache.remove(&tenant, "prefix").await.unwrap(), None);
        cache.set(&tenant, "prefix", "!".into()).await.unwrap();
        let writes = store.write_count();
        assert_eq!(cache.remove(&tenant, "other").await.unwrap(), None);
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_remove_returns_previous_value() {
        let (store, cache) = cache().await;
        let tenant = guild("g1");
        cache.set(&tenant, "prefix", "!".into()).await.unwrap();

        let previous = cache.remove(&tenant, "prefix").await.unwrap();
        assert_eq!(previous, Some(SettingValue::from("!")));
        assert_eq!(cache.get(&tenant, "prefix", "?"), SettingValue::from("?"));
        assert!(cache.contains(&tenant));
        assert!(!store.documents("guilds")[0].contains_key("prefix"));
    }

    #[tokio::test]
    async fn test_clear_removes_cache_entry_and_document() {
        let (store, cache) = cache().await;
        let tenant = guild("g1");
        cache.set(&tenant, "prefix", "!".into()).await.unwrap();
        cache.set(&tenant, "cmd-ping", false.into()).await.unwrap();

        assert!(cache.clear(&tenant).await.unwrap());
        assert!(!cache.contains(&tenant));
        assert!(store.documents("guilds").is_empty());
        assert!(!cache.clear(&tenant).await.unwrap());
    }

    #[tokio::test]
    async fn test_failed_persist_keeps_cache_ahead() {
        let (store, cache) = cache().await;
        let tenant = guild("g1");
        store.fail_next_writes(1);

        let err = cache.set(&tenant, "prefix", "!".into()).await.unwrap_err();
        assert!(matches!(err, SettingsError::Store(StoreError::Backend { .. })));
        assert_eq!(cache.get(&tenant, "prefix", "?"), SettingValue::from("!"));
        assert!(store.documents("guilds").is_empty());
    }

    #[tokio::test]
    async fn test_global_writes_are_announced() {
        let (_, cache) = cache().await;
        let notifier = Arc::new(RecordingNotifier::default());
        let cache = cache.with_notifier(notifier.clone());

        cache.set(&TenantId::Global, "prefix", "!".into()).await.unwrap();
        cache.set(&guild("g1"), "prefix", "?".into()).await.unwrap();
        cache.remove(&TenantId::Global, "prefix").await.unwrap();
        cache.remove(&TenantId::Global, "prefix").await.unwrap();

        let calls = notifier.calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("prefix".to_string(), Some(SettingValue::from("!"))),
                ("prefix".to_string(), None),
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_global_persist_is_not_announced() {
        let (store, cache) = cache().await;
        let notifier = Arc::new(RecordingNotifier::default());
        let cache = cache.with_notifier(notifier.clone());
        store.fail_next_writes(1);

        assert!(cache.set(&TenantId::Global, "prefix", "!".into()).await.is_err());
        assert!(notifier.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_load_round_trips_through_store() {
        let (store, cache) = cache().await;
        cache.set(&TenantId::Global, "prefix", "!".into()).await.unwrap();
        cache.set(&guild("g1"), "grp-util", false.into()).await.unwrap();

        let reloaded = SettingsCache::new(SettingsRepository::new(store, &SettingsConfig::default()));
        assert_eq!(reloaded.load().await.unwrap(), 2);
        assert_eq!(reloaded.record(&TenantId::Global), cache.record(&TenantId::Global));
        assert_eq!(reloaded.record(&guild("g1")), cache.record(&guild("g1")));
    }

    #[tokio::test]
    async fn test_apply_remote_creates_global_record() {
        let (store, cache) = cache().await;
        cache.apply_remote("prefix", Some("!".into())).unwrap();
        assert_eq!(cache.get(&TenantId::Global, "prefix", "?"), SettingValue::from("!"));

        cache.apply_remote("prefix", None).unwrap();
        assert!(cache.contains(&TenantId::Global));
        assert_eq!(cache.value(&TenantId::Global, "prefix"), None);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_apply_remote_refuses_id_key() {
        let (store, cache) = cache().await;
        let err = cache.apply_remote("id", Some("g2".into())).unwrap_err();
        assert!(matches!(
            err,
            SettingsError::Config(ConfigError::InvalidValue { .. })
        ));
        assert!(!cache.contains(&TenantId::Global));

        cache.set(&TenantId::Global, "prefix", "!".into()).await.unwrap();
        let reloaded = SettingsCache::new(SettingsRepository::new(store, &SettingsConfig::default()));
        assert_eq!(reloaded.load().await.unwrap(), 1);
        assert_eq!(reloaded.tenants(), vec![TenantId::Global]);
        assert_eq!(reloaded.value(&TenantId::Global, "prefix"), Some(SettingValue::from("!")));
    }

    #[tokio::test]
    async fn test_global_and_zero_like_guilds_stay_apart() {
        let (store, cache) = cache().await;
        assert!(TenantId::guild("0").is_err());
        assert!(TenantId::guild("global").is_err());

        cache.set(&TenantId::Global, "prefix", "G".into()).await.unwrap();
        for id in ["00", "Global"] {
            cache.set(&guild(id), "prefix", id.into()).await.unwrap();
        }
        assert_eq!(store.documents("guilds").len(), 3);

        let reloaded = SettingsCache::new(SettingsRepository::new(store, &SettingsConfig::default()));
        assert_eq!(reloaded.load().await.unwrap(), 3);
        assert_eq!(reloaded.get(&TenantId::Global, "prefix", "?"), SettingValue::from("G"));
        assert_eq!(reloaded.get(&guild("00"), "prefix", "?"), SettingValue::from("00"));
        assert_eq!(reloaded.get(&guild("Global"), "prefix", "?"), SettingValue::from("Global"));
    }

    #[tokio::test]
    async fn test_concurrent_distinct_keys_survive() {
        let (store, cache) = cache().await;
        let cache = Arc::new(cache);
        let tenant = guild("g1");

        let handles: Vec<_> = (0..16)
            .map(|i| {
                let cache = cache.clone();
                let tenant = tenant.clone();
                tokio::spawn(async move {
                    cache
                        .set(&tenant, &format!("k{i}"), SettingValue::from(i as i64))
                        .await
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let docs = store.documents("guilds");
        assert_eq!(docs.len(), 1);
        for i in 0..16 {
            assert_eq!(docs[0].get(&format!("k{i}")), Some(&serde_json::json!(i)));
        }
    }
}
