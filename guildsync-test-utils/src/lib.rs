//! guildsync Test Utilities
//!
//! Centralized test infrastructure for the guildsync workspace:
//! - Mock host runtime and settings targets
//! - Recording and failing collaborators
//! - Proptest generators for tenant ids, keys and values
//! - Test fixtures for common scenarios
//! - Custom assertions for guildsync-specific validation

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

// Re-export core types for convenience
pub use guildsync_core::{
    CommandInfo, ConfigError, GroupInfo, HostRuntime, ProviderError, SettingKey, SettingValue,
    SettingsConfig, SettingsError, SettingsRecord, SettingsResult, SettingsTarget, ShardError,
    ShardId, StoreError, TenantId,
};
pub use guildsync_storage::InMemoryDocumentStore;

use guildsync_shard::{BroadcastEval, ShardMessage};
use guildsync_storage::{DocRef, Document, DocumentStore, Page, StoreResult, StoredDocument, UpsertOutcome};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// MOCK HOST
// ============================================================================

/// Settings target that remembers what was projected onto it.
#[derive(Debug, Default)]
pub struct MockTarget {
    prefix: Mutex<Option<String>>,
    commands: Mutex<HashMap<String, bool>>,
    groups: Mutex<HashMap<String, bool>>,
    writes: Mutex<usize>,
}

impl MockTarget {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn prefix(&self) -> Option<String> {
        lock(&self.prefix).clone()
    }

    pub fn command_enabled(&self, name: &str) -> Option<bool> {
        lock(&self.commands).get(name).copied()
    }

    pub fn group_enabled(&self, id: &str) -> Option<bool> {
        lock(&self.groups).get(id).copied()
    }

    /// Number of setter calls received.
    pub fn writes(&self) -> usize {
        *lock(&self.writes)
    }

    fn touch(&self) {
        *lock(&self.writes) += 1;
    }
}

impl SettingsTarget for MockTarget {
    fn set_prefix(&self, prefix: &str) {
        self.touch();
        *lock(&self.prefix) = Some(prefix.to_string());
    }

    fn set_command_enabled(&self, command: &CommandInfo, enabled: bool) {
        self.touch();
        lock(&self.commands).insert(command.name.clone(), enabled);
    }

    fn set_group_enabled(&self, group: &GroupInfo, enabled: bool) {
        self.touch();
        lock(&self.groups).insert(group.id.clone(), enabled);
    }
}

/// Host runtime with a mutable registry and a set of available guilds.
#[derive(Debug, Default)]
pub struct MockHost {
    commands: Mutex<Vec<CommandInfo>>,
    groups: Mutex<Vec<GroupInfo>>,
    guilds: Mutex<HashMap<String, Arc<MockTarget>>>,
    defaults: Arc<MockTarget>,
}

impl MockHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Host with the given commands and groups already registered.
    pub fn with_registry<C, G>(commands: C, groups: G) -> Self
    where
        C: IntoIterator,
        C::Item: Into<String>,
        G: IntoIterator,
        G::Item: Into<String>,
    {
        let host = Self::default();
        for name in commands {
            host.register_command(name);
        }
        for id in groups {
            host.register_group(id);
        }
        host
    }

    pub fn register_command(&self, name: impl Into<String>) -> CommandInfo {
        let command = CommandInfo::new(name);
        lock(&self.commands).push(command.clone());
        command
    }

    pub fn register_group(&self, id: impl Into<String>) -> GroupInfo {
        let group = GroupInfo::new(id);
        lock(&self.groups).push(group.clone());
        group
    }

    /// Make a guild available, returning its target.
    pub fn add_guild(&self, id: impl Into<String>) -> Arc<MockTarget> {
        lock(&self.guilds)
            .entry(id.into())
            .or_insert_with(|| Arc::new(MockTarget::new()))
            .clone()
    }

    pub fn remove_guild(&self, id: &str) -> bool {
        lock(&self.guilds).remove(id).is_some()
    }

    pub fn guild_target(&self, id: &str) -> Option<Arc<MockTarget>> {
        lock(&self.guilds).get(id).cloned()
    }

    /// Target standing for the process-wide defaults.
    pub fn defaults_target(&self) -> Arc<MockTarget> {
        self.defaults.clone()
    }
}

impl HostRuntime for MockHost {
    fn commands(&self) -> Vec<CommandInfo> {
        lock(&self.commands).clone()
    }

    fn groups(&self) -> Vec<GroupInfo> {
        lock(&self.groups).clone()
    }

    fn guild(&self, id: &str) -> Option<Arc<dyn SettingsTarget>> {
        self.guild_target(id)
            .map(|target| target as Arc<dyn SettingsTarget>)
    }

    fn defaults(&self) -> Arc<dyn SettingsTarget> {
        self.defaults.clone()
    }
}

// ============================================================================
// RECORDING AND FAILING COLLABORATORS
// ============================================================================

/// Broadcast transport that records every message instead of sending it.
#[derive(Debug, Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<ShardMessage>>,
    fail: bool,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transport whose every delivery fails.
    pub fn unreachable() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn messages(&self) -> Vec<ShardMessage> {
        lock(&self.sent).clone()
    }

    pub fn len(&self) -> usize {
        lock(&self.sent).len()
    }

    pub fn is_empty(&self) -> bool {
        lock(&self.sent).is_empty()
    }
}

#[async_trait]
impl BroadcastEval for RecordingTransport {
    async fn broadcast_eval(&self, message: &ShardMessage) -> Result<(), ShardError> {
        if self.fail {
            return Err(ShardError::Transport {
                reason: "sibling unreachable".to_string(),
            });
        }
        lock(&self.sent).push(message.clone());
        Ok(())
    }
}

/// Document store whose every operation fails with a backend error.
#[derive(Debug, Clone)]
pub struct FailingStore {
    reason: String,
}

impl FailingStore {
    pub fn new(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
        }
    }

    fn fail<T>(&self) -> StoreResult<T> {
        Err(StoreError::Backend {
            reason: self.reason.clone(),
        })
    }
}

impl Default for FailingStore {
    fn default() -> Self {
        Self::new("store unavailable")
    }
}

#[async_trait]
impl DocumentStore for FailingStore {
    async fn collection_exists(&self, _collection: &str) -> StoreResult<bool> {
        self.fail()
    }

    async fn create_collection(&self, _collection: &str) -> StoreResult<()> {
        self.fail()
    }

    async fn index_exists(&self, _index: &str) -> StoreResult<bool> {
        self.fail()
    }

    async fn create_index(&self, _index: &str, _collection: &str, _field: &str) -> StoreResult<()> {
        self.fail()
    }

    async fn list_page(
        &self,
        _collection: &str,
        _after: Option<DocRef>,
        _size: usize,
    ) -> StoreResult<Page> {
        self.fail()
    }

    async fn find_by_term(&self, _index: &str, _term: &str) -> StoreResult<Option<StoredDocument>> {
        self.fail()
    }

    async fn create(&self, _collection: &str, _data: Document) -> StoreResult<DocRef> {
        self.fail()
    }

    async fn update(&self, _collection: &str, _doc_ref: DocRef, _data: Document) -> StoreResult<()> {
        self.fail()
    }

    async fn delete(&self, _collection: &str, _doc_ref: DocRef) -> StoreResult<bool> {
        self.fail()
    }

    async fn upsert_by_term(
        &self,
        _index: &str,
        _collection: &str,
        _term: &str,
        _data: Document,
    ) -> StoreResult<UpsertOutcome> {
        self.fail()
    }
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for generating guildsync types.

    use super::*;
    use proptest::prelude::*;

    /// Generate a guild id shaped like a snowflake.
    pub fn arb_guild_id() -> impl Strategy<Value = String> {
        "[1-9][0-9]{16,18}"
    }

    /// Generate a tenant id, global about one time in four.
    pub fn arb_tenant_id() -> impl Strategy<Value = TenantId> {
        prop_oneof![
            1 => Just(TenantId::Global),
            3 => arb_guild_id().prop_filter_map("valid guild id", |id| TenantId::guild(id).ok()),
        ]
    }

    /// Generate a setting key: reserved shapes or an opaque key, never `id`.
    pub fn arb_setting_key() -> impl Strategy<Value = String> {
        prop_oneof![
            Just("prefix".to_string()),
            "[a-z]{1,10}".prop_map(|name| SettingKey::command(&name)),
            "[a-z]{1,10}".prop_map(|id| SettingKey::group(&id)),
            "[a-z][a-z_]{1,15}".prop_filter("id is reserved", |k| k != "id"),
        ]
    }

    /// Generate a setting value of any kind.
    pub fn arb_setting_value() -> impl Strategy<Value = SettingValue> {
        prop_oneof![
            any::<bool>().prop_map(SettingValue::Bool),
            any::<i64>().prop_map(SettingValue::from),
            (-1.0e9f64..1.0e9f64).prop_filter_map("finite", SettingValue::number),
            "[ -~]{0,24}".prop_map(SettingValue::Text),
        ]
    }

    /// Generate a full settings record.
    pub fn arb_settings_record() -> impl Strategy<Value = SettingsRecord> {
        prop::collection::btree_map(arb_setting_key(), arb_setting_value(), 0..8)
            .prop_map(|values| values.into_iter().collect())
    }

    /// Generate a non-empty shard id set.
    pub fn arb_shard_ids() -> impl Strategy<Value = BTreeSet<ShardId>> {
        prop::collection::btree_set(0u32..16, 1..4)
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built test fixtures for common testing scenarios.

    use super::*;

    /// Default config with a small page size, so loads span several pages.
    pub fn settings_config() -> SettingsConfig {
        SettingsConfig::default().with_page_size(2)
    }

    /// Config for a process owning `shard_ids`.
    pub fn sharded_config(shard_ids: impl IntoIterator<Item = ShardId>) -> SettingsConfig {
        settings_config().with_shard_ids(shard_ids)
    }

    /// A guild tenant. Panics on the reserved spellings.
    pub fn guild(id: &str) -> TenantId {
        match TenantId::guild(id) {
            Ok(tenant) => tenant,
            Err(e) => panic!("fixture guild id {id:?} is invalid: {e}"),
        }
    }

    /// Record holding a prefix, one command flag and one group flag.
    pub fn sample_record() -> SettingsRecord {
        [
            ("prefix".to_string(), SettingValue::from("!")),
            (SettingKey::command("ping"), SettingValue::from(false)),
            (SettingKey::group("util"), SettingValue::from(true)),
        ]
        .into_iter()
        .collect()
    }

    /// Host with `ping`/`roll` commands and `util`/`fun` groups.
    pub fn sample_host() -> MockHost {
        MockHost::with_registry(["ping", "roll"], ["util", "fun"])
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Custom assertion functions for guildsync-specific validation.

    use super::*;

    /// Assert that a result failed because the provider is not initialized.
    #[track_caller]
    pub fn assert_not_initialized<T: std::fmt::Debug>(result: &SettingsResult<T>) {
        match result {
            Err(SettingsError::Provider(ProviderError::NotInitialized)) => {}
            other => panic!("Expected NotInitialized, got: {:?}", other),
        }
    }

    /// Assert that a result is a store error.
    #[track_caller]
    pub fn assert_store_error<T: std::fmt::Debug>(result: &SettingsResult<T>) {
        match result {
            Err(SettingsError::Store(_)) => {}
            other => panic!("Expected Store error, got: {:?}", other),
        }
    }

    /// Assert that the store holds exactly `record` for `tenant`.
    #[track_caller]
    pub fn assert_persisted(
        store: &InMemoryDocumentStore,
        collection: &str,
        tenant: &TenantId,
        record: &SettingsRecord,
    ) {
        let expected = record.to_document(&tenant.storage_id());
        let found = store
            .documents(collection)
            .into_iter()
            .find(|doc| doc.get("id") == expected.get("id"));
        assert_eq!(found.as_ref(), Some(&expected), "persisted record of {tenant}");
    }
}

// ============================================================================
// TESTS
// ============================================================================
