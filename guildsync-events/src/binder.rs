//! Binding of lifecycle events to cache writes and projections.
//!
//! | Event                    | Reaction                                          |
//! |--------------------------|---------------------------------------------------|
//! | `prefix-changed`         | `set(tenant, "prefix", prefix)` (unset on `None`) |
//! | `command-status-changed` | `set(tenant, "cmd-<name>", enabled)`              |
//! | `group-status-changed`   | `set(tenant, "grp-<id>", enabled)`                |
//! | `tenant-available`       | apply the guild's cached record                   |
//! | `command-registered`     | apply the command flag of every applicable record |
//! | `group-registered`       | apply the group flag of every applicable record   |
//!
//! Handlers never fail the emitter: a write error is logged and dropped.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::FutureExt;
use guildsync_core::{
    CommandInfo, GroupInfo, SettingKey, SettingValue, SettingsRecord, SettingsResult, TenantId,
    PREFIX_KEY,
};
use guildsync_storage::{DocumentStore, SettingsCache};
use tracing::{debug, warn};

use crate::applier::{ApplyScope, RuntimeApplier};
use crate::emitter::{EventEmitter, EventHandler, ListenerId};
use crate::event::{EventName, LifecycleEvent};

struct Reactor<S: DocumentStore> {
    cache: Arc<SettingsCache<S>>,
    applier: RuntimeApplier,
}

impl<S: DocumentStore> Reactor<S> {
    async fn react(&self, event: LifecycleEvent) -> SettingsResult<()> {
        match event {
            LifecycleEvent::PrefixChanged { tenant, prefix } => match prefix {
                Some(prefix) => {
                    self.cache
                        .set(&tenant, PREFIX_KEY, SettingValue::Text(prefix))
                        .await?;
                }
                None => {
                    self.cache.remove(&tenant, PREFIX_KEY).await?;
                }
            },
            LifecycleEvent::CommandStatusChanged {
                tenant,
                command,
                enabled,
            } => {
                self.cache
                    .set(&tenant, &SettingKey::command(&command.name), enabled.into())
                    .await?;
            }
            LifecycleEvent::GroupStatusChanged {
                tenant,
                group,
                enabled,
            } => {
                self.cache
                    .set(&tenant, &SettingKey::group(&group.id), enabled.into())
                    .await?;
            }
            LifecycleEvent::TenantAvailable { guild_id } => self.tenant_available(&guild_id)?,
            LifecycleEvent::CommandRegistered { command } => self.command_registered(&command),
            LifecycleEvent::GroupRegistered { group } => self.group_registered(&group),
        }
        Ok(())
    }

    fn tenant_available(&self, guild_id: &str) -> SettingsResult<()> {
        let tenant = TenantId::guild(guild_id)?;
        let Some(settings) = self.cache.record(&tenant) else {
            return Ok(());
        };
        if let Some(scope) = self.applier.scope_for(&tenant) {
            self.applier.apply_tenant(&scope, &settings);
            debug!(tenant = %tenant, "Applied settings to available guild");
        }
        Ok(())
    }

    fn command_registered(&self, command: &CommandInfo) {
        for (scope, settings) in self.applicable_records() {
            self.applier.apply_command(&scope, command, &settings);
        }
    }

    fn group_registered(&self, group: &GroupInfo) {
        for (scope, settings) in self.applicable_records() {
            self.applier.apply_group(&scope, group, &settings);
        }
    }

    /// Global plus every currently available guild.
    fn applicable_records(&self) -> Vec<(ApplyScope, SettingsRecord)> {
        self.cache
            .tenants()
            .into_iter()
            .filter_map(|tenant| {
                let scope = self.applier.scope_for(&tenant)?;
                let settings = self.cache.record(&tenant)?;
                Some((scope, settings))
            })
            .collect()
    }
}

/// Attaches the settings handlers to an emitter and detaches exactly those.
pub struct EventBinder<S: DocumentStore + 'static> {
    reactor: Arc<Reactor<S>>,
    emitter: Arc<dyn EventEmitter>,
    subscriptions: Mutex<Vec<(EventName, ListenerId)>>,
}

impl<S: DocumentStore + 'static> EventBinder<S> {
    pub fn new(
        cache: Arc<SettingsCache<S>>,
        applier: RuntimeApplier,
        emitter: Arc<dyn EventEmitter>,
    ) -> Self {
        Self {
            reactor: Arc::new(Reactor { cache, applier }),
            emitter,
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Attach one handler per event.
    ///
    /// Binding an already bound binder changes nothing. Returns the number of
    /// attached handlers.
    pub fn bind(&self) -> usize {
        let mut subscriptions = self.subscriptions();
        if !subscriptions.is_empty() {
            return subscriptions.len();
        }
        for name in EventName::ALL {
            let id = self.emitter.on(name, self.handler(name));
            subscriptions.push((name, id));
        }
        debug!(handlers = subscriptions.len(), "Bound settings event handlers");
        subscriptions.len()
    }

    /// Detach every handler this binder attached. Returns how many were
    /// detached; a second call returns 0.
    pub fn unbind(&self) -> usize {
        let detached: Vec<_> = self.subscriptions().drain(..).collect();
        if detached.is_empty() {
            return 0;
        }
        for (name, id) in &detached {
            if !self.emitter.remove_listener(*name, *id) {
                warn!(event = %name, listener = %id, "Handler was already detached");
            }
        }
        debug!(handlers = detached.len(), "Unbound settings event handlers");
        detached.len()
    }

    pub fn is_bound(&self) -> bool {
        !self.subscriptions().is_empty()
    }

    fn handler(&self, name: EventName) -> EventHandler {
        let reactor = self.reactor.clone();
        Arc::new(move |event: LifecycleEvent| {
            let reactor = reactor.clone();
            async move {
                if let Err(e) = reactor.react(event).await {
                    warn!(event = %name, error = %e, "Settings event handler failed");
                }
            }
            .boxed()
        })
    }

    fn subscriptions(&self) -> MutexGuard<'_, Vec<(EventName, ListenerId)>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emitter::InProcessEmitter;
    use guildsync_core::SettingsConfig;
    use guildsync_storage::{InMemoryDocumentStore, SettingsRepository};
    use guildsync_test_utils::MockHost;

    struct Fixture {
        store: Arc<InMemoryDocumentStore>,
        cache: Arc<SettingsCache<InMemoryDocumentStore>>,
        host: Arc<MockHost>,
        emitter: Arc<InProcessEmitter>,
        binder: EventBinder<InMemoryDocumentStore>,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryDocumentStore::new());
        let repository = SettingsRepository::new(store.clone(), &SettingsConfig::default());
        repository.ensure_schema().await.unwrap();
        let cache = Arc::new(SettingsCache::new(repository));
        let host = Arc::new(MockHost::with_registry(["ping"], ["util"]));
        let emitter = Arc::new(InProcessEmitter::new());
        let binder = EventBinder::new(
            cache.clone(),
            RuntimeApplier::new(host.clone()),
            emitter.clone(),
        );
        Fixture {
            store,
            cache,
            host,
            emitter,
            binder,
        }
    }

    fn guild(id: &str) -> TenantId {
        TenantId::guild(id).unwrap()
    }

    #[tokio::test]
    async fn test_bind_is_idempotent_and_unbind_detaches_exactly_its_handlers() {
        let f = fixture().await;
        let foreign = f.emitter.on(
            EventName::PrefixChanged,
            Arc::new(|_: LifecycleEvent| async {}.boxed()),
        );

        assert_eq!(f.binder.bind(), 6);
        assert_eq!(f.binder.bind(), 6);
        assert_eq!(f.emitter.listener_count(EventName::PrefixChanged), 2);

        assert_eq!(f.binder.unbind(), 6);
        assert_eq!(f.binder.unbind(), 0);
        assert!(!f.binder.is_bound());
        for name in EventName::ALL {
            let expected = usize::from(name == EventName::PrefixChanged);
            assert_eq!(f.emitter.listener_count(name), expected);
        }
        assert!(f.emitter.remove_listener(EventName::PrefixChanged, foreign));
    }

    #[tokio::test]
    async fn test_status_events_write_reserved_keys() {
        let f = fixture().await;
        f.binder.bind();

        f.emitter
            .emit(LifecycleEvent::PrefixChanged {
                tenant: guild("g1"),
                prefix: Some("!".into()),
            })
            .await;
        f.emitter
            .emit(LifecycleEvent::CommandStatusChanged {
                tenant: guild("g1"),
                command: CommandInfo::new("ping"),
                enabled: false,
            })
            .await;
        f.emitter
            .emit(LifecycleEvent::GroupStatusChanged {
                tenant: TenantId::Global,
                group: GroupInfo::new("util"),
                enabled: true,
            })
            .await;

        assert_eq!(f.cache.get(&guild("g1"), "prefix", "?"), SettingValue::from("!"));
        assert_eq!(f.cache.get(&guild("g1"), "cmd-ping", true), SettingValue::from(false));
        assert_eq!(f.cache.get(&TenantId::Global, "grp-util", false), SettingValue::from(true));
        assert_eq!(f.store.documents("guilds").len(), 2);
    }

    #[tokio::test]
    async fn test_prefix_reset_unsets_key() {
        let f = fixture().await;
        f.binder.bind();
        f.cache.set(&guild("g1"), "prefix", "!".into()).await.unwrap();

        f.emitter
            .emit(LifecycleEvent::PrefixChanged {
                tenant: guild("g1"),
                prefix: None,
            })
            .await;

        assert_eq!(f.cache.value(&guild("g1"), "prefix"), None);
    }

    #[tokio::test]
    async fn test_tenant_available_applies_cached_record() {
        let f = fixture().await;
        f.binder.bind();
        f.cache.set(&guild("g1"), "prefix", "$".into()).await.unwrap();
        f.cache.set(&guild("g1"), "cmd-ping", false.into()).await.unwrap();

        let target = f.host.add_guild("g1");
        f.emitter
            .emit(LifecycleEvent::TenantAvailable {
                guild_id: "g1".into(),
            })
            .await;

        assert_eq!(target.prefix(), Some("$".to_string()));
        assert_eq!(target.command_enabled("ping"), Some(false));
    }

    #[tokio::test]
    async fn test_tenant_available_without_record_is_noop() {
        let f = fixture().await;
        f.binder.bind();
        let target = f.host.add_guild("g2");

        f.emitter
            .emit(LifecycleEvent::TenantAvailable {
                guild_id: "g2".into(),
            })
            .await;

        assert_eq!(target.writes(), 0);
    }

    #[tokio::test]
    async fn test_command_registered_reaches_global_and_available_guilds() {
        let f = fixture().await;
        f.binder.bind();
        f.cache.set(&TenantId::Global, "cmd-roll", true.into()).await.unwrap();
        f.cache.set(&guild("online"), "cmd-roll", false.into()).await.unwrap();
        f.cache.set(&guild("offline"), "cmd-roll", false.into()).await.unwrap();
        let online = f.host.add_guild("online");

        f.emitter
            .emit(LifecycleEvent::CommandRegistered {
                command: CommandInfo::new("roll"),
            })
            .await;

        assert_eq!(f.host.defaults_target().command_enabled("roll"), Some(true));
        assert_eq!(online.command_enabled("roll"), Some(false));
    }

    #[tokio::test]
    async fn test_group_registered_applies_group_flags() {
        let f = fixture().await;
        f.binder.bind();
        f.cache.set(&guild("g1"), "grp-fun", false.into()).await.unwrap();
        let target = f.host.add_guild("g1");

        f.emitter
            .emit(LifecycleEvent::GroupRegistered {
                group: GroupInfo::new("fun"),
            })
            .await;

        assert_eq!(target.group_enabled("fun"), Some(false));
    }

    #[tokio::test]
    async fn test_handler_errors_are_swallowed() {
        let f = fixture().await;
        f.binder.bind();
        f.store.fail_next_writes(1);

        let ran = f
            .emitter
            .emit(LifecycleEvent::PrefixChanged {
                tenant: guild("g1"),
                prefix: Some("!".into()),
            })
            .await;

        assert_eq!(ran, 1);
        // Cache stays ahead of the failed write.
        assert_eq!(f.cache.get(&guild("g1"), "prefix", "?"), SettingValue::from("!"));
        assert!(f.store.documents("guilds").is_empty());
    }

    #[tokio::test]
    async fn test_unbound_binder_ignores_events() {
        let f = fixture().await;
        f.binder.bind();
        f.binder.unbind();

        f.emitter
            .emit(LifecycleEvent::PrefixChanged {
                tenant: guild("g1"),
                prefix: Some("!".into()),
            })
            .await;
        assert!(!f.cache.contains(&guild("g1")));
    }
}
