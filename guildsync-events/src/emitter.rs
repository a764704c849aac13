//! Event subscription contract and an in-process implementation.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::BoxFuture;
use tracing::debug;

use crate::event::{EventName, LifecycleEvent};

/// Handle returned by [`EventEmitter::on`], used to detach that listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

impl ListenerId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ListenerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "listener-{}", self.0)
    }
}

/// An event listener.
pub type EventHandler = Arc<dyn Fn(LifecycleEvent) -> BoxFuture<'static, ()> + Send + Sync>;

/// The host's event-subscription mechanism.
pub trait EventEmitter: Send + Sync {
    /// Attach `handler` to `name`.
    fn on(&self, name: EventName, handler: EventHandler) -> ListenerId;

    /// Detach one listener. Returns whether it was attached.
    fn remove_listener(&self, name: EventName, id: ListenerId) -> bool;

    fn listener_count(&self, name: EventName) -> usize;
}

/// Emitter living in the same process as its listeners.
///
/// `emit` awaits every listener of the event in registration order.
#[derive(Default)]
pub struct InProcessEmitter {
    listeners: Mutex<HashMap<EventName, Vec<(ListenerId, EventHandler)>>>,
    next_id: AtomicU64,
}

impl InProcessEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver `event` to its listeners. Returns how many ran.
    pub async fn emit(&self, event: LifecycleEvent) -> usize {
        let name = event.name();
        // Snapshot so a listener may (un)subscribe while running.
        let handlers: Vec<EventHandler> = self
            .lock()
            .get(&name)
            .map(|list| list.iter().map(|(_, h)| h.clone()).collect())
            .unwrap_or_default();

        debug!(event = %name, listeners = handlers.len(), "Emitting lifecycle event");
        for handler in &handlers {
            handler(event.clone()).await;
        }
        handlers.len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<EventName, Vec<(ListenerId, EventHandler)>>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl EventEmitter for InProcessEmitter {
    fn on(&self, name: EventName, handler: EventHandler) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.lock().entry(name).or_default().push((id, handler));
        id
    }

    fn remove_listener(&self, name: EventName, id: ListenerId) -> bool {
        let mut listeners = self.lock();
        let Some(list) = listeners.get_mut(&name) else {
            return false;
        };
        let before = list.len();
        list.retain(|(existing, _)| *existing != id);
        before != list.len()
    }

    fn listener_count(&self, name: EventName) -> usize {
        self.lock().get(&name).map_or(0, Vec::len)
    }
}

impl fmt::Debug for InProcessEmitter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: HashMap<EventName, usize> = self
            .lock()
            .iter()
            .map(|(name, list)| (*name, list.len()))
            .collect();
        f.debug_struct("InProcessEmitter")
            .field("listeners", &counts)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::FutureExt;
    use guildsync_core::GroupInfo;

    fn recording_handler(log: Arc<Mutex<Vec<String>>>, tag: &'static str) -> EventHandler {
        Arc::new(move |event: LifecycleEvent| {
            let log = log.clone();
            async move {
                log.lock().unwrap().push(format!("{tag}:{}", event.name()));
            }
            .boxed()
        })
    }

    fn group_registered() -> LifecycleEvent {
        LifecycleEvent::GroupRegistered {
            group: GroupInfo::new("util"),
        }
    }

    #[tokio::test]
    async fn test_emit_runs_listeners_in_order() {
        let emitter = InProcessEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        emitter.on(EventName::GroupRegistered, recording_handler(log.clone(), "a"));
        emitter.on(EventName::GroupRegistered, recording_handler(log.clone(), "b"));
        emitter.on(EventName::CommandRegistered, recording_handler(log.clone(), "c"));

        assert_eq!(emitter.emit(group_registered()).await, 2);
        assert_eq!(
            *log.lock().unwrap(),
            vec!["a:group-registered", "b:group-registered"]
        );
    }

    #[tokio::test]
    async fn test_remove_listener_only_detaches_that_listener() {
        let emitter = InProcessEmitter::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let first = emitter.on(EventName::GroupRegistered, recording_handler(log.clone(), "a"));
        emitter.on(EventName::GroupRegistered, recording_handler(log.clone(), "b"));

        assert!(emitter.remove_listener(EventName::GroupRegistered, first));
        assert!(!emitter.remove_listener(EventName::GroupRegistered, first));
        assert!(!emitter.remove_listener(EventName::PrefixChanged, first));
        assert_eq!(emitter.listener_count(EventName::GroupRegistered), 1);

        emitter.emit(group_registered()).await;
        assert_eq!(*log.lock().unwrap(), vec!["b:group-registered"]);
    }

    #[tokio::test]
    async fn test_emit_without_listeners() {
        let emitter = InProcessEmitter::new();
        assert_eq!(emitter.emit(group_registered()).await, 0);
        assert_eq!(emitter.listener_count(EventName::GroupRegistered), 0);
    }
}
