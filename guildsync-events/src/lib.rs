//! guildsync Events - Lifecycle Events, Runtime Applier and Event Binder
//!
//! The host application announces lifecycle changes (prefix edits, command
//! and group toggles, guilds becoming available, commands and groups being
//! registered) through an [`EventEmitter`]. The [`EventBinder`] turns each
//! of them into a cache write or a projection through the
//! [`RuntimeApplier`].

pub mod applier;
pub mod binder;
pub mod emitter;
pub mod event;

pub use applier::{ApplyScope, RuntimeApplier};
pub use binder::EventBinder;
pub use emitter::{EventEmitter, EventHandler, InProcessEmitter, ListenerId};
pub use event::{EventName, LifecycleEvent};
