//! Lifecycle event names and payloads.

use std::fmt;

use guildsync_core::{CommandInfo, GroupInfo, TenantId};

/// The lifecycle events the settings layer listens to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventName {
    PrefixChanged,
    CommandStatusChanged,
    GroupStatusChanged,
    TenantAvailable,
    CommandRegistered,
    GroupRegistered,
}

impl EventName {
    /// Every event, in binding order.
    pub const ALL: [EventName; 6] = [
        EventName::PrefixChanged,
        EventName::CommandStatusChanged,
        EventName::GroupStatusChanged,
        EventName::TenantAvailable,
        EventName::CommandRegistered,
        EventName::GroupRegistered,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventName::PrefixChanged => "prefix-changed",
            EventName::CommandStatusChanged => "command-status-changed",
            EventName::GroupStatusChanged => "group-status-changed",
            EventName::TenantAvailable => "tenant-available",
            EventName::CommandRegistered => "command-registered",
            EventName::GroupRegistered => "group-registered",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A lifecycle event emitted by the host.
///
/// Status events name their tenant with a [`TenantId`], so a change of the
/// process-wide defaults arrives as [`TenantId::Global`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LifecycleEvent {
    /// `prefix` of `None` resets the tenant to the inherited prefix.
    PrefixChanged {
        tenant: TenantId,
        prefix: Option<String>,
    },
    CommandStatusChanged {
        tenant: TenantId,
        command: CommandInfo,
        enabled: bool,
    },
    GroupStatusChanged {
        tenant: TenantId,
        group: GroupInfo,
        enabled: bool,
    },
    /// A guild joined or came back online.
    TenantAvailable { guild_id: String },
    CommandRegistered { command: CommandInfo },
    GroupRegistered { group: GroupInfo },
}

impl LifecycleEvent {
    pub fn name(&self) -> EventName {
        match self {
            LifecycleEvent::PrefixChanged { .. } => EventName::PrefixChanged,
            LifecycleEvent::CommandStatusChanged { .. } => EventName::CommandStatusChanged,
            LifecycleEvent::GroupStatusChanged { .. } => EventName::GroupStatusChanged,
            LifecycleEvent::TenantAvailable { .. } => EventName::TenantAvailable,
            LifecycleEvent::CommandRegistered { .. } => EventName::CommandRegistered,
            LifecycleEvent::GroupRegistered { .. } => EventName::GroupRegistered,
        }
    }
}
