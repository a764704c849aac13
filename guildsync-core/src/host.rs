//! Contracts with the host application's object model.
//!
//! The settings core never reaches into host objects directly. Anything it
//! needs to read is exposed through [`HostRuntime`], and anything it writes
//! goes through the typed setters of [`SettingsTarget`].

use std::sync::Arc;

/// A registered command, as far as settings are concerned.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandInfo {
    pub name: String,
}

impl CommandInfo {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// A registered command group.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupInfo {
    pub id: String,
}

impl GroupInfo {
    pub fn new(id: impl Into<String>) -> Self {
        Self { id: id.into() }
    }
}

/// Typed setters implemented by anything settings can be projected onto.
///
/// A live guild implements this for its own overrides; the host implements
/// it once more for the process-wide defaults.
pub trait SettingsTarget: Send + Sync {
    fn set_prefix(&self, prefix: &str);

    fn set_command_enabled(&self, command: &CommandInfo, enabled: bool);

    fn set_group_enabled(&self, group: &GroupInfo, enabled: bool);
}

/// What the host application exposes to the settings core.
pub trait HostRuntime: Send + Sync {
    /// Every command currently known to the registry.
    fn commands(&self) -> Vec<CommandInfo>;

    /// Every group currently known to the registry.
    fn groups(&self) -> Vec<GroupInfo>;

    /// A currently available guild, if any.
    fn guild(&self, id: &str) -> Option<Arc<dyn SettingsTarget>>;

    /// The process-wide default scope.
    fn defaults(&self) -> Arc<dyn SettingsTarget>;

    fn is_available(&self, id: &str) -> bool {
        self.guild(id).is_some()
    }
}
