//! Projection of cached settings onto the host's runtime objects.
//!
//! Pure projection: no I/O, no cache access. A key absent from the record
//! leaves the matching runtime state untouched.

use std::fmt;
use std::sync::Arc;

use guildsync_core::{CommandInfo, GroupInfo, HostRuntime, SettingsRecord, SettingsTarget, TenantId};
use tracing::debug;

/// Where settings are projected.
#[derive(Clone)]
pub enum ApplyScope {
    /// The process-wide defaults.
    Global,
    /// A live guild.
    Tenant(Arc<dyn SettingsTarget>),
}

impl fmt::Debug for ApplyScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyScope::Global => f.write_str("Global"),
            ApplyScope::Tenant(_) => f.write_str("Tenant(..)"),
        }
    }
}

/// Stateless applier over the host runtime.
#[derive(Clone)]
pub struct RuntimeApplier {
    host: Arc<dyn HostRuntime>,
}

impl RuntimeApplier {
    pub fn new(host: Arc<dyn HostRuntime>) -> Self {
        Self { host }
    }

    pub fn host(&self) -> &Arc<dyn HostRuntime> {
        &self.host
    }

    /// Scope of a tenant, or `None` when the guild is not available.
    pub fn scope_for(&self, tenant: &TenantId) -> Option<ApplyScope> {
        match tenant {
            TenantId::Global => Some(ApplyScope::Global),
            TenantId::Guild(id) => self.host.guild(id.as_str()).map(ApplyScope::Tenant),
        }
    }

    /// Project prefix, command flags and group flags.
    pub fn apply_tenant(&self, scope: &ApplyScope, settings: &SettingsRecord) {
        if let Some(prefix) = settings.prefix() {
            self.target(scope).set_prefix(prefix);
        }
        for command in self.host.commands() {
            self.apply_command(scope, &command, settings);
        }
        for group in self.host.groups() {
            self.apply_group(scope, &group, settings);
        }
    }

    pub fn apply_command(&self, scope: &ApplyScope, command: &CommandInfo, settings: &SettingsRecord) {
        if let Some(enabled) = settings.command_enabled(&command.name) {
            self.target(scope).set_command_enabled(command, enabled);
        }
    }

    pub fn apply_group(&self, scope: &ApplyScope, group: &GroupInfo, settings: &SettingsRecord) {
        if let Some(enabled) = settings.group_enabled(&group.id) {
            self.target(scope).set_group_enabled(group, enabled);
        }
    }

    /// Project every record whose tenant is global or currently available.
    ///
    /// Returns the number of records applied.
    pub fn apply_all<'a, I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = (&'a TenantId, &'a SettingsRecord)>,
    {
        let mut applied = 0;
        for (tenant, settings) in records {
            match self.scope_for(tenant) {
                Some(scope) => {
                    self.apply_tenant(&scope, settings);
                    applied += 1;
                }
                None => debug!(tenant = %tenant, "Skipping settings of unavailable guild"),
            }
        }
        applied
    }

    fn target(&self, scope: &ApplyScope) -> Arc<dyn SettingsTarget> {
        match scope {
            ApplyScope::Global => self.host.defaults(),
            ApplyScope::Tenant(target) => target.clone(),
        }
    }
}

impl fmt::Debug for RuntimeApplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeApplier").finish_non_exhaustive()
    }
}
