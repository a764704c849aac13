//! Resident settings cache.
//!
//! Every tenant record is held in memory after the startup load. The store
//! is only written through this module, so no external invalidation exists.

pub mod settings_cache;
pub mod tenant_lock;

pub use settings_cache::SettingsCache;
pub use tenant_lock::TenantLocks;
