//! Per-tenant write serialisation.

use std::sync::Arc;

use dashmap::DashMap;
use guildsync_core::TenantId;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// One async mutex per tenant, created on first use.
///
/// Entries are never evicted: a writer may still be queued on a mutex that
/// a concurrent eviction would orphan.
#[derive(Debug, Default)]
pub struct TenantLocks {
    locks: DashMap<TenantId, Arc<Mutex<()>>>,
}

impl TenantLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive write access to `tenant`.
    pub async fn acquire(&self, tenant: &TenantId) -> OwnedMutexGuard<()> {
        // Clone the Arc out so no shard guard is held across the await.
        let lock = self
            .locks
            .entry(tenant.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        lock.lock_owned().await
    }

    /// Number of tenants that have been written to.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_same_tenant_is_exclusive() {
        let locks = Arc::new(TenantLocks::new());
        let tenant = TenantId::guild("g1").unwrap();

        let guard = locks.acquire(&tenant).await;
        let waiter = {
            let locks = locks.clone();
            let tenant = tenant.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire(&tenant).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        drop(guard);
        waiter.await.unwrap();
    }

    #[tokio::test]
    async fn test_distinct_tenants_do_not_block() {
        let locks = TenantLocks::new();
        let _a = locks.acquire(&TenantId::Global).await;
        let _b = locks.acquire(&TenantId::guild("g1").unwrap()).await;
        assert_eq!(locks.len(), 2);
    }
}
