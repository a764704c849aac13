//! Hook through which the cache announces global-scope changes.

use async_trait::async_trait;

use crate::setting::SettingValue;

/// Receives every mutation of the `"global"` tenant made through this
/// process's write path.
///
/// Implementations must not fail the write: delivery problems are theirs to
/// log and drop. The cache awaits the call before the write returns, so
/// slow delivery has to be handed off rather than awaited here.
#[async_trait]
pub trait ShardNotifier: Send + Sync {
    /// `value` is `None` when the key was unset.
    async fn global_changed(&self, key: &str, value: Option<&SettingValue>);
}
