//! Receiving side of cross-shard propagation.

use std::collections::BTreeSet;
use std::sync::Arc;

use guildsync_core::{ShardError, ShardId};
use guildsync_storage::{DocumentStore, SettingsCache};
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::bus::LocalShardBus;
use crate::message::ShardMessage;

/// Fixed handler applying sibling changes to the local global record.
///
/// Never persists and never re-broadcasts: the sender already did both.
pub struct ShardReceiver<S: DocumentStore> {
    shard_ids: BTreeSet<ShardId>,
    cache: Arc<SettingsCache<S>>,
}

impl<S: DocumentStore> ShardReceiver<S> {
    pub fn new(shard_ids: BTreeSet<ShardId>, cache: Arc<SettingsCache<S>>) -> Self {
        Self { shard_ids, cache }
    }

    /// Apply one message. Returns whether the local cache changed.
    pub fn handle(&self, message: &ShardMessage) -> bool {
        if message.overlaps(&self.shard_ids) {
            debug!(message_id = %message.id, "Skipping shard message from an overlapping shard");
            return false;
        }
        match self.cache.apply_remote(&message.key, message.value.clone()) {
            Ok(()) => {
                debug!(
                    message_id = %message.id,
                    key = %message.key,
                    unset = message.value.is_none(),
                    "Applied global setting from sibling shard"
                );
                true
            }
            Err(e) => {
                warn!(message_id = %message.id, error = %e, "Failed to apply shard message");
                false
            }
        }
    }

    /// Decode and apply a serialised message.
    pub fn handle_payload(&self, payload: &str) -> Result<bool, ShardError> {
        let message = ShardMessage::from_json(payload)?;
        Ok(self.handle(&message))
    }
}

impl<S: DocumentStore + 'static> ShardReceiver<S> {
    /// Listen on `bus` until it closes or the returned task is aborted.
    ///
    /// The subscription is taken before this returns, so every message
    /// published afterwards is seen.
    pub fn spawn(self: Arc<Self>, bus: &LocalShardBus) -> JoinHandle<()> {
        let mut rx = bus.subscribe();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(payload) => {
                        if let Err(e) = self.handle_payload(&payload) {
                            warn!(error = %e, "Dropped undecodable shard message");
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Shard receiver lagged, messages were dropped");
                    }
                    Err(RecvError::Closed) => {
                        info!("Shard bus closed");
                        break;
                    }
                }
            }
        })
    }
}
