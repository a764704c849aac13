//! In-process sibling transport.
//!
//! Several shards hosted by one process (or a test) share a tokio broadcast
//! channel. Messages travel serialised, exactly as they would between
//! processes.

use async_trait::async_trait;
use guildsync_core::ShardError;
use tokio::sync::broadcast;
use tracing::debug;

use crate::broadcaster::BroadcastEval;
use crate::message::ShardMessage;

/// Broadcast channel carrying serialised [`ShardMessage`]s.
#[derive(Clone)]
pub struct LocalShardBus {
    tx: broadcast::Sender<String>,
}

impl LocalShardBus {
    /// `capacity` messages are buffered before slow receivers start lagging.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Receive every message sent after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<String> {
        self.tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for LocalShardBus {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl BroadcastEval for LocalShardBus {
    async fn broadcast_eval(&self, message: &ShardMessage) -> Result<(), ShardError> {
        let payload = message.to_json()?;
        let receivers = self.tx.send(payload).map_err(|_| ShardError::Transport {
            reason: "no shard is listening".to_string(),
        })?;
        debug!(message_id = %message.id, receivers, "Published shard message");
        Ok(())
    }
}

impl std::fmt::Debug for LocalShardBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalShardBus")
            .field("receivers", &self.tx.receiver_count())
            .finish()
    }
}
