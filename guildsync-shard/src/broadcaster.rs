//! Sending side of cross-shard propagation.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use guildsync_core::{SettingValue, SettingsConfig, ShardError, ShardId, ShardNotifier};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::message::ShardMessage;

/// The host's "run this on every shard" capability.
///
/// Returns once the message has been handed off. Nothing about the
/// siblings' outcome is reported.
#[async_trait]
pub trait BroadcastEval: Send + Sync {
    async fn broadcast_eval(&self, message: &ShardMessage) -> Result<(), ShardError>;
}

/// Announces global changes of this process to its siblings.
#[derive(Clone)]
pub struct ShardBroadcaster {
    shard_ids: BTreeSet<ShardId>,
    transport: Arc<dyn BroadcastEval>,
}

impl ShardBroadcaster {
    pub fn new(shard_ids: BTreeSet<ShardId>, transport: Arc<dyn BroadcastEval>) -> Self {
        Self {
            shard_ids,
            transport,
        }
    }

    pub fn from_config(config: &SettingsConfig, transport: Arc<dyn BroadcastEval>) -> Self {
        Self::new(config.shard_ids.clone(), transport)
    }

    pub fn shard_ids(&self) -> &BTreeSet<ShardId> {
        &self.shard_ids
    }

    /// Hand one change to the transport.
    ///
    /// Returns the message id, or `None` when this process is not sharded
    /// and nothing was sent.
    pub async fn broadcast(
        &self,
        key: &str,
        value: Option<&SettingValue>,
    ) -> Result<Option<Uuid>, ShardError> {
        if self.shard_ids.is_empty() {
            return Ok(None);
        }
        let message = ShardMessage::new(self.shard_ids.clone(), key, value.cloned());
        self.transport.broadcast_eval(&message).await?;
        Ok(Some(message.id))
    }
}

/// Delivery runs on its own task, so a stalled transport never holds up
/// the write that triggered it.
#[async_trait]
impl ShardNotifier for ShardBroadcaster {
    async fn global_changed(&self, key: &str, value: Option<&SettingValue>) {
        if self.shard_ids.is_empty() {
            return;
        }
        let broadcaster = self.clone();
        let key = key.to_string();
        let value = value.cloned();
        tokio::spawn(async move {
            match broadcaster.broadcast(&key, value.as_ref()).await {
                Ok(Some(id)) => debug!(message_id = %id, key = %key, "Broadcast global setting change"),
                Ok(None) => {}
                Err(e) => warn!(key = %key, error = %e, "Dropped global setting broadcast"),
            }
        });
    }
}

impl std::fmt::Debug for ShardBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ShardBroadcaster")
            .field("shard_ids", &self.shard_ids)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Default)]
    struct Capture {
        sent: Mutex<Vec<ShardMessage>>,
        fail: bool,
        delivered: Notify,
    }

    #[async_trait]
    impl BroadcastEval for Capture {
        async fn broadcast_eval(&self, message: &ShardMessage) -> Result<(), ShardError> {
            if self.fail {
                return Err(ShardError::Transport {
                    reason: "unreachable".to_string(),
                });
            }
            self.sent.lock().unwrap().push(message.clone());
            self.delivered.notify_one();
            Ok(())
        }
    }

    /// Transport that never completes.
    struct Stalled;

    #[async_trait]
    impl BroadcastEval for Stalled {
        async fn broadcast_eval(&self, _message: &ShardMessage) -> Result<(), ShardError> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_unsharded_process_sends_nothing() {
        let capture = Arc::new(Capture::default());
        let broadcaster = ShardBroadcaster::from_config(&SettingsConfig::default(), capture.clone());

        assert_eq!(broadcaster.broadcast("prefix", None).await.unwrap(), None);
        assert!(capture.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_message_carries_origin_and_change() {
        let capture = Arc::new(Capture::default());
        let config = SettingsConfig::default().with_shard_ids([0, 1]);
        let broadcaster = ShardBroadcaster::from_config(&config, capture.clone());

        broadcaster
            .global_changed("prefix", Some(&SettingValue::from("!")))
            .await;
        tokio::time::timeout(Duration::from_secs(1), capture.delivered.notified())
            .await
            .expect("message should be handed to the transport");

        let sent = capture.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].origin_shard_ids, BTreeSet::from([0, 1]));
        assert_eq!(sent[0].key, "prefix");
        assert_eq!(sent[0].value, Some(SettingValue::from("!")));
    }

    #[tokio::test]
    async fn test_transport_failure_is_swallowed_by_notifier() {
        let capture = Arc::new(Capture {
            fail: true,
            ..Default::default()
        });
        let broadcaster = ShardBroadcaster::new([4].into_iter().collect(), capture);

        assert!(broadcaster.broadcast("prefix", None).await.is_err());
        // Must return normally.
        broadcaster.global_changed("prefix", None).await;
    }

    #[tokio::test]
    async fn test_stalled_transport_does_not_block_notifier() {
        let broadcaster = ShardBroadcaster::new([1].into_iter().collect(), Arc::new(Stalled));

        tokio::time::timeout(
            Duration::from_secs(1),
            broadcaster.global_changed("prefix", Some(&SettingValue::from("!"))),
        )
        .await
        .expect("notifier must return without waiting for delivery");
    }
}
