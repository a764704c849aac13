//! guildsync Shard - Cross-Process Propagation of Global Settings
//!
//! Shards of the host application do not share memory. When a key of the
//! `"global"` tenant changes on one shard, a [`ShardMessage`] is handed to a
//! [`BroadcastEval`] transport, and every sibling runs the fixed
//! [`ShardReceiver`] handler on it. Siblings whose shard identifiers overlap
//! the sender's skip the message.
//!
//! Delivery is best effort: no acknowledgement, no retry, no ordering.

pub mod broadcaster;
pub mod bus;
pub mod message;
pub mod receiver;

pub use broadcaster::{BroadcastEval, ShardBroadcaster};
pub use bus::LocalShardBus;
pub use message::ShardMessage;
pub use receiver::ShardReceiver;
