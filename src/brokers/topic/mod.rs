//! Topics: named, partitioned, retention-bounded logs.
//!
//! Two storage variants sit behind the same `Topic` contract:
//! - `MemoryTopic`: ordered map per partition, offsets start at 1.
//! - `DiskTopic`: time-rolled segment files per partition, offsets start at 0.
//!
//! `TopicManager` routes protocol requests and composes the primitives below
//! into long-polling pull/find.

pub mod cleaner;
pub mod commands;
pub mod disk;
pub mod errors;
pub mod memory;
pub mod message;
pub mod pending;
pub mod record;
pub mod subscribe;
pub mod topic_manager;

use std::collections::HashMap;
use std::sync::Arc;

pub use cleaner::TopicCleaner;
pub use commands::TopicCommand;
pub use disk::DiskTopic;
pub use errors::BrokerError;
pub use memory::MemoryTopic;
pub use message::{Message, MessageType};
pub use record::TopicRecord;
pub use subscribe::{SubscribeManager, Waiter};
pub use topic_manager::TopicManager;

/// Storage contract shared by every topic variant.
///
/// Every operation is safe to call concurrently. Unknown partitions behave
/// as empty ones.
pub trait Topic: Send + Sync {
    fn name(&self) -> &str;

    /// Appends a message, stamps its `offset` header and returns the offset.
    fn push(&self, partition: &str, message: Message) -> Result<u64, BrokerError>;

    /// Next unexpired record at the client's cursor, without advancing it.
    fn peek(&self, partition: &str, client_id: &str) -> Option<TopicRecord>;

    /// Marks `offset` as consumed by the client.
    fn commit(&self, partition: &str, client_id: &str, offset: u64);

    /// First unexpired record whose header contains every condition pair.
    fn find(&self, partition: &str, condition: &HashMap<String, String>) -> Option<u64>;

    /// Moves the client's cursor. Returns `false` when the offset is rejected.
    fn seek(&self, partition: &str, client_id: &str, offset: u64) -> bool;

    /// Records currently held by the partition. Memory topics count expired
    /// records until the next clean; disk topics count valid segments only.
    fn count(&self, partition: &str) -> usize;

    /// Drops expired data.
    fn clean(&self);

    fn subscriptions(&self) -> &SubscribeManager;

    fn subscribe(&self, partition: &str, waiter: Arc<dyn Waiter>) -> u64 {
        self.subscriptions().subscribe(partition, waiter)
    }

    fn unsubscribe(&self, partition: &str, key: u64) {
        self.subscriptions().unsubscribe(partition, key)
    }

    fn notify(&self, partition: &str) {
        self.subscriptions().notify(partition)
    }
}
