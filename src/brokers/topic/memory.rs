//! Memory Topic: one ordered map per partition.
//!
//! Offsets start at 1. Committing a record removes it, so the lowest live
//! offset doubles as the default cursor for new clients.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::brokers::topic::errors::BrokerError;
use crate::brokers::topic::message::{Message, HEADER_OFFSET};
use crate::brokers::topic::record::TopicRecord;
use crate::brokers::topic::subscribe::SubscribeManager;
use crate::brokers::topic::Topic;

pub const DEFAULT_RETENTION_MS: u64 = 3 * 60 * 1000;

#[derive(Default)]
struct MemoryPartition {
    records: BTreeMap<u64, TopicRecord>,
    last_offset: u64,
    cursors: HashMap<String, u64>,
}

impl MemoryPartition {
    fn first_offset(&self) -> u64 {
        self.records.keys().next().copied().unwrap_or(0)
    }
}

pub struct MemoryTopic {
    name: String,
    retention_ms: u64,
    partitions: DashMap<String, Arc<Mutex<MemoryPartition>>>,
    subscriptions: SubscribeManager,
}

impl MemoryTopic {
    pub fn new(name: impl Into<String>, retention_ms: u64) -> Self {
        Self {
            name: name.into(),
            retention_ms,
            partitions: DashMap::new(),
            subscriptions: SubscribeManager::new(),
        }
    }

    pub fn with_default_retention(name: impl Into<String>) -> Self {
        Self::new(name, DEFAULT_RETENTION_MS)
    }

    pub fn retention_ms(&self) -> u64 {
        self.retention_ms
    }

    /// Stored cursor of a client, if it ever peeked, committed or sought.
    pub fn cursor(&self, partition: &str, client_id: &str) -> Option<u64> {
        let partition = self.partition(partition)?;
        let state = partition.lock();
        state.cursors.get(client_id).copied()
    }

    fn partition(&self, partition: &str) -> Option<Arc<Mutex<MemoryPartition>>> {
        self.partitions.get(partition).map(|p| Arc::clone(p.value()))
    }

    fn partition_or_create(&self, partition: &str) -> Arc<Mutex<MemoryPartition>> {
        if let Some(existing) = self.partition(partition) {
            return existing;
        }
        Arc::clone(
            self.partitions
                .entry(partition.to_string())
                .or_default()
                .value(),
        )
    }
}

impl Topic for MemoryTopic {
    fn name(&self) -> &str {
        &self.name
    }

    fn push(&self, partition: &str, mut message: Message) -> Result<u64, BrokerError> {
        let partition = self.partition_or_create(partition);
        let mut state = partition.lock();

        state.last_offset += 1;
        let offset = state.last_offset;
        message.set_header(HEADER_OFFSET, offset);
        state.records.insert(offset, TopicRecord::new(message));
        Ok(offset)
    }

    fn peek(&self, partition: &str, client_id: &str) -> Option<TopicRecord> {
        let partition = self.partition(partition)?;
        let mut state = partition.lock();

        let default = state.first_offset();
        let cursor = state
            .cursors
            .get(client_id)
            .copied()
            .unwrap_or(default)
            .max(default);
        state.cursors.insert(client_id.to_string(), cursor);

        state
            .records
            .get(&cursor)
            .filter(|record| !record.is_expired(self.retention_ms))
            .cloned()
    }

    fn commit(&self, partition: &str, client_id: &str, offset: u64) {
        let Some(partition) = self.partition(partition) else {
            debug!("[MemoryTopic] '{}': commit on unknown partition", self.name);
            return;
        };
        let mut state = partition.lock();
        state.records.remove(&offset);
        state.cursors.insert(client_id.to_string(), offset + 1);
    }

    fn find(&self, partition: &str, condition: &HashMap<String, String>) -> Option<u64> {
        let partition = self.partition(partition)?;
        let state = partition.lock();
        state
            .records
            .iter()
            .find(|(_, record)| !record.is_expired(self.retention_ms) && record.matches(condition))
            .map(|(offset, _)| *offset)
    }

    fn seek(&self, partition: &str, client_id: &str, offset: u64) -> bool {
        let partition = self.partition_or_create(partition);
        partition.lock().cursors.insert(client_id.to_string(), offset);
        true
    }

    fn count(&self, partition: &str) -> usize {
        self.partition(partition)
            .map(|p| p.lock().records.len())
            .unwrap_or(0)
    }

    fn clean(&self) {
        let mut removed = 0;
        for entry in self.partitions.iter() {
            let mut state = entry.value().lock();
            let before = state.records.len();
            let retention = self.retention_ms;
            state.records.retain(|_, record| !record.is_expired(retention));
            removed += before - state.records.len();
        }
        if removed > 0 {
            debug!("[MemoryTopic] '{}': cleaned {} expired records", self.name, removed);
        }
    }

    fn subscriptions(&self) -> &SubscribeManager {
        &self.subscriptions
    }
}
