//! Disk Topic: one `SegmentManager` per partition under `<root>/<topic>/<partition>/`.
//!
//! Offsets start at 0. Commits only move cursors; data leaves through
//! retention alone, so several clients can read the same history.

pub mod segment;
pub mod segment_manager;

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::brokers::topic::commands::validate_path_name;
use crate::brokers::topic::errors::BrokerError;
use crate::brokers::topic::message::{Message, HEADER_PARTITION, HEADER_TOPIC_NAME};
use crate::brokers::topic::record::TopicRecord;
use crate::brokers::topic::subscribe::SubscribeManager;
use crate::brokers::topic::Topic;

pub use segment::{Segment, SegmentMeta};
pub use segment_manager::SegmentManager;

pub const DEFAULT_SEGMENT_DURATION_MS: u64 = 10 * 60 * 1000;
pub const DEFAULT_RETENTION_MS: u64 = 30 * 60 * 1000;

pub struct DiskTopic {
    name: String,
    dir: PathBuf,
    duration_ms: u64,
    retention_ms: u64,
    partitions: DashMap<String, Arc<SegmentManager>>,
    subscriptions: SubscribeManager,
}

impl DiskTopic {
    /// Opens `<root>/<name>` and restores every partition found in it.
    pub fn open(
        name: impl Into<String>,
        root: impl AsRef<Path>,
        duration_ms: u64,
        retention_ms: u64,
    ) -> Result<Self, BrokerError> {
        let name = name.into();
        validate_path_name(HEADER_TOPIC_NAME, &name)?;
        let dir = root.as_ref().join(&name);
        fs::create_dir_all(&dir)?;

        let partitions = DashMap::new();
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            if !path.is_dir() {
                continue;
            }
            let Some(partition) = path.file_name().and_then(|n| n.to_str()).map(String::from) else {
                warn!("[DiskTopic] '{}': skipping non UTF-8 partition dir {:?}", name, path);
                continue;
            };
            let manager = SegmentManager::open(&path, duration_ms, retention_ms)?;
            partitions.insert(partition, Arc::new(manager));
        }

        info!(
            "[DiskTopic] '{}': opened at {:?} with {} partitions",
            name,
            dir,
            partitions.len()
        );

        Ok(Self {
            name,
            dir,
            duration_ms,
            retention_ms,
            partitions,
            subscriptions: SubscribeManager::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    pub fn retention_ms(&self) -> u64 {
        self.retention_ms
    }

    pub fn partitions(&self) -> Vec<String> {
        self.partitions.iter().map(|p| p.key().clone()).collect()
    }

    /// Segments currently tracked for the partition, active one included.
    pub fn segment_count(&self, partition: &str) -> usize {
        self.manager(partition)
            .map(|m| m.segment_count())
            .unwrap_or(0)
    }

    pub fn cursor(&self, partition: &str, client_id: &str) -> Option<u64> {
        self.manager(partition)?.cursor(client_id)
    }

    /// Deletes every partition of this topic from disk.
    pub fn clear_all(&self) -> io::Result<()> {
        let managers: Vec<Arc<SegmentManager>> =
            self.partitions.iter().map(|m| Arc::clone(m.value())).collect();
        self.partitions.clear();
        for manager in managers {
            manager.clear_all()?;
        }
        match fs::remove_dir_all(&self.dir) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        }
    }

    fn manager(&self, partition: &str) -> Option<Arc<SegmentManager>> {
        self.partitions.get(partition).map(|m| Arc::clone(m.value()))
    }

    fn manager_or_create(&self, partition: &str) -> Result<Arc<SegmentManager>, BrokerError> {
        if let Some(existing) = self.manager(partition) {
            return Ok(existing);
        }
        validate_path_name(HEADER_PARTITION, partition)?;
        let entry = self
            .partitions
            .entry(partition.to_string())
            .or_try_insert_with(|| {
                SegmentManager::open(self.dir.join(partition), self.duration_ms, self.retention_ms)
                    .map(Arc::new)
            })?;
        Ok(Arc::clone(entry.value()))
    }
}

impl Topic for DiskTopic {
    fn name(&self) -> &str {
        &self.name
    }

    fn push(&self, partition: &str, message: Message) -> Result<u64, BrokerError> {
        self.manager_or_create(partition)?.write(message)
    }

    fn peek(&self, partition: &str, client_id: &str) -> Option<TopicRecord> {
        self.manager(partition)?.peek(client_id)
    }

    fn commit(&self, partition: &str, client_id: &str, offset: u64) {
        if let Some(manager) = self.manager(partition) {
            manager.commit(client_id, offset);
        }
    }

    fn find(&self, partition: &str, condition: &HashMap<String, String>) -> Option<u64> {
        self.manager(partition)?.find(condition)
    }

    fn seek(&self, partition: &str, client_id: &str, offset: u64) -> bool {
        self.manager(partition)
            .map(|m| m.seek(client_id, offset))
            .unwrap_or(false)
    }

    fn count(&self, partition: &str) -> usize {
        self.manager(partition)
            .map(|m| m.count() as usize)
            .unwrap_or(0)
    }

    fn clean(&self) {
        for manager in self.partitions.iter() {
            manager.value().clean();
        }
    }

    fn subscriptions(&self) -> &SubscribeManager {
        &self.subscriptions
    }
}
