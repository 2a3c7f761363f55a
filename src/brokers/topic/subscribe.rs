//! Subscribe Manager: per-partition FIFO of parked waiters.
//!
//! A push wakes exactly one waiter. Waiters that find nothing to do report
//! `false` and the next one in line is tried.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

/// Something parked on a partition until new data shows up.
pub trait Waiter: Send + Sync {
    /// Invoked at most once per registration, after it was removed from the
    /// queue. Returns `true` when the wake-up was consumed.
    fn resume(self: Arc<Self>) -> bool;
}

#[derive(Default)]
pub struct SubscribeManager {
    queues: DashMap<String, VecDeque<u64>>,
    waiters: DashMap<u64, Arc<dyn Waiter>>,
    next_key: AtomicU64,
}

impl SubscribeManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks `waiter` at the tail of the partition queue and returns its key.
    pub fn subscribe(&self, partition: &str, waiter: Arc<dyn Waiter>) -> u64 {
        let key = self.next_key.fetch_add(1, Ordering::Relaxed);
        self.waiters.insert(key, waiter);
        self.queues
            .entry(partition.to_string())
            .or_default()
            .push_back(key);
        key
    }

    pub fn unsubscribe(&self, partition: &str, key: u64) {
        if let Some(mut keys) = self.queues.get_mut(partition) {
            keys.retain(|k| *k != key);
        }
        self.queues.remove_if(partition, |_, keys| keys.is_empty());
        self.waiters.remove(&key);
    }

    /// Resumes waiters in FIFO order until one consumes the wake-up.
    pub fn notify(&self, partition: &str) {
        loop {
            // The queue guard must be released before resuming: waiters re-subscribe.
            let key = match self.queues.get_mut(partition) {
                Some(mut keys) => keys.pop_front(),
                None => None,
            };
            let Some(key) = key else { break };
            self.queues.remove_if(partition, |_, keys| keys.is_empty());

            let Some((_, waiter)) = self.waiters.remove(&key) else {
                continue;
            };
            if waiter.resume() {
                break;
            }
        }
    }

    /// Number of waiters parked on `partition`.
    pub fn pending(&self, partition: &str) -> usize {
        self.queues.get(partition).map(|keys| keys.len()).unwrap_or(0)
    }
}
