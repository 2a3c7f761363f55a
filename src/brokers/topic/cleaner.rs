//! Periodic retention sweep over every topic.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::debug;

use crate::brokers::topic::Topic;

const MIN_INTERVAL: Duration = Duration::from_millis(1);

pub struct TopicCleaner {
    handle: JoinHandle<()>,
}

impl TopicCleaner {
    /// Spawns the sweep task. The first sweep runs one `interval` after start.
    pub fn start(topics: Vec<Arc<dyn Topic>>, interval: Duration) -> Self {
        let interval = interval.max(MIN_INTERVAL);
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await; // Skip first immediate tick
            loop {
                ticker.tick().await;
                for topic in &topics {
                    topic.clean();
                }
                debug!("[Cleaner] swept {} topics", topics.len());
            }
        });
        Self { handle }
    }

    pub fn shutdown(&self) {
        self.handle.abort();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }
}

impl Drop for TopicCleaner {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
