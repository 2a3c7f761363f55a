#![allow(dead_code)]

use std::sync::Arc;
use std::time::{Duration, Instant};

use segmq::brokers::topic::message::{Message, MessageType};
use segmq::brokers::topic::{DiskTopic, MemoryTopic, Topic, TopicManager};
use tempfile::TempDir;
use tokio::sync::mpsc;

pub const HOUR_MS: u64 = 60 * 60 * 1000;

pub fn setup_disk_topic(name: &str, duration_ms: u64, retention_ms: u64) -> (DiskTopic, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let topic = DiskTopic::open(name, temp_dir.path(), duration_ms, retention_ms).unwrap();
    (topic, temp_dir)
}

pub struct ManagerFixture {
    pub manager: TopicManager,
    pub memory: Arc<MemoryTopic>,
    pub disk: Arc<DiskTopic>,
    pub temp_dir: TempDir,
}

/// Manager serving a memory topic "convert" and a disk topic "join".
pub fn setup_manager() -> ManagerFixture {
    let temp_dir = tempfile::tempdir().unwrap();
    let memory = Arc::new(MemoryTopic::new("convert", HOUR_MS));
    let disk = Arc::new(DiskTopic::open("join", temp_dir.path(), HOUR_MS, HOUR_MS).unwrap());
    let manager = TopicManager::new([
        memory.clone() as Arc<dyn Topic>,
        disk.clone() as Arc<dyn Topic>,
    ]);
    ManagerFixture {
        manager,
        memory,
        disk,
        temp_dir,
    }
}

pub fn push_request(topic: &str, partition: &str, payload: &str) -> Message {
    Message::new(MessageType::ReqPush)
        .with_topic(topic)
        .with_partition(partition)
        .with_payload(payload.to_string())
}

pub fn pull_request(topic: &str, partition: &str, client: &str, count: i64, timeout_ms: u64) -> Message {
    Message::new(MessageType::ReqPull)
        .with_topic(topic)
        .with_partition(partition)
        .with_client_id(client)
        .with_count(count)
        .with_timeout_ms(timeout_ms)
}

pub fn find_request(topic: &str, partition: &str, key: &str, value: &str, timeout_ms: u64) -> Message {
    Message::new(MessageType::ReqFind)
        .with_topic(topic)
        .with_partition(partition)
        .with_condition(key, value)
        .with_timeout_ms(timeout_ms)
}

pub fn seek_request(topic: &str, partition: &str, client: &str, offset: i64) -> Message {
    Message::new(MessageType::ReqSeek)
        .with_topic(topic)
        .with_partition(partition)
        .with_client_id(client)
        .with_offset(offset)
}

/// Receives exactly `n` messages or panics after `within`.
pub async fn recv_n(rx: &mut mpsc::UnboundedReceiver<Message>, n: usize, within: Duration) -> Vec<Message> {
    let mut received = Vec::with_capacity(n);
    let deadline = tokio::time::Instant::now() + within;
    while received.len() < n {
        match tokio::time::timeout_at(deadline, rx.recv()).await {
            Ok(Some(message)) => received.push(message),
            Ok(None) => panic!("channel closed after {} of {} messages", received.len(), n),
            Err(_) => panic!("timed out after {} of {} messages", received.len(), n),
        }
    }
    received
}

pub fn payload_str(message: &Message) -> Option<String> {
    message
        .payload
        .as_ref()
        .map(|p| String::from_utf8_lossy(p).into_owned())
}

pub struct Benchmark {
    pub name: String,
    pub start: Instant,
    pub count: usize,
    pub samples: Vec<Duration>,
}

impl Benchmark {
    pub fn start(name: &str, count: usize) -> Self {
        Self {
            name: name.to_string(),
            start: Instant::now(),
            count,
            samples: Vec::with_capacity(count),
        }
    }

    pub fn record(&mut self, duration: Duration) {
        self.samples.push(duration);
    }

    pub fn stop(mut self) {
        let total_duration = self.start.elapsed();
        let ops_sec = self.count as f64 / total_duration.as_secs_f64();

        self.samples.sort();
        let len = self.samples.len();
        let pct = |p: usize| {
            self.samples
                .get(len * p / 100)
                .unwrap_or(&Duration::ZERO)
                .as_micros()
        };

        println!("\n{}", self.name);
        println!(" Throughput:  {:.0} ops/sec", ops_sec);
        println!(" Total Time:  {:.2?}", total_duration);
        println!(
            " Latency (us): p50: {} | p99: {} | MAX: {}",
            pct(50),
            pct(99),
            self.samples.last().unwrap_or(&Duration::ZERO).as_micros()
        );
    }
}
