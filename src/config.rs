use std::env;
use std::sync::OnceLock;

use serde::Deserialize;

static CONFIG: OnceLock<Config> = OnceLock::new();

// --- CONFIG AGGREGATOR ---

#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub memory: MemoryTopicConfig,
    pub disk: DiskTopicConfig,
    pub cleaner: CleanerConfig,
    pub topics: Vec<TopicDeclaration>,
}

impl Config {
    pub fn global() -> &'static Config {
        CONFIG.get_or_init(Self::load)
    }

    fn load() -> Self {
        dotenv::dotenv().ok();
        Self {
            server: ServerConfig::load(),
            memory: MemoryTopicConfig::load(),
            disk: DiskTopicConfig::load(),
            cleaner: CleanerConfig::load(),
            topics: load_topics(),
        }
    }
}

// --- MODULES ---

// SERVER
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub channel_capacity: usize,
    pub log_level: String,
}

impl ServerConfig {
    fn load() -> Self {
        Self {
            host:             get_env("SERVER_HOST", "127.0.0.1"),
            port:             get_env("SERVER_PORT", "3401"),
            channel_capacity: get_env("SERVER_CHANNEL_CAPACITY", "1024"),
            log_level:        get_env("BROKER_LOG", "info"),
        }
    }
}

// MEMORY TOPICS
#[derive(Debug, Clone)]
pub struct MemoryTopicConfig {
    pub retention_ms: u64,
}

impl MemoryTopicConfig {
    fn load() -> Self {
        Self {
            retention_ms: get_env("MEMORY_RETENTION_MS", "180000"), // 3 minutes
        }
    }
}

// DISK TOPICS
#[derive(Debug, Clone)]
pub struct DiskTopicConfig {
    pub root_path: String,
    pub segment_duration_ms: u64,
    pub retention_ms: u64,
}

impl DiskTopicConfig {
    fn load() -> Self {
        Self {
            root_path:           get_env("DISK_ROOT_PATH", "./disk_topics"),
            segment_duration_ms: get_env("DISK_SEGMENT_DURATION_MS", "600000"), // 10 minutes
            retention_ms:        get_env("DISK_RETENTION_MS", "1800000"),       // 30 minutes
        }
    }
}

// CLEANER
#[derive(Debug, Clone)]
pub struct CleanerConfig {
    pub interval_ms: u64,
}

impl CleanerConfig {
    fn load() -> Self {
        Self {
            interval_ms: get_env("CLEAN_INTERVAL_MS", "180000"),
        }
    }
}

// TOPICS
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TopicKind {
    Memory,
    Disk,
}

/// One entry of `BROKER_TOPICS`. Missing timings fall back to the
/// per-kind defaults above.
#[derive(Debug, Clone, Deserialize)]
pub struct TopicDeclaration {
    pub name: String,
    pub kind: TopicKind,
    pub retention_ms: Option<u64>,
    pub duration_ms: Option<u64>,
}

const DEFAULT_TOPICS: &str = r#"[{"name":"join","kind":"disk"},{"name":"convert","kind":"memory"}]"#;

fn load_topics() -> Vec<TopicDeclaration> {
    let raw = env::var("BROKER_TOPICS").unwrap_or_else(|_| DEFAULT_TOPICS.to_string());
    serde_json::from_str(&raw)
        .map_err(|e| format!("Config error: BROKER_TOPICS must be a JSON array of topics: {}", e))
        .unwrap()
}

// --- PRIVATE HELPER ---

fn get_env<T: std::str::FromStr>(key: &str, default: &str) -> T {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse()
        .map_err(|_| format!("Config error: {} must be valid", key))
        .unwrap()
}
