pub mod brokers;
pub mod config;
pub mod server;
pub mod utils;

use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::brokers::topic::{BrokerError, DiskTopic, MemoryTopic, Topic, TopicCleaner, TopicManager};
use crate::config::{Config, TopicDeclaration, TopicKind};
use crate::server::handle_connection;

// ========================================
// BROKER
// ========================================

/// Topics, their cleaner and the TCP front door.
pub struct Broker {
    manager: Arc<TopicManager>,
    cleaner: TopicCleaner,
    host: String,
    port: u16,
    channel_capacity: usize,
    shutdown: CancellationToken,
}

impl Broker {
    pub fn builder() -> BrokerBuilder {
        BrokerBuilder::default()
    }

    /// Builds the broker and every topic declared in `config`.
    /// Must be called inside a tokio runtime.
    pub fn from_config(config: &Config) -> Result<Self, BrokerError> {
        let mut builder = Broker::builder()
            .host(config.server.host.clone())
            .port(config.server.port)
            .channel_capacity(config.server.channel_capacity)
            .clean_interval(Duration::from_millis(config.cleaner.interval_ms));
        for declaration in &config.topics {
            builder = builder.add_topic(open_topic(declaration, config)?);
        }
        builder.build()
    }

    pub fn topic_manager(&self) -> Arc<TopicManager> {
        Arc::clone(&self.manager)
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub async fn bind(&self) -> io::Result<TcpListener> {
        TcpListener::bind(self.addr()).await
    }

    /// Binds the configured address and serves until `shutdown`.
    pub async fn run(&self) -> io::Result<()> {
        let listener = self.bind().await?;
        info!("[Server] listening on {}", listener.local_addr()?);
        self.serve(listener).await
    }

    /// Accepts connections on `listener` until `shutdown`.
    pub async fn serve(&self, listener: TcpListener) -> io::Result<()> {
        loop {
            let (socket, addr) = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted?,
            };

            let manager = Arc::clone(&self.manager);
            let capacity = self.channel_capacity;
            let shutdown = self.shutdown.clone();

            tokio::spawn(async move {
                tokio::select! {
                    _ = shutdown.cancelled() => {}
                    result = handle_connection(socket, manager, capacity) => {
                        if let Err(e) = result {
                            error!("[Server] connection from {} failed: {}", addr, e);
                        }
                    }
                }
            });
        }
        info!("[Server] stopped accepting connections");
        Ok(())
    }

    /// Stops the accept loop, open sessions and the cleaner.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        self.cleaner.shutdown();
    }
}

fn open_topic(declaration: &TopicDeclaration, config: &Config) -> Result<Arc<dyn Topic>, BrokerError> {
    let topic: Arc<dyn Topic> = match declaration.kind {
        TopicKind::Memory => Arc::new(MemoryTopic::new(
            declaration.name.clone(),
            declaration.retention_ms.unwrap_or(config.memory.retention_ms),
        )),
        TopicKind::Disk => Arc::new(DiskTopic::open(
            declaration.name.clone(),
            &config.disk.root_path,
            declaration.duration_ms.unwrap_or(config.disk.segment_duration_ms),
            declaration.retention_ms.unwrap_or(config.disk.retention_ms),
        )?),
    };
    Ok(topic)
}

// ========================================
// BUILDER
// ========================================

pub struct BrokerBuilder {
    host: String,
    port: u16,
    channel_capacity: usize,
    clean_interval: Duration,
    topics: Vec<Arc<dyn Topic>>,
}

impl Default for BrokerBuilder {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3401,
            channel_capacity: 1024,
            clean_interval: Duration::from_secs(180),
            topics: Vec::new(),
        }
    }
}

impl BrokerBuilder {
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.channel_capacity = capacity;
        self
    }

    pub fn clean_interval(mut self, interval: Duration) -> Self {
        self.clean_interval = interval;
        self
    }

    pub fn add_topic(mut self, topic: Arc<dyn Topic>) -> Self {
        self.topics.push(topic);
        self
    }

    /// Starts the cleaner, so this needs a tokio runtime.
    pub fn build(self) -> Result<Broker, BrokerError> {
        let mut names = HashSet::new();
        for topic in &self.topics {
            if !names.insert(topic.name().to_string()) {
                return Err(BrokerError::Validation(format!(
                    "topic '{}' declared twice",
                    topic.name()
                )));
            }
        }

        info!("[Broker] serving topics: {:?}", names);

        let cleaner = TopicCleaner::start(self.topics.clone(), self.clean_interval);
        Ok(Broker {
            manager: Arc::new(TopicManager::new(self.topics)),
            cleaner,
            host: self.host,
            port: self.port,
            channel_capacity: self.channel_capacity,
            shutdown: CancellationToken::new(),
        })
    }
}
