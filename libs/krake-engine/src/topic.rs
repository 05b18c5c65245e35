use std::collections::HashMap;
use std::ops::Range;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use tokio::sync::broadcast;

use crate::error::{BrokerError, BrokerResult};
use crate::lock;

pub const MAX_TOPIC_NAME_LEN: usize = 249;

/// Immutable topic configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicConfig {
    pub name: String,
    pub partition_count: u32,
    /// Stored for a future reclamation sweep; nothing deletes segments yet.
    pub retention: Duration,
}

impl TopicConfig {
    pub fn new(name: impl Into<String>, partition_count: u32, retention: Duration) -> Self {
        Self {
            name: name.into(),
            partition_count,
            retention,
        }
    }

    /// Names become part of segment file names, so they are held to the
    /// Kafka rules: `[A-Za-z0-9._-]`, at most 249 characters, not `.` or `..`.
    fn validate(&self) -> BrokerResult<()> {
        let legal = |c: char| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-');
        let reason = if self.name.is_empty() {
            "name must not be empty"
        } else if self.name.len() > MAX_TOPIC_NAME_LEN {
            "name must be at most 249 characters"
        } else if self.name == "." || self.name == ".." {
            "name must not be '.' or '..'"
        } else if !self.name.chars().all(legal) {
            "name may only contain ASCII letters, digits, '.', '_' and '-'"
        } else if self.partition_count == 0 {
            "partition count must be at least 1"
        } else {
            return Ok(());
        };
        Err(BrokerError::InvalidTopicConfig {
            name: self.name.clone(),
            reason,
        })
    }
}

/// A registered topic.
pub struct Topic {
    config: TopicConfig,
    /// Fired after every append to any partition of the topic.
    notify_tx: broadcast::Sender<()>,
}

impl std::fmt::Debug for Topic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic").field("config", &self.config).finish()
    }
}

impl Topic {
    fn new(config: TopicConfig) -> Self {
        let (notify_tx, _) = broadcast::channel(64);
        Self { config, notify_tx }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &TopicConfig {
        &self.config
    }

    pub fn partition_count(&self) -> u32 {
        self.config.partition_count
    }

    pub fn partitions(&self) -> Range<u32> {
        0..self.config.partition_count
    }

    pub(crate) fn notify(&self) {
        // No receivers is fine.
        let _ = self.notify_tx.send(());
    }

    pub(crate) fn subscribe_notify(&self) -> broadcast::Receiver<()> {
        self.notify_tx.subscribe()
    }
}

/// Name → topic map with create-once semantics.
#[derive(Debug, Default)]
pub struct TopicRegistry {
    topics: RwLock<HashMap<String, Arc<Topic>>>,
}

impl TopicRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a topic. An existing topic of the same name is left untouched.
    pub fn create(&self, config: TopicConfig) -> BrokerResult<Arc<Topic>> {
        config.validate()?;
        let mut topics = lock::write(&self.topics, "topic registry");
        if topics.contains_key(&config.name) {
            return Err(BrokerError::TopicAlreadyExists(config.name));
        }
        let topic = Arc::new(Topic::new(config));
        topics.insert(topic.name().to_string(), Arc::clone(&topic));
        Ok(topic)
    }

    pub fn lookup(&self, name: &str) -> BrokerResult<Arc<Topic>> {
        lock::read(&self.topics, "topic registry")
            .get(name)
            .cloned()
            .ok_or_else(|| BrokerError::NoSuchTopic(name.to_string()))
    }

    pub fn contains(&self, name: &str) -> bool {
        lock::read(&self.topics, "topic registry").contains_key(name)
    }

    pub fn topic_names(&self) -> Vec<String> {
        let mut names: Vec<String> = lock::read(&self.topics, "topic registry").keys().cloned().collect();
        names.sort();
        names
    }
}
