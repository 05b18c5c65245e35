//! Consumer cursors: which partitions a consumer reads and where it is in each.
//!
//! A cursor is created by subscribe with all partitions of each requested
//! topic. Offsets are partition byte offsets and always sit on a record
//! boundary: they only move by whole records (auto-commit), to a value the
//! broker handed out (commit), or to either end of the log (seek).

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, Mutex, RwLock};

use uuid::Uuid;

use crate::error::{BrokerError, BrokerResult};
use crate::lock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConsumerId(Uuid);

impl ConsumerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for ConsumerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Where a fresh cursor starts in each partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AutoOffsetReset {
    /// Beginning of the partition.
    #[default]
    Earliest,
    /// End of the partition: only records produced after subscribe.
    Latest,
}

impl FromStr for AutoOffsetReset {
    type Err = BrokerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "earliest" | "smallest" => Ok(AutoOffsetReset::Earliest),
            "latest" | "largest" => Ok(AutoOffsetReset::Latest),
            other => Err(BrokerError::Config(format!(
                "auto.offset.reset must be earliest or latest, got {other:?}"
            ))),
        }
    }
}

/// Target of a seek.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeekTo {
    Earliest,
    Latest,
}

/// A consumer's view of one topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicAssignment {
    partitions: Vec<u32>,
    offsets: BTreeMap<u32, u64>,
    /// Index into `partitions` the next read tries first.
    next: usize,
}

impl TopicAssignment {
    pub fn new(offsets: BTreeMap<u32, u64>) -> Self {
        Self {
            partitions: offsets.keys().copied().collect(),
            offsets,
            next: 0,
        }
    }

    pub fn partitions(&self) -> &[u32] {
        &self.partitions
    }

    pub fn offset(&self, partition: u32) -> Option<u64> {
        self.offsets.get(&partition).copied()
    }

    /// Assigned partitions in the order the next read should try them:
    /// starting after the partition that served the previous message.
    pub fn poll_order(&self) -> impl Iterator<Item = u32> + '_ {
        let n = self.partitions.len();
        (0..n).map(move |i| self.partitions[(self.next + i) % n])
    }

    pub fn mark_served(&mut self, partition: u32) {
        if let Some(idx) = self.partitions.iter().position(|p| *p == partition) {
            self.next = (idx + 1) % self.partitions.len();
        }
    }

    /// Move the stored offset of an assigned partition.
    pub fn set_offset(&mut self, partition: u32, offset: u64) -> BrokerResult<()> {
        match self.offsets.get_mut(&partition) {
            Some(slot) => {
                *slot = offset;
                Ok(())
            }
            None => Err(BrokerError::InternalInconsistency(format!(
                "partition {partition} missing from offset map"
            ))),
        }
    }
}

/// Per-consumer state: one assignment per subscribed topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerCursor {
    id: ConsumerId,
    subscriptions: BTreeMap<String, TopicAssignment>,
}

impl ConsumerCursor {
    pub fn id(&self) -> ConsumerId {
        self.id
    }

    pub fn topics(&self) -> impl Iterator<Item = &str> {
        self.subscriptions.keys().map(String::as_str)
    }

    pub fn assignment(&self, topic: &str) -> BrokerResult<&TopicAssignment> {
        self.subscriptions.get(topic).ok_or_else(|| BrokerError::NotSubscribed {
            consumer: self.id,
            topic: topic.to_string(),
        })
    }

    pub fn assignment_mut(&mut self, topic: &str) -> BrokerResult<&mut TopicAssignment> {
        let id = self.id;
        self.subscriptions.get_mut(topic).ok_or_else(|| BrokerError::NotSubscribed {
            consumer: id,
            topic: topic.to_string(),
        })
    }
}

/// All live cursors. Each cursor has its own mutex, so consumers never
/// contend with each other past the map lookup.
#[derive(Debug, Default)]
pub struct ConsumerRegistry {
    cursors: RwLock<HashMap<ConsumerId, Arc<Mutex<ConsumerCursor>>>>,
}

impl ConsumerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, subscriptions: BTreeMap<String, TopicAssignment>) -> ConsumerId {
        let id = ConsumerId::random();
        let cursor = ConsumerCursor { id, subscriptions };
        lock::write(&self.cursors, "consumer registry").insert(id, Arc::new(Mutex::new(cursor)));
        id
    }

    fn cursor(&self, id: ConsumerId) -> BrokerResult<Arc<Mutex<ConsumerCursor>>> {
        lock::read(&self.cursors, "consumer registry")
            .get(&id)
            .cloned()
            .ok_or(BrokerError::UnknownConsumer(id))
    }

    /// Run `f` with exclusive access to one cursor.
    pub fn with_cursor<R>(
        &self,
        id: ConsumerId,
        f: impl FnOnce(&mut ConsumerCursor) -> BrokerResult<R>,
    ) -> BrokerResult<R> {
        let cursor = self.cursor(id)?;
        let mut guard = lock::lock(&cursor, "consumer cursor");
        f(&mut *guard)
    }

    pub fn snapshot(&self, id: ConsumerId) -> BrokerResult<ConsumerCursor> {
        self.with_cursor(id, |cursor| Ok(cursor.clone()))
    }

    pub fn remove(&self, id: ConsumerId) -> BrokerResult<()> {
        lock::write(&self.cursors, "consumer registry")
            .remove(&id)
            .map(|_| ())
            .ok_or(BrokerError::UnknownConsumer(id))
    }

    pub fn len(&self) -> usize {
        lock::read(&self.cursors, "consumer registry").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
