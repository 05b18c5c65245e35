use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use krake_api::{Message, StorageFactory};

use crate::error::{BrokerError, BrokerResult};
use crate::lock;
use crate::partition::{Appended, PartitionKey, PartitionLog};
use crate::segment::{SegmentInfo, SegmentSettings};

/// Owns every partition log of the broker.
///
/// The map lock is held only long enough to find or insert a log; all
/// reads and writes then go through that partition's own locks, so
/// different partitions never wait on each other.
pub struct SegmentStore {
    factory: Arc<dyn StorageFactory>,
    logs: RwLock<HashMap<PartitionKey, Arc<PartitionLog>>>,
}

impl SegmentStore {
    pub fn new(factory: Arc<dyn StorageFactory>) -> Self {
        Self {
            factory,
            logs: RwLock::new(HashMap::new()),
        }
    }

    pub fn backend(&self) -> &'static str {
        self.factory.name()
    }

    fn log(&self, key: &PartitionKey) -> Option<Arc<PartitionLog>> {
        lock::read(&self.logs, "segment store").get(key).cloned()
    }

    fn log_or_create(&self, key: &PartitionKey) -> Arc<PartitionLog> {
        if let Some(log) = self.log(key) {
            return log;
        }
        let mut logs = lock::write(&self.logs, "segment store");
        Arc::clone(
            logs.entry(key.clone())
                .or_insert_with(|| Arc::new(PartitionLog::new(key.clone(), Arc::clone(&self.factory)))),
        )
    }

    /// Append a framed record to the partition, creating its log on first write.
    pub fn append(&self, key: &PartitionKey, bytes: &[u8], settings: &SegmentSettings) -> BrokerResult<Appended> {
        if bytes.len() as u64 > settings.capacity {
            return Err(BrokerError::MessageTooLarge {
                size: bytes.len() as u64,
                capacity: settings.capacity,
            });
        }
        self.log_or_create(key).append(bytes, settings)
    }

    pub fn active_segment(&self, key: &PartitionKey) -> BrokerResult<SegmentInfo> {
        match self.log(key) {
            Some(log) => log.active_segment(),
            None => Err(BrokerError::NoSuchSegment(key.clone())),
        }
    }

    pub fn read_at(&self, key: &PartitionKey, offset: u64, max_bytes: usize) -> BrokerResult<Vec<u8>> {
        match self.log(key) {
            Some(log) => log.read_at(offset, max_bytes),
            None => Ok(Vec::new()),
        }
    }

    pub fn read_record(&self, key: &PartitionKey, offset: u64) -> BrokerResult<Option<(Message, u64)>> {
        match self.log(key) {
            Some(log) => log.read_record(offset),
            None => Ok(None),
        }
    }

    /// Whether `offset` starts a record or is the end of the partition.
    pub fn is_record_boundary(&self, key: &PartitionKey, offset: u64) -> BrokerResult<bool> {
        match self.log(key) {
            Some(log) => log.is_record_boundary(offset),
            None => Ok(offset == 0),
        }
    }

    pub fn end_offset(&self, key: &PartitionKey) -> u64 {
        self.log(key).map_or(0, |log| log.end_offset())
    }

    pub fn segments(&self, key: &PartitionKey) -> Vec<SegmentInfo> {
        self.log(key).map(|log| log.segments()).unwrap_or_default()
    }
}
