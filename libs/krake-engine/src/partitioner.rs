use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use crate::error::{BrokerError, BrokerResult};
use crate::lock;

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a.
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    let mut hash = FNV_OFFSET_BASIS;
    for byte in bytes {
        hash ^= *byte as u32;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

/// Maps a record to a partition index.
///
/// Keyed records hash to a stable partition; key-less records cycle
/// through partitions with one counter per topic.
#[derive(Debug, Default)]
pub struct Partitioner {
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,
}

impl Partitioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partition for a record of `topic`. Always in `0..partition_count`.
    pub fn assign(&self, topic: &str, partition_count: u32, key: Option<&[u8]>) -> BrokerResult<u32> {
        if partition_count == 0 {
            return Err(BrokerError::InternalInconsistency(format!(
                "topic '{topic}' has no partitions"
            )));
        }
        let partition = match key.filter(|k| !k.is_empty()) {
            Some(key) => fnv1a_32(key) % partition_count,
            None => (self.counter(topic).fetch_add(1, Ordering::Relaxed) % partition_count as u64) as u32,
        };
        Ok(partition)
    }

    fn counter(&self, topic: &str) -> Arc<AtomicU64> {
        if let Some(counter) = lock::read(&self.counters, "partitioner").get(topic) {
            return Arc::clone(counter);
        }
        Arc::clone(
            lock::write(&self.counters, "partitioner")
                .entry(topic.to_string())
                .or_default(),
        )
    }
}
