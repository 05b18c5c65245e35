use std::sync::{Arc, RwLock};

use krake_api::{SegmentStorage, StorageContext, StorageError, StorageFactory};

// ═══════════════════════════════════════════════════════════════
//  MemoryStorage
// ═══════════════════════════════════════════════════════════════

/// In-memory segment. For tests and ephemeral brokers that do not
/// need disk persistence. The buffer grows on write up to `capacity`.
pub struct MemoryStorage {
    buf: RwLock<Vec<u8>>,
    capacity: u64,
}

impl MemoryStorage {
    pub fn new(capacity: u64) -> Self {
        Self {
            buf: RwLock::new(Vec::new()),
            capacity,
        }
    }
}

impl SegmentStorage for MemoryStorage {
    fn write_at(&self, position: u64, data: &[u8]) -> Result<(), StorageError> {
        let end = position + data.len() as u64;
        if end > self.capacity {
            return Err(StorageError::out_of_bounds(format!(
                "write {position}..{end} exceeds capacity {}",
                self.capacity
            )));
        }
        let mut buf = self
            .buf
            .write()
            .map_err(|_| StorageError::unavailable("memory segment lock poisoned"))?;
        let (start, end) = (position as usize, end as usize);
        if buf.len() < end {
            buf.resize(end, 0);
        }
        buf[start..end].copy_from_slice(data);
        Ok(())
    }

    fn read_at(&self, position: u64, len: usize) -> Result<Vec<u8>, StorageError> {
        let buf = self
            .buf
            .read()
            .map_err(|_| StorageError::unavailable("memory segment lock poisoned"))?;
        let start = (position as usize).min(buf.len());
        let end = start.saturating_add(len).min(buf.len());
        Ok(buf[start..end].to_vec())
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

// ═══════════════════════════════════════════════════════════════
//  MemoryStorageFactory
// ═══════════════════════════════════════════════════════════════

pub struct MemoryStorageFactory;

impl StorageFactory for MemoryStorageFactory {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create(&self, ctx: &StorageContext) -> Result<Arc<dyn SegmentStorage>, StorageError> {
        Ok(Arc::new(MemoryStorage::new(ctx.capacity)))
    }
}
