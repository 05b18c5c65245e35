//! A single capacity-bounded segment of a partition log.
//!
//! Offsets handed to and returned from a segment are partition-logical
//! (byte position in the partition stream). The segment translates them
//! to positions in its backing storage by subtracting its base offset.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use krake_api::{SegmentId, SegmentStorage, StorageContext, StorageError, StorageFactory};

/// Broker-wide parameters for newly allocated segments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentSettings {
    pub capacity: u64,
    pub log_dir: Option<PathBuf>,
}

/// Point-in-time view of a segment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SegmentInfo {
    pub id: SegmentId,
    pub capacity: u64,
    pub write_position: u64,
    pub closed: bool,
}

impl SegmentInfo {
    pub fn base_offset(&self) -> u64 {
        self.id.base_offset
    }

    /// First offset after the last written byte.
    pub fn end_offset(&self) -> u64 {
        self.id.base_offset + self.write_position
    }
}

pub struct Segment {
    id: SegmentId,
    storage: Arc<dyn SegmentStorage>,
    capacity: u64,
    /// Bytes fully written. Stored with `Release` only once a whole record
    /// is in storage, so readers never observe a partial record.
    position: AtomicU64,
    closed: AtomicBool,
}

impl std::fmt::Debug for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("capacity", &self.capacity)
            .field("position", &self.position())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Segment {
    pub fn open(
        factory: &dyn StorageFactory,
        id: SegmentId,
        settings: &SegmentSettings,
    ) -> Result<Self, StorageError> {
        let ctx = StorageContext {
            id,
            capacity: settings.capacity,
            log_dir: settings.log_dir.clone(),
        };
        let storage = factory.create(&ctx)?;
        Ok(Self {
            id: ctx.id,
            capacity: storage.capacity(),
            storage,
            position: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        })
    }

    pub fn id(&self) -> &SegmentId {
        &self.id
    }

    pub fn base_offset(&self) -> u64 {
        self.id.base_offset
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn end_offset(&self) -> u64 {
        self.base_offset() + self.position()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Whether a record of `len` bytes can still be written here.
    pub fn fits(&self, len: u64) -> bool {
        !self.is_closed() && self.position() + len <= self.capacity
    }

    /// Append a whole record. Callers must serialize appends per segment.
    ///
    /// Returns the partition offset the record was written at.
    pub fn append(&self, bytes: &[u8]) -> Result<u64, StorageError> {
        if self.is_closed() {
            return Err(StorageError::closed(format!("segment {} is closed", self.id)));
        }
        let pos = self.position.load(Ordering::Relaxed);
        let end = pos + bytes.len() as u64;
        if end > self.capacity {
            return Err(StorageError::out_of_bounds(format!(
                "segment {}: {} bytes at {pos} exceed capacity {}",
                self.id,
                bytes.len(),
                self.capacity
            )));
        }
        self.storage.write_at(pos, bytes)?;
        self.position.store(end, Ordering::Release);
        Ok(self.base_offset() + pos)
    }

    /// Read up to `max_bytes` written bytes starting at partition offset `offset`.
    ///
    /// Empty when `offset` is outside the written range of this segment.
    pub fn read(&self, offset: u64, max_bytes: usize) -> Result<Vec<u8>, StorageError> {
        let Some(rel) = offset.checked_sub(self.base_offset()) else {
            return Ok(Vec::new());
        };
        let written = self.position();
        if rel >= written || max_bytes == 0 {
            return Ok(Vec::new());
        }
        let len = (written - rel).min(max_bytes as u64) as usize;
        self.storage.read_at(rel, len)
    }

    /// Stop accepting writes. The segment stays readable.
    pub fn close(&self) -> Result<(), StorageError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.storage.close()
    }

    pub fn info(&self) -> SegmentInfo {
        SegmentInfo {
            id: self.id.clone(),
            capacity: self.capacity,
            write_position: self.position(),
            closed: self.is_closed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use krake_api::ErrorKind;
    use krake_storage_memory::MemoryStorageFactory;

    fn segment(base: u64, capacity: u64) -> Segment {
        let settings = SegmentSettings {
            capacity,
            log_dir: None,
        };
        Segment::open(&MemoryStorageFactory, SegmentId::new("t", 0, base), &settings).unwrap()
    }

    #[test]
    fn append_returns_partition_offsets() {
        let seg = segment(100, 16);
        assert_eq!(seg.append(b"abcd").unwrap(), 100);
        assert_eq!(seg.append(b"ef").unwrap(), 104);
        assert_eq!(seg.position(), 6);
        assert_eq!(seg.end_offset(), 106);
    }

    #[test]
    fn read_uses_partition_offsets_and_clamps_to_written() {
        let seg = segment(10, 16);
        seg.append(b"hello").unwrap();
        assert_eq!(seg.read(10, 100).unwrap(), b"hello");
        assert_eq!(seg.read(12, 2).unwrap(), b"ll");
        assert!(seg.read(15, 4).unwrap().is_empty());
        assert!(seg.read(5, 4).unwrap().is_empty());
    }

    #[test]
    fn fits_exactly_at_capacity() {
        let seg = segment(0, 4);
        assert!(seg.fits(4));
        seg.append(b"abc").unwrap();
        assert!(seg.fits(1));
        assert!(!seg.fits(2));
        let err = seg.append(b"de").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::OutOfBounds);
        assert_eq!(seg.position(), 3);
    }

    #[test]
    fn closed_segment_is_read_only() {
        let seg = segment(0, 8);
        seg.append(b"ab").unwrap();
        seg.close().unwrap();
        seg.close().unwrap();
        assert!(!seg.fits(1));
        assert_eq!(seg.append(b"c").unwrap_err().kind(), ErrorKind::Closed);
        assert_eq!(seg.read(0, 8).unwrap(), b"ab");
        assert!(seg.info().closed);
    }
}
