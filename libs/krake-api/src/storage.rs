use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use crate::error::StorageError;

/// Identity of one segment: the (topic, partition, base offset) triple.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SegmentId {
    pub topic: String,
    pub partition: u32,
    pub base_offset: u64,
}

const SEGMENT_EXT: &str = ".log";

impl SegmentId {
    pub fn new(topic: impl Into<String>, partition: u32, base_offset: u64) -> Self {
        Self {
            topic: topic.into(),
            partition,
            base_offset,
        }
    }

    /// `{topic}-{partition}-{base_offset:020}.log`
    ///
    /// The zero-padded offset keeps a directory listing in offset order.
    pub fn file_name(&self) -> String {
        format!(
            "{}-{}-{:020}{SEGMENT_EXT}",
            self.topic, self.partition, self.base_offset
        )
    }

    /// Inverse of [`SegmentId::file_name`]. Topic names may contain `-`.
    pub fn parse_file_name(name: &str) -> Option<Self> {
        let stem = name.strip_suffix(SEGMENT_EXT)?;
        let mut parts = stem.rsplitn(3, '-');
        let base_offset = parts.next()?.parse().ok()?;
        let partition = parts.next()?.parse().ok()?;
        let topic = parts.next()?;
        if topic.is_empty() {
            return None;
        }
        Some(Self::new(topic, partition, base_offset))
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}@{}", self.topic, self.partition, self.base_offset)
    }
}

/// Everything a factory needs to allocate one segment.
#[derive(Debug, Clone)]
pub struct StorageContext {
    pub id: SegmentId,
    /// Fixed capacity in bytes. Writes past it are rejected.
    pub capacity: u64,
    /// `log.dirs` at allocation time. Backends without a filesystem ignore it.
    pub log_dir: Option<PathBuf>,
}

/// Byte-addressable backing resource of a single segment.
///
/// The engine serializes writes per segment and never reads past the
/// published write position, so implementations only need to be safe
/// for one writer concurrent with many readers.
///
/// Implementations: file (pre-allocated), memory; a network blob store
/// fits the same contract.
pub trait SegmentStorage: Send + Sync {
    /// Write `data` starting at `position`. `position + data.len()` must not exceed capacity.
    fn write_at(&self, position: u64, data: &[u8]) -> Result<(), StorageError>;

    /// Read up to `len` bytes starting at `position`. May return fewer at the end of capacity.
    fn read_at(&self, position: u64, len: usize) -> Result<Vec<u8>, StorageError>;

    fn capacity(&self) -> u64;

    /// Make previous writes durable.
    fn flush(&self) -> Result<(), StorageError>;

    /// Called once when the segment stops being active. Reads must keep working.
    fn close(&self) -> Result<(), StorageError> {
        self.flush()
    }
}

/// Allocates segment storage. Selected once per broker.
pub trait StorageFactory: Send + Sync {
    /// Short backend name for logs (`"file"`, `"memory"`).
    fn name(&self) -> &'static str;

    fn create(&self, ctx: &StorageContext) -> Result<Arc<dyn SegmentStorage>, StorageError>;
}
