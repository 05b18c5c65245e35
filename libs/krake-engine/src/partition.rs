use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

use krake_api::record::{self, FrameLen, MIN_FRAME_LEN};
use krake_api::{Message, SegmentId, StorageFactory};

use crate::error::{BrokerError, BrokerResult};
use crate::lock;
use crate::segment::{Segment, SegmentInfo, SegmentSettings};

/// Identifies one partition log.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PartitionKey {
    pub topic: String,
    pub partition: u32,
}

impl PartitionKey {
    pub fn new(topic: impl Into<String>, partition: u32) -> Self {
        Self {
            topic: topic.into(),
            partition,
        }
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.topic, self.partition)
    }
}

/// Result of a successful append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Appended {
    /// Partition offset of the first byte of the record.
    pub offset: u64,
    pub bytes_written: u64,
    /// Base offset of the segment that took the write.
    pub segment_base: u64,
    pub rotated: bool,
}

/// Ordered byte stream of one (topic, partition), split into segments
/// keyed by base offset. The segment with the greatest base is active.
pub struct PartitionLog {
    key: PartitionKey,
    factory: Arc<dyn StorageFactory>,
    segments: RwLock<BTreeMap<u64, Arc<Segment>>>,
    /// Serializes appends, including rotation.
    append_lock: Mutex<()>,
}

impl PartitionLog {
    pub fn new(key: PartitionKey, factory: Arc<dyn StorageFactory>) -> Self {
        Self {
            key,
            factory,
            segments: RwLock::new(BTreeMap::new()),
            append_lock: Mutex::new(()),
        }
    }

    fn active(&self) -> Option<Arc<Segment>> {
        lock::read(&self.segments, "partition segments")
            .last_key_value()
            .map(|(_, seg)| Arc::clone(seg))
    }

    /// Current writable segment, or `NoSuchSegment` if nothing was ever written.
    pub fn active_segment(&self) -> BrokerResult<SegmentInfo> {
        self.active()
            .map(|seg| seg.info())
            .ok_or_else(|| BrokerError::NoSuchSegment(self.key.clone()))
    }

    /// Append one framed record, rotating first when it does not fit.
    pub fn append(&self, bytes: &[u8], settings: &SegmentSettings) -> BrokerResult<Appended> {
        let len = bytes.len() as u64;
        if len > settings.capacity {
            return Err(BrokerError::MessageTooLarge {
                size: len,
                capacity: settings.capacity,
            });
        }

        let _guard = lock::lock(&self.append_lock, "partition append");

        let (segment, rotated) = match self.active() {
            Some(seg) if seg.fits(len) => (seg, false),
            Some(seg) => (self.rotate(&seg, settings)?, true),
            None => (self.open_segment(0, settings)?, false),
        };

        if !segment.fits(len) {
            return Err(BrokerError::InternalInconsistency(format!(
                "fresh segment {} cannot hold {len} bytes",
                segment.id()
            )));
        }

        let offset = segment
            .append(bytes)
            .map_err(|e| BrokerError::write_failed(&self.key, e))?;

        tracing::debug!(
            partition = %self.key,
            offset,
            bytes = len,
            segment = segment.base_offset(),
            "appended record"
        );

        Ok(Appended {
            offset,
            bytes_written: len,
            segment_base: segment.base_offset(),
            rotated,
        })
    }

    /// Close `full` and publish its successor. Caller holds `append_lock`.
    fn rotate(&self, full: &Segment, settings: &SegmentSettings) -> BrokerResult<Arc<Segment>> {
        full.close()
            .map_err(|e| BrokerError::write_failed(&self.key, e))?;
        let base = full.end_offset();
        let next = self.open_segment(base, settings)?;
        tracing::info!(
            partition = %self.key,
            closed = full.base_offset(),
            closed_bytes = full.position(),
            base_offset = base,
            "rotated segment"
        );
        Ok(next)
    }

    fn open_segment(&self, base_offset: u64, settings: &SegmentSettings) -> BrokerResult<Arc<Segment>> {
        let id = SegmentId::new(self.key.topic.clone(), self.key.partition, base_offset);
        let segment = Segment::open(self.factory.as_ref(), id, settings)
            .map_err(|e| BrokerError::write_failed(&self.key, e))?;
        let segment = Arc::new(segment);
        lock::write(&self.segments, "partition segments").insert(base_offset, Arc::clone(&segment));
        tracing::debug!(
            partition = %self.key,
            base_offset,
            capacity = segment.capacity(),
            backend = self.factory.name(),
            "opened segment"
        );
        Ok(segment)
    }

    fn segment_for(&self, offset: u64) -> Option<Arc<Segment>> {
        lock::read(&self.segments, "partition segments")
            .range(..=offset)
            .next_back()
            .map(|(_, seg)| Arc::clone(seg))
    }

    /// Bytes from `offset` up to the end of the written data of the segment holding it.
    ///
    /// Empty at or past the end of the log.
    pub fn read_at(&self, offset: u64, max_bytes: usize) -> BrokerResult<Vec<u8>> {
        match self.segment_for(offset) {
            Some(seg) => seg
                .read(offset, max_bytes)
                .map_err(|e| BrokerError::read_failed(&self.key, e)),
            None => Ok(Vec::new()),
        }
    }

    /// Decode the record starting at `offset`.
    ///
    /// Returns the message and its framed length, or `None` when no record
    /// has been written there yet.
    pub fn read_record(&self, offset: u64) -> BrokerResult<Option<(Message, u64)>> {
        let Some(seg) = self.segment_for(offset) else {
            return Ok(None);
        };

        let mut want = MIN_FRAME_LEN;
        loop {
            let buf = seg
                .read(offset, want)
                .map_err(|e| BrokerError::read_failed(&self.key, e))?;
            if buf.is_empty() {
                return Ok(None);
            }

            let needed = match record::frame_len(&buf)? {
                FrameLen::Complete(total) if buf.len() >= total => {
                    return match record::decode(&buf[..total])? {
                        Some((message, used)) => Ok(Some((message, used as u64))),
                        None => Err(self.torn(offset, "frame shorter than its header")),
                    };
                }
                FrameLen::Complete(total) => total,
                FrameLen::NeedHeader(n) => n,
            };

            // Records are published whole; a short read means the frame is damaged.
            if buf.len() < want || needed <= want {
                return Err(self.torn(offset, "frame runs past the written data"));
            }
            want = needed;
        }
    }

    /// Whether `offset` is where a record starts, or the end of the log.
    ///
    /// Walks the frames of the segment holding `offset` from its base,
    /// which is always a record boundary.
    pub fn is_record_boundary(&self, offset: u64) -> BrokerResult<bool> {
        if offset == self.end_offset() {
            return Ok(true);
        }
        let Some(seg) = self.segment_for(offset) else {
            return Ok(false);
        };
        let mut pos = seg.base_offset();
        while pos < offset {
            match self.read_record(pos)? {
                Some((_, len)) => pos += len,
                None => return Ok(false),
            }
        }
        Ok(pos == offset)
    }

    fn torn(&self, offset: u64, what: &str) -> BrokerError {
        BrokerError::InternalInconsistency(format!("{} at offset {offset}: {what}", self.key))
    }

    /// Next offset to be written; 0 for a partition never written to.
    pub fn end_offset(&self) -> u64 {
        self.active().map_or(0, |seg| seg.end_offset())
    }

    pub fn segments(&self) -> Vec<SegmentInfo> {
        lock::read(&self.segments, "partition segments")
            .values()
            .map(|seg| seg.info())
            .collect()
    }
}
