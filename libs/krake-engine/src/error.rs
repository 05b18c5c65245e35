use krake_api::{ErrorKind, StorageError, WireError};

use crate::consumer::ConsumerId;
use crate::partition::PartitionKey;

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Who is at fault for an error, and therefore what a caller can do about it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Bad request: fix the input, retrying as-is will fail again.
    User,
    /// Backing store trouble: retryable.
    Resource,
    /// A broken engine invariant, confined to the request that hit it.
    Internal,
}

#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("no such topic: {0}")]
    NoSuchTopic(String),

    #[error("topic already exists: {0}")]
    TopicAlreadyExists(String),

    #[error("invalid topic config '{name}': {reason}")]
    InvalidTopicConfig { name: String, reason: &'static str },

    #[error("unknown consumer: {0}")]
    UnknownConsumer(ConsumerId),

    #[error("consumer {consumer} is not subscribed to '{topic}'")]
    NotSubscribed { consumer: ConsumerId, topic: String },

    #[error("subscribe needs at least one topic")]
    EmptySubscription,

    #[error("message of {size} bytes exceeds segment capacity of {capacity} bytes")]
    MessageTooLarge { size: u64, capacity: u64 },

    #[error("key of {0} bytes exceeds the {max} byte limit", max = u16::MAX)]
    KeyTooLarge(usize),

    #[error("no such partition: {0}")]
    NoSuchPartition(PartitionKey),

    #[error("no active segment for {0}")]
    NoSuchSegment(PartitionKey),

    #[error("offset {offset} is past the end ({end}) of {key}")]
    OffsetOutOfRange { key: PartitionKey, offset: u64, end: u64 },

    #[error("offset {offset} of {key} is not the start of a record")]
    MisalignedOffset { key: PartitionKey, offset: u64 },

    #[error("config error: {0}")]
    Config(String),

    #[error("segment write failed on {key}: {source}")]
    SegmentWriteFailed { key: PartitionKey, source: StorageError },

    #[error("segment read failed on {key}: {source}")]
    SegmentReadFailed { key: PartitionKey, source: StorageError },

    #[error("segment store unavailable for {key}: {source}")]
    StoreUnavailable { key: PartitionKey, source: StorageError },

    #[error("internal inconsistency: {0}")]
    InternalInconsistency(String),
}

impl BrokerError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            BrokerError::SegmentWriteFailed { .. }
            | BrokerError::SegmentReadFailed { .. }
            | BrokerError::StoreUnavailable { .. } => ErrorCategory::Resource,
            BrokerError::InternalInconsistency(_) => ErrorCategory::Internal,
            _ => ErrorCategory::User,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Resource
    }

    /// Classify a storage error raised on the write path (allocate, append, close).
    pub(crate) fn write_failed(key: &PartitionKey, source: StorageError) -> Self {
        match source.kind() {
            ErrorKind::Unavailable | ErrorKind::Config => BrokerError::StoreUnavailable {
                key: key.clone(),
                source,
            },
            _ => BrokerError::SegmentWriteFailed {
                key: key.clone(),
                source,
            },
        }
    }

    /// Classify a storage error raised on the read path.
    pub(crate) fn read_failed(key: &PartitionKey, source: StorageError) -> Self {
        match source.kind() {
            ErrorKind::Unavailable | ErrorKind::Config => BrokerError::StoreUnavailable {
                key: key.clone(),
                source,
            },
            _ => BrokerError::SegmentReadFailed {
                key: key.clone(),
                source,
            },
        }
    }
}

impl From<WireError> for BrokerError {
    fn from(e: WireError) -> Self {
        match e {
            WireError::KeyTooLarge(n) => BrokerError::KeyTooLarge(n),
            WireError::PayloadTooLarge(n) => BrokerError::MessageTooLarge {
                size: n as u64,
                capacity: u32::MAX as u64,
            },
            WireError::InvalidKeyFlag(_) => BrokerError::InternalInconsistency(e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_errors_are_classified_by_kind() {
        let key = PartitionKey::new("t", 0);
        let err = BrokerError::write_failed(&key, StorageError::unavailable("no disk"));
        assert!(matches!(err, BrokerError::StoreUnavailable { .. }));
        assert!(err.is_retryable());

        let err = BrokerError::write_failed(&key, StorageError::io("short write"));
        assert!(matches!(err, BrokerError::SegmentWriteFailed { .. }));

        let err = BrokerError::read_failed(&key, StorageError::io("eio"));
        assert!(matches!(err, BrokerError::SegmentReadFailed { .. }));
        assert_eq!(err.category(), ErrorCategory::Resource);
    }

    #[test]
    fn user_and_internal_categories() {
        assert_eq!(BrokerError::NoSuchTopic("x".into()).category(), ErrorCategory::User);
        assert!(!BrokerError::TopicAlreadyExists("x".into()).is_retryable());
        assert_eq!(
            BrokerError::InternalInconsistency("bad".into()).category(),
            ErrorCategory::Internal
        );
    }

    #[test]
    fn wire_errors_convert() {
        assert!(matches!(BrokerError::from(WireError::KeyTooLarge(70_000)), BrokerError::KeyTooLarge(70_000)));
        assert!(matches!(
            BrokerError::from(WireError::InvalidKeyFlag(9)),
            BrokerError::InternalInconsistency(_)
        ));
    }
}
