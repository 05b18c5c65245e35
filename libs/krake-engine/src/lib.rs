//! Partitioned, segmented log engine.
//!
//! Records produced to a topic are routed to a partition by
//! [`Partitioner`], appended to that partition's [`PartitionLog`] as
//! length-prefixed frames, and read back by consumers that track a byte
//! offset per partition. [`Broker`] ties the pieces together.

pub mod broker;
pub mod config;
pub mod consumer;
pub mod error;
mod lock;
pub mod partition;
pub mod partitioner;
pub mod segment;
pub mod store;
pub mod topic;

pub use broker::{Broker, ConsumedMessage, ProduceAck};
pub use config::BrokerSettings;
pub use consumer::{AutoOffsetReset, ConsumerId, SeekTo};
pub use error::{BrokerError, BrokerResult, ErrorCategory};
pub use partition::{PartitionKey, PartitionLog};
pub use partitioner::Partitioner;
pub use segment::{SegmentInfo, SegmentSettings};
pub use store::SegmentStore;
pub use topic::{Topic, TopicConfig, TopicRegistry};

pub use tokio_util::sync::CancellationToken;
