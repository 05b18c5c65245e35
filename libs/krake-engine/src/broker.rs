use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use krake_api::{ConfigValues, Message, StorageFactory};
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

use crate::config::BrokerSettings;
use crate::consumer::{AutoOffsetReset, ConsumerId, ConsumerRegistry, SeekTo, TopicAssignment};
use crate::error::{BrokerError, BrokerResult};
use crate::lock;
use crate::partition::PartitionKey;
use crate::partitioner::Partitioner;
use crate::segment::SegmentInfo;
use crate::store::SegmentStore;
use crate::topic::{Topic, TopicConfig, TopicRegistry};

// ════════════════════════════════════════════════════════════════
//  Results
// ════════════════════════════════════════════════════════════════

/// Acknowledgement of a durable append.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProduceAck {
    pub partition: u32,
    /// Partition offset of the record's first byte.
    pub offset: u64,
    /// Framed length written to the segment.
    pub bytes: u64,
}

/// A record handed to a consumer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    /// Offset of the following record; the value to commit.
    pub next_offset: u64,
    pub key: Option<Vec<u8>>,
    pub payload: Vec<u8>,
}

// ════════════════════════════════════════════════════════════════
//  Broker
// ════════════════════════════════════════════════════════════════

/// Entry point of the engine: topics, routing, partition logs and consumers.
///
/// All methods take `&self`; share a broker across tasks with `Arc`.
pub struct Broker {
    settings: RwLock<BrokerSettings>,
    topics: TopicRegistry,
    partitioner: Partitioner,
    store: SegmentStore,
    consumers: ConsumerRegistry,
}

impl Broker {
    pub fn new(settings: BrokerSettings, factory: Arc<dyn StorageFactory>) -> Self {
        tracing::info!(
            backend = factory.name(),
            segment_bytes = settings.segment_bytes,
            log_dir = ?settings.log_dir,
            "broker created"
        );
        Self {
            settings: RwLock::new(settings),
            topics: TopicRegistry::new(),
            partitioner: Partitioner::new(),
            store: SegmentStore::new(factory),
            consumers: ConsumerRegistry::new(),
        }
    }

    pub fn settings(&self) -> BrokerSettings {
        lock::read(&self.settings, "broker settings").clone()
    }

    /// Merge options into the broker-wide defaults.
    ///
    /// Affects segments opened and consumers subscribed afterwards.
    pub fn configure(&self, values: &ConfigValues) {
        let mut settings = lock::write(&self.settings, "broker settings");
        settings.apply(values);
        tracing::info!(
            segment_bytes = settings.segment_bytes,
            log_dir = ?settings.log_dir,
            auto_offset_reset = ?settings.auto_offset_reset,
            enable_auto_commit = settings.enable_auto_commit,
            "broker configured"
        );
    }

    // ── topics ───────────────────────────────────────────────────

    pub fn create_topic(&self, config: TopicConfig) -> BrokerResult<Arc<Topic>> {
        let topic = self.topics.create(config)?;
        tracing::info!(
            topic = topic.name(),
            partitions = topic.partition_count(),
            retention_secs = topic.config().retention.as_secs(),
            "topic created"
        );
        Ok(topic)
    }

    pub fn topic(&self, name: &str) -> BrokerResult<Arc<Topic>> {
        self.topics.lookup(name)
    }

    pub fn topic_names(&self) -> Vec<String> {
        self.topics.topic_names()
    }

    fn partition_key(&self, topic: &str, partition: u32) -> BrokerResult<PartitionKey> {
        let handle = self.topics.lookup(topic)?;
        let key = PartitionKey::new(topic, partition);
        if partition >= handle.partition_count() {
            return Err(BrokerError::NoSuchPartition(key));
        }
        Ok(key)
    }

    // ── produce ──────────────────────────────────────────────────

    /// Route `message` to a partition and append it.
    ///
    /// Returns only after the backing store accepted the write; waiting
    /// readers of the topic are woken afterwards.
    pub fn produce(&self, topic: &str, message: &Message) -> BrokerResult<ProduceAck> {
        let handle = self.topics.lookup(topic)?;
        let frame = message.encode_to_vec()?;
        let segment_settings = self.settings().segment_settings();

        let size = frame.len() as u64;
        if size > segment_settings.capacity {
            return Err(BrokerError::MessageTooLarge {
                size,
                capacity: segment_settings.capacity,
            });
        }

        let partition = self
            .partitioner
            .assign(topic, handle.partition_count(), message.routing_key())?;
        let key = PartitionKey::new(topic, partition);
        let appended = self.store.append(&key, &frame, &segment_settings)?;
        handle.notify();

        tracing::debug!(
            topic,
            partition,
            offset = appended.offset,
            bytes = appended.bytes_written,
            keyed = message.routing_key().is_some(),
            "produced"
        );

        Ok(ProduceAck {
            partition,
            offset: appended.offset,
            bytes: appended.bytes_written,
        })
    }

    // ── consumers ────────────────────────────────────────────────

    /// Register a consumer reading every partition of each listed topic.
    ///
    /// Starting offsets follow `auto.offset.reset`. Listing a topic twice
    /// is the same as listing it once.
    pub fn subscribe(&self, topics: &[&str]) -> BrokerResult<ConsumerId> {
        if topics.is_empty() {
            return Err(BrokerError::EmptySubscription);
        }
        let reset = self.settings().auto_offset_reset;

        let mut subscriptions = BTreeMap::new();
        for name in topics {
            let handle = self.topics.lookup(name)?;
            let offsets = handle
                .partitions()
                .map(|p| (p, self.reset_offset(name, p, reset)))
                .collect();
            subscriptions.insert(name.to_string(), TopicAssignment::new(offsets));
        }

        let id = self.consumers.register(subscriptions);
        tracing::info!(consumer = %id, topics = ?topics, reset = ?reset, "consumer subscribed");
        Ok(id)
    }

    fn reset_offset(&self, topic: &str, partition: u32, to: AutoOffsetReset) -> u64 {
        match to {
            AutoOffsetReset::Earliest => 0,
            AutoOffsetReset::Latest => self.store.end_offset(&PartitionKey::new(topic, partition)),
        }
    }

    pub fn unsubscribe(&self, consumer: ConsumerId) -> BrokerResult<()> {
        self.consumers.remove(consumer)?;
        tracing::info!(consumer = %consumer, "consumer unsubscribed");
        Ok(())
    }

    /// Read the next record for `consumer` without waiting.
    ///
    /// Partitions are tried round-robin, starting after the one that served
    /// the previous record. With auto-commit on, the served partition's
    /// offset moves past the record.
    ///
    /// A partition that fails to read is skipped so the others keep
    /// flowing; its error is returned only when no partition has a record.
    pub fn try_read_message(&self, topic: &str, consumer: ConsumerId) -> BrokerResult<Option<ConsumedMessage>> {
        let auto_commit = self.settings().enable_auto_commit;
        self.consumers.with_cursor(consumer, |cursor| {
            let assignment = cursor.assignment_mut(topic)?;
            let order: Vec<u32> = assignment.poll_order().collect();
            let mut failed = None;
            for partition in order {
                let offset = assignment.offset(partition).ok_or_else(|| {
                    BrokerError::InternalInconsistency(format!(
                        "consumer {consumer} has no offset for {topic}-{partition}"
                    ))
                })?;
                let key = PartitionKey::new(topic, partition);
                let (message, len) = match self.store.read_record(&key, offset) {
                    Ok(Some(record)) => record,
                    Ok(None) => continue,
                    Err(e) => {
                        tracing::warn!(
                            consumer = %consumer,
                            partition = %key,
                            offset,
                            error = %e,
                            "skipping unreadable partition"
                        );
                        if failed.is_none() {
                            failed = Some(e);
                        }
                        continue;
                    }
                };

                let next_offset = offset + len;
                if auto_commit {
                    assignment.set_offset(partition, next_offset)?;
                }
                assignment.mark_served(partition);
                tracing::debug!(consumer = %consumer, topic, partition, offset, next_offset, "consumed");

                return Ok(Some(ConsumedMessage {
                    topic: topic.to_string(),
                    partition,
                    offset,
                    next_offset,
                    key: message.key,
                    payload: message.payload,
                }));
            }
            match failed {
                Some(e) => Err(e),
                None => Ok(None),
            }
        })
    }

    /// Read the next record, waiting up to `timeout` for one to be produced.
    ///
    /// `Ok(None)` means the timeout passed with nothing to read.
    pub async fn read_message(
        &self,
        topic: &str,
        consumer: ConsumerId,
        timeout: Duration,
    ) -> BrokerResult<Option<ConsumedMessage>> {
        self.read_message_until(topic, consumer, timeout, &CancellationToken::new())
            .await
    }

    /// Like [`read_message`](Self::read_message), also returning `Ok(None)`
    /// as soon as `cancel` fires.
    pub async fn read_message_until(
        &self,
        topic: &str,
        consumer: ConsumerId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> BrokerResult<Option<ConsumedMessage>> {
        let deadline = tokio::time::Instant::now() + timeout;
        self.consumers
            .with_cursor(consumer, |cursor| cursor.assignment(topic).map(|_| ()))?;
        let handle = self.topics.lookup(topic)?;

        loop {
            // Subscribe before checking so an append in between still wakes us.
            let mut arrivals = handle.subscribe_notify();
            if let Some(message) = self.try_read_message(topic, consumer)? {
                return Ok(Some(message));
            }

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(consumer = %consumer, topic, "read cancelled");
                    return Ok(None);
                }
                woke = tokio::time::timeout_at(deadline, arrivals.recv()) => match woke {
                    Err(_) => return Ok(None),
                    Ok(Ok(())) | Ok(Err(RecvError::Lagged(_))) => continue,
                    Ok(Err(RecvError::Closed)) => {
                        return Err(BrokerError::InternalInconsistency(format!(
                            "notification channel of '{topic}' closed"
                        )));
                    }
                },
            }
        }
    }

    /// Set the stored offset of one partition, typically to a
    /// `ConsumedMessage::next_offset`.
    ///
    /// The offset must start a record or equal the partition end.
    pub fn commit(&self, consumer: ConsumerId, topic: &str, partition: u32, offset: u64) -> BrokerResult<()> {
        let key = self.partition_key(topic, partition)?;
        let end = self.store.end_offset(&key);
        if offset > end {
            return Err(BrokerError::OffsetOutOfRange { key, offset, end });
        }
        if !self.store.is_record_boundary(&key, offset)? {
            return Err(BrokerError::MisalignedOffset { key, offset });
        }
        self.consumers.with_cursor(consumer, |cursor| {
            cursor.assignment_mut(topic)?.set_offset(partition, offset)
        })?;
        tracing::debug!(consumer = %consumer, topic, partition, offset, "offset committed");
        Ok(())
    }

    /// Move every partition of `topic` to the start or the end of its log.
    pub fn seek(&self, consumer: ConsumerId, topic: &str, to: SeekTo) -> BrokerResult<()> {
        let reset = match to {
            SeekTo::Earliest => AutoOffsetReset::Earliest,
            SeekTo::Latest => AutoOffsetReset::Latest,
        };
        self.consumers.with_cursor(consumer, |cursor| {
            let assignment = cursor.assignment_mut(topic)?;
            let partitions = assignment.partitions().to_vec();
            for partition in partitions {
                assignment.set_offset(partition, self.reset_offset(topic, partition, reset))?;
            }
            Ok(())
        })?;
        tracing::info!(consumer = %consumer, topic, to = ?to, "consumer seek");
        Ok(())
    }

    /// Stored offset of `consumer` in one partition.
    pub fn position(&self, consumer: ConsumerId, topic: &str, partition: u32) -> BrokerResult<u64> {
        let key = self.partition_key(topic, partition)?;
        self.consumers.with_cursor(consumer, |cursor| {
            cursor
                .assignment(topic)?
                .offset(partition)
                .ok_or(BrokerError::NoSuchPartition(key))
        })
    }

    // ── inspection ───────────────────────────────────────────────

    pub fn active_segment(&self, topic: &str, partition: u32) -> BrokerResult<SegmentInfo> {
        let key = self.partition_key(topic, partition)?;
        self.store.active_segment(&key)
    }

    pub fn segments(&self, topic: &str, partition: u32) -> BrokerResult<Vec<SegmentInfo>> {
        let key = self.partition_key(topic, partition)?;
        Ok(self.store.segments(&key))
    }

    /// Raw framed bytes from `offset` to the end of its segment, at most `max_bytes`.
    pub fn read_at(&self, topic: &str, partition: u32, offset: u64, max_bytes: usize) -> BrokerResult<Vec<u8>> {
        let key = self.partition_key(topic, partition)?;
        self.store.read_at(&key, offset, max_bytes)
    }

    pub fn end_offset(&self, topic: &str, partition: u32) -> BrokerResult<u64> {
        let key = self.partition_key(topic, partition)?;
        Ok(self.store.end_offset(&key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AUTO_OFFSET_RESET, ENABLE_AUTO_COMMIT, LOG_SEGMENT_BYTES};
    use crate::error::ErrorCategory;
    use krake_api::{SegmentStorage, StorageContext, StorageError};
    use krake_storage_file::FileStorageFactory;
    use krake_storage_memory::MemoryStorageFactory;

    const RETENTION: Duration = Duration::from_secs(2 * 60 * 60);

    fn broker() -> Broker {
        Broker::new(BrokerSettings::default(), Arc::new(MemoryStorageFactory))
    }

    fn broker_with_topic(name: &str, partitions: u32) -> Broker {
        let broker = broker();
        broker
            .create_topic(TopicConfig::new(name, partitions, RETENTION))
            .unwrap();
        broker
    }

    fn payload(m: &Option<ConsumedMessage>) -> &[u8] {
        &m.as_ref().unwrap().payload
    }

    /// Partition 0 accepts writes but every read fails; other partitions are in memory.
    struct BadSectorFactory;

    struct BadSector {
        capacity: u64,
    }

    impl SegmentStorage for BadSector {
        fn write_at(&self, _position: u64, _data: &[u8]) -> Result<(), StorageError> {
            Ok(())
        }

        fn read_at(&self, position: u64, _len: usize) -> Result<Vec<u8>, StorageError> {
            Err(StorageError::io(format!("bad sector at {position}")))
        }

        fn capacity(&self) -> u64 {
            self.capacity
        }

        fn flush(&self) -> Result<(), StorageError> {
            Ok(())
        }
    }

    impl StorageFactory for BadSectorFactory {
        fn name(&self) -> &'static str {
            "bad-sector"
        }

        fn create(&self, ctx: &StorageContext) -> Result<Arc<dyn SegmentStorage>, StorageError> {
            if ctx.id.partition == 0 {
                Ok(Arc::new(BadSector { capacity: ctx.capacity }))
            } else {
                MemoryStorageFactory.create(ctx)
            }
        }
    }

    #[test]
    fn keyless_records_spread_round_robin() {
        let broker = broker_with_topic("orders", 3);
        let acks: Vec<ProduceAck> = ["m0", "m1", "m2", "m3"]
            .iter()
            .map(|p| broker.produce("orders", &Message::new(*p)).unwrap())
            .collect();

        let placed: Vec<(u32, u64)> = acks.iter().map(|a| (a.partition, a.offset)).collect();
        assert_eq!(placed, vec![(0, 0), (1, 0), (2, 0), (0, 7)]);
        assert!(acks.iter().all(|a| a.bytes == 7));
        assert_eq!(broker.end_offset("orders", 0).unwrap(), 14);
    }

    #[tokio::test]
    async fn consumer_reads_every_partition_fairly() {
        let broker = broker_with_topic("orders", 3);
        for p in ["m0", "m1", "m2", "m3"] {
            broker.produce("orders", &Message::new(p)).unwrap();
        }
        let consumer = broker.subscribe(&["orders"]).unwrap();

        let mut got = Vec::new();
        while let Some(m) = broker
            .read_message("orders", consumer, Duration::ZERO)
            .await
            .unwrap()
        {
            got.push((m.partition, m.offset, String::from_utf8(m.payload).unwrap()));
        }
        assert_eq!(
            got,
            vec![
                (0, 0, "m0".to_string()),
                (1, 0, "m1".to_string()),
                (2, 0, "m2".to_string()),
                (0, 7, "m3".to_string()),
            ]
        );
        assert_eq!(broker.position(consumer, "orders", 0).unwrap(), 14);
    }

    #[test]
    fn keyed_records_stay_on_one_partition() {
        let broker = broker_with_topic("users", 8);
        let first = broker.produce("users", &Message::with_key("user-7", "a")).unwrap();
        let second = broker.produce("users", &Message::with_key("user-7", "b")).unwrap();
        assert_eq!(first.partition, second.partition);
        assert_eq!(second.offset, first.offset + first.bytes);
    }

    #[tokio::test]
    async fn rotation_keeps_records_readable() {
        let broker = broker();
        broker.configure(&ConfigValues::new().with(LOG_SEGMENT_BYTES, 7u64));
        broker.create_topic(TopicConfig::new("t", 1, RETENTION)).unwrap();

        broker.produce("t", &Message::new("ab")).unwrap();
        let ack = broker.produce("t", &Message::new("cd")).unwrap();
        assert_eq!(ack.offset, 7);

        let segments = broker.segments("t", 0).unwrap();
        assert_eq!(segments.len(), 2);
        assert_eq!(segments[0].base_offset(), 0);
        assert!(segments[0].closed);
        assert_eq!(segments[1].base_offset(), 7);
        assert_eq!(broker.active_segment("t", 0).unwrap().base_offset(), 7);

        let consumer = broker.subscribe(&["t"]).unwrap();
        let first = broker.read_message("t", consumer, Duration::ZERO).await.unwrap();
        let second = broker.read_message("t", consumer, Duration::ZERO).await.unwrap();
        assert_eq!(payload(&first), b"ab");
        assert_eq!(payload(&second), b"cd");
    }

    #[test]
    fn produce_errors() {
        let broker = broker_with_topic("t", 1);
        assert!(matches!(
            broker.produce("missing", &Message::new("x")),
            Err(BrokerError::NoSuchTopic(_))
        ));

        broker.configure(&ConfigValues::new().with(LOG_SEGMENT_BYTES, 8u64));
        let err = broker.produce("t", &Message::new("too long")).unwrap_err();
        assert!(matches!(err, BrokerError::MessageTooLarge { size: 13, capacity: 8 }));
        assert_eq!(err.category(), ErrorCategory::User);
        assert!(broker.segments("t", 0).unwrap().is_empty());

        let err = broker
            .produce("t", &Message::with_key(vec![0u8; 70_000], "x"))
            .unwrap_err();
        assert!(matches!(err, BrokerError::KeyTooLarge(70_000)));
    }

    #[test]
    fn duplicate_topic_is_rejected() {
        let broker = broker_with_topic("t", 2);
        let err = broker
            .create_topic(TopicConfig::new("t", 5, RETENTION))
            .unwrap_err();
        assert!(matches!(err, BrokerError::TopicAlreadyExists(_)));
        assert_eq!(broker.topic("t").unwrap().partition_count(), 2);
    }

    #[test]
    fn topic_names_cannot_leave_the_log_dir() {
        let root = tempfile::TempDir::new().unwrap();
        let logs = root.path().join("logs");
        let factory = FileStorageFactory::with_dir(logs.to_string_lossy().into_owned());
        let broker = Broker::new(BrokerSettings::default(), Arc::new(factory));

        for name in ["../escaped", "nested/topic", ".."] {
            let err = broker
                .create_topic(TopicConfig::new(name, 1, RETENTION))
                .unwrap_err();
            assert!(matches!(err, BrokerError::InvalidTopicConfig { .. }), "{name:?}");
            assert!(matches!(
                broker.produce(name, &Message::new("x")),
                Err(BrokerError::NoSuchTopic(_))
            ));
        }
        assert!(krake_storage_file::discover(root.path()).unwrap().is_empty());
        assert!(!root.path().join("escaped").exists());

        broker.create_topic(TopicConfig::new("escaped", 1, RETENTION)).unwrap();
        broker.produce("escaped", &Message::new("x")).unwrap();
        assert_eq!(krake_storage_file::discover(&logs).unwrap().len(), 1);
    }

    #[test]
    fn no_segment_before_first_write() {
        let broker = broker_with_topic("t", 2);
        assert!(matches!(
            broker.active_segment("t", 1),
            Err(BrokerError::NoSuchSegment(_))
        ));
        assert!(matches!(
            broker.active_segment("t", 2),
            Err(BrokerError::NoSuchPartition(_))
        ));
        assert!(broker.read_at("t", 0, 0, 64).unwrap().is_empty());
    }

    #[tokio::test]
    async fn subscribe_errors() {
        let broker = broker_with_topic("t", 1);
        broker.create_topic(TopicConfig::new("u", 1, RETENTION)).unwrap();
        assert!(matches!(broker.subscribe(&[]), Err(BrokerError::EmptySubscription)));
        assert!(matches!(broker.subscribe(&["nope"]), Err(BrokerError::NoSuchTopic(_))));

        let consumer = broker.subscribe(&["t"]).unwrap();
        let err = broker
            .read_message("u", consumer, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::NotSubscribed { .. }));

        broker.unsubscribe(consumer).unwrap();
        let err = broker
            .read_message("t", consumer, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::UnknownConsumer(_)));
    }

    #[tokio::test]
    async fn one_consumer_many_topics() {
        let broker = broker_with_topic("a", 1);
        broker.create_topic(TopicConfig::new("b", 2, RETENTION)).unwrap();
        broker.produce("a", &Message::new("from-a")).unwrap();
        broker.produce("b", &Message::new("from-b")).unwrap();

        let consumer = broker.subscribe(&["a", "b", "a"]).unwrap();
        let a = broker.read_message("a", consumer, Duration::ZERO).await.unwrap();
        let b = broker.read_message("b", consumer, Duration::ZERO).await.unwrap();
        assert_eq!(payload(&a), b"from-a");
        assert_eq!(payload(&b), b"from-b");
    }

    #[tokio::test]
    async fn latest_reset_skips_existing_records() {
        let broker = broker_with_topic("t", 1);
        broker.produce("t", &Message::new("old")).unwrap();
        broker.configure(&ConfigValues::new().with(AUTO_OFFSET_RESET, "latest"));

        let consumer = broker.subscribe(&["t"]).unwrap();
        assert!(broker.read_message("t", consumer, Duration::ZERO).await.unwrap().is_none());
        broker.produce("t", &Message::new("new")).unwrap();
        let m = broker.read_message("t", consumer, Duration::ZERO).await.unwrap();
        assert_eq!(payload(&m), b"new");
    }

    #[tokio::test]
    async fn manual_commit_and_seek() {
        let broker = broker_with_topic("t", 1);
        broker.configure(&ConfigValues::new().with(ENABLE_AUTO_COMMIT, false));
        broker.produce("t", &Message::new("one")).unwrap();
        broker.produce("t", &Message::new("two")).unwrap();
        let consumer = broker.subscribe(&["t"]).unwrap();

        let first = broker.read_message("t", consumer, Duration::ZERO).await.unwrap().unwrap();
        let again = broker.read_message("t", consumer, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(first, again);

        broker.commit(consumer, "t", 0, first.next_offset).unwrap();
        let second = broker.read_message("t", consumer, Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(second.payload, b"two");

        let end = broker.end_offset("t", 0).unwrap();
        assert!(matches!(
            broker.commit(consumer, "t", 0, end + 1),
            Err(BrokerError::OffsetOutOfRange { .. })
        ));

        broker.seek(consumer, "t", SeekTo::Latest).unwrap();
        assert_eq!(broker.position(consumer, "t", 0).unwrap(), end);
        broker.seek(consumer, "t", SeekTo::Earliest).unwrap();
        assert_eq!(broker.position(consumer, "t", 0).unwrap(), 0);
    }

    #[tokio::test]
    async fn commit_must_land_on_a_record_boundary() {
        let broker = broker_with_topic("t", 2);
        broker.produce("t", &Message::new("hello world")).unwrap();
        broker.produce("t", &Message::new("other")).unwrap();
        let consumer = broker.subscribe(&["t"]).unwrap();

        let err = broker.commit(consumer, "t", 0, 1).unwrap_err();
        assert!(matches!(err, BrokerError::MisalignedOffset { offset: 1, .. }));
        assert_eq!(err.category(), ErrorCategory::User);
        assert_eq!(broker.position(consumer, "t", 0).unwrap(), 0);

        let end = broker.end_offset("t", 0).unwrap();
        broker.commit(consumer, "t", 0, end).unwrap();
        broker.commit(consumer, "t", 0, 0).unwrap();

        let first = broker.read_message("t", consumer, Duration::ZERO).await.unwrap();
        let second = broker.read_message("t", consumer, Duration::ZERO).await.unwrap();
        assert_eq!(payload(&first), b"hello world");
        assert_eq!(payload(&second), b"other");
    }

    #[tokio::test]
    async fn unreadable_partition_does_not_block_the_others() {
        let broker = Broker::new(BrokerSettings::default(), Arc::new(BadSectorFactory));
        broker.create_topic(TopicConfig::new("t", 2, RETENTION)).unwrap();
        assert_eq!(broker.produce("t", &Message::new("lost")).unwrap().partition, 0);
        assert_eq!(broker.produce("t", &Message::new("kept")).unwrap().partition, 1);
        let consumer = broker.subscribe(&["t"]).unwrap();

        let got = broker.read_message("t", consumer, Duration::ZERO).await.unwrap();
        assert_eq!(payload(&got), b"kept");
        assert_eq!(got.unwrap().partition, 1);

        // Nothing left anywhere else: the broken partition's error surfaces.
        let err = broker
            .read_message("t", consumer, Duration::ZERO)
            .await
            .unwrap_err();
        assert!(matches!(err, BrokerError::SegmentReadFailed { .. }));
        assert!(err.is_retryable());
        assert_eq!(broker.position(consumer, "t", 0).unwrap(), 0);
    }

    #[tokio::test]
    async fn read_times_out_empty() {
        let broker = broker_with_topic("t", 2);
        let consumer = broker.subscribe(&["t"]).unwrap();
        let started = std::time::Instant::now();
        let got = broker
            .read_message("t", consumer, Duration::from_millis(30))
            .await
            .unwrap();
        assert!(got.is_none());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[tokio::test]
    async fn waiting_reader_wakes_on_produce() {
        let broker = Arc::new(broker_with_topic("t", 4));
        let consumer = broker.subscribe(&["t"]).unwrap();

        let producer = {
            let broker = Arc::clone(&broker);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                broker.produce("t", &Message::with_key("k", "late")).unwrap();
            })
        };

        let got = broker
            .read_message("t", consumer, Duration::from_secs(5))
            .await
            .unwrap();
        assert_eq!(payload(&got), b"late");
        producer.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_ends_the_wait() {
        let broker = broker_with_topic("t", 1);
        let consumer = broker.subscribe(&["t"]).unwrap();
        let cancel = CancellationToken::new();

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let started = std::time::Instant::now();
        let got = broker
            .read_message_until("t", consumer, Duration::from_secs(30), &cancel)
            .await
            .unwrap();
        assert!(got.is_none());
        assert!(started.elapsed() < Duration::from_secs(30));
    }
}
