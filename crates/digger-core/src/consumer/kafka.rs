use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{Consumer as _, StreamConsumer};
use rdkafka::message::Message as _;
use rdkafka::{Offset, TopicPartitionList};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::Consumer;
use crate::{DiggerError, Record};

const OFFSET_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Consumer that reads records from a Kafka topic.
///
/// Each configured partition gets its own reader task. The starting position
/// is resolved per partition: by timestamp when `since` is set, otherwise
/// from `offset` (zero or negative means "tail"). Read errors are logged and
/// retried in place; a record timestamp past `until` ends that partition's
/// reader cleanly.
#[derive(Clone, Debug, Default)]
pub struct KafkaConsumer {
    pub brokers: String,
    pub topic: String,
    pub partitions: Vec<i32>,
    pub offset: i64,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,

    /// Fetch size hints passed through to the broker client.
    pub fetch_min_bytes: Option<u32>,
    pub fetch_max_bytes: Option<u32>,
}

#[async_trait]
impl Consumer for KafkaConsumer {
    async fn run(
        &self,
        shutdown: CancellationToken,
        records: mpsc::Sender<Record>,
    ) -> Result<(), DiggerError> {
        let (err_tx, mut err_rx) = mpsc::channel(self.partitions.len().max(1));

        for &partition in &self.partitions {
            let consumer = self.clone();
            let shutdown = shutdown.clone();
            let records = records.clone();
            let err_tx = err_tx.clone();

            tokio::spawn(async move {
                let result = consumer.consume_partition(partition, shutdown, records).await;
                let _ = err_tx.send(result).await;
            });
        }
        drop(err_tx);

        for _ in 0..self.partitions.len() {
            if let Some(Err(err)) = err_rx.recv().await {
                return Err(err);
            }
        }

        Ok(())
    }
}

impl KafkaConsumer {
    async fn consume_partition(
        &self,
        partition: i32,
        shutdown: CancellationToken,
        records: mpsc::Sender<Record>,
    ) -> Result<(), DiggerError> {
        let consumer = self.new_reader(partition)?;

        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => return Err(DiggerError::Cancelled),
                result = consumer.recv() => match result {
                    Ok(message) => message,
                    Err(err) => {
                        warn!(partition, %err, "failed to read message");
                        continue;
                    }
                },
            };

            let time = message
                .timestamp()
                .to_millis()
                .and_then(DateTime::from_timestamp_millis);

            if let (Some(until), Some(time)) = (self.until, time) {
                if time > until {
                    warn!(partition, "partition has reached until time, stopping");
                    return Ok(());
                }
            }

            let record = Record {
                partition,
                offset: message.offset(),
                key: message
                    .key()
                    .map(|key| String::from_utf8_lossy(key).into_owned())
                    .unwrap_or_default(),
                time,
                value: message.payload().map(<[u8]>::to_vec).unwrap_or_default(),
            };

            if records.send(record).await.is_err() {
                return Err(DiggerError::Cancelled);
            }
        }
    }

    fn new_reader(&self, partition: i32) -> Result<StreamConsumer, DiggerError> {
        let mut config = ClientConfig::new();
        config
            .set("bootstrap.servers", &self.brokers)
            .set("group.id", "digger")
            .set("enable.auto.commit", "false")
            .set("enable.partition.eof", "false");
        if let Some(min_bytes) = self.fetch_min_bytes {
            config.set("fetch.min.bytes", min_bytes.to_string());
        }
        if let Some(max_bytes) = self.fetch_max_bytes {
            config.set("fetch.max.bytes", max_bytes.to_string());
        }

        let consumer: StreamConsumer = config.create()?;

        let mut assignment = TopicPartitionList::new();

        if let Some(since) = self.since {
            // Resolve the starting offset by timestamp
            assignment.add_partition_offset(
                &self.topic,
                partition,
                Offset::Offset(since.timestamp_millis()),
            )?;
            let resolved = consumer.offsets_for_times(assignment, OFFSET_LOOKUP_TIMEOUT)?;
            consumer.assign(&resolved)?;
        } else {
            assignment.add_partition_offset(&self.topic, partition, self.starting_offset())?;
            consumer.assign(&assignment)?;
        }

        Ok(consumer)
    }

    /// Offset policy when no `since` time is configured: zero and negative
    /// values are tail sentinels, positive values are explicit offsets.
    fn starting_offset(&self) -> Offset {
        if self.offset > 0 {
            Offset::Offset(self.offset)
        } else {
            Offset::End
        }
    }
}
