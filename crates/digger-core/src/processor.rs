//! The live-stats processor.
//!
//! `LiveStats` runs each record through the decoder, the optional filter,
//! and the path extractor, then updates the counters that back both the
//! progress display and the final summary table.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use regex::bytes::Regex;
use serde::Serialize;
use serde_json::value::RawValue;
use tracing::{debug, info, warn, Level};

use digger_proto::Decoder;
use digger_stats::{
    MessageCounter, TimeBucketCounter, TopKCounter, ALL_VALUE, DIM_SEPARATOR, INVALID_VALUE,
    MISSING_VALUE,
};

use crate::paths;
use crate::progress::{self, ProgressHandle, ProgressMode};
use crate::{DiggerError, Record};

const RATE_RESOLUTION: Duration = Duration::from_millis(250);
const RATE_LENGTH: Duration = Duration::from_secs(5);

/// Types that can process and summarize records.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Handle one record. Errors are informational; the engine logs them and
    /// keeps going.
    fn process(&mut self, record: &Record) -> Result<(), DiggerError>;

    /// Stop any background work owned by this processor.
    async fn stop(&mut self) -> Result<(), DiggerError>;

    /// A human-readable summary of everything processed so far.
    fn summary(&self) -> String;
}

/// Inputs for a [`LiveStats`] processor.
#[derive(Clone, Debug)]
pub struct LiveStatsConfig {
    pub filter: Option<String>,
    pub k: usize,
    pub numeric: bool,
    pub paths: String,
    pub print_missing: bool,
    pub schemas: Vec<String>,
    pub raw: bool,
    pub raw_extended: bool,
    pub sort_by_name: bool,
}

impl Default for LiveStatsConfig {
    fn default() -> Self {
        LiveStatsConfig {
            filter: None,
            k: 25,
            numeric: false,
            paths: String::new(),
            print_missing: false,
            schemas: Vec::new(),
            raw: false,
            raw_extended: false,
            sort_by_name: false,
        }
    }
}

/// Processor that calculates and displays stats for a structured record
/// stream.
///
/// `process` is cheap and safe to call concurrently with the progress
/// renderer; all shared state lives in the internally-locked counters.
pub struct LiveStats {
    config: LiveStatsConfig,
    decoder: Decoder,
    path_groups: Vec<Vec<String>>,
    filter: Option<Regex>,

    top_k: Arc<TopKCounter>,
    messages: Arc<MessageCounter>,
    rate: Arc<TimeBucketCounter>,
    progress: Option<ProgressHandle>,
}

impl LiveStats {
    /// Create a new instance and start the progress-rendering loop. Must be
    /// called from within a tokio runtime.
    pub fn new(config: LiveStatsConfig) -> Result<Self, DiggerError> {
        let filter = config
            .filter
            .as_deref()
            .filter(|f| !f.is_empty())
            .map(Regex::new)
            .transpose()?;

        let decoder = Decoder::new(&config.schemas)?;
        let path_groups = paths::parse_path_groups(&config.paths);

        let top_k = Arc::new(TopKCounter::new(config.k));
        let messages = Arc::new(MessageCounter::new());
        let rate = Arc::new(TimeBucketCounter::new(RATE_RESOLUTION, RATE_LENGTH));

        let mode = if config.raw || config.raw_extended {
            // Nothing may land on stdout that would break jq or other
            // downstream consumers.
            ProgressMode::Silent
        } else if tracing::enabled!(Level::DEBUG) || config.print_missing {
            // The live region tears frequent log output, so fall back to
            // plain lines at a slow tick.
            ProgressMode::Plain
        } else {
            ProgressMode::Interactive
        };

        let progress = progress::spawn(mode, top_k.clone(), messages.clone(), rate.clone());

        Ok(LiveStats {
            config,
            decoder,
            path_groups,
            filter,
            top_k,
            messages,
            rate,
            progress: Some(progress),
        })
    }
}

#[async_trait]
impl Processor for LiveStats {
    fn process(&mut self, record: &Record) -> Result<(), DiggerError> {
        let decoded = match self.decoder.to_json(&record.value) {
            Ok(decoded) => decoded,
            Err(err) => {
                debug!(%err, "error decoding record to JSON");
                self.top_k.add(INVALID_VALUE, 1.0);
                return Ok(());
            }
        };

        if tracing::enabled!(Level::DEBUG) {
            debug!(
                partition = record.partition,
                offset = record.offset,
                key = %record.key,
                value = %String::from_utf8_lossy(&decoded),
                "got record",
            );
        }

        self.rate.increment(Utc::now(), 1);

        if let Some(filter) = &self.filter {
            if !filter.is_match(&decoded) {
                self.messages
                    .update(record.partition, record.offset, record.time, false);
                debug!("dropping record due to filter");
                return Ok(());
            }
        }

        if self.config.raw || self.config.raw_extended {
            println!("{}", self.raw_string(record, &decoded));
        }

        self.messages
            .update(record.partition, record.offset, record.time, true);

        let values = paths::path_values(&decoded, &self.path_groups);

        for value in &values {
            if self.config.numeric {
                self.add_numeric(value);
            } else {
                self.top_k.add(value, 1.0);
            }
        }

        if values.is_empty() {
            self.top_k.add(MISSING_VALUE, 1.0);
            if self.config.print_missing {
                info!(
                    "Record is missing all paths: {}",
                    String::from_utf8_lossy(&decoded),
                );
            }
        }

        Ok(())
    }

    async fn stop(&mut self) -> Result<(), DiggerError> {
        if let Some(progress) = self.progress.take() {
            progress.stop().await?;
        }
        Ok(())
    }

    fn summary(&self) -> String {
        format!(
            "Top K values (approximate):\n{}",
            self.top_k.pretty_table(
                self.path_groups.len(),
                self.config.numeric,
                self.config.sort_by_name,
            ),
        )
    }
}

impl LiveStats {
    /// In numeric mode the trailing component of each extracted value is the
    /// numeric leaf; everything before it is the grouping prefix.
    fn add_numeric(&self, value: &str) {
        let components: Vec<&str> = value.split(DIM_SEPARATOR).collect();
        let numeric_component = components[components.len() - 1];

        if numeric_component == MISSING_VALUE {
            self.top_k.add(MISSING_VALUE, 1.0);
            return;
        }

        let numeric_value: f64 = match numeric_component.parse() {
            Ok(parsed) => parsed,
            Err(_) => {
                debug!(value = numeric_component, "invalid numeric value");
                self.top_k.add(INVALID_VALUE, 1.0);
                return;
            }
        };

        let bucket_value = if components.len() == 1 {
            ALL_VALUE.to_string()
        } else {
            components[..components.len() - 1].join(DIM_SEPARATOR)
        };

        self.top_k.add(&bucket_value, numeric_value);
    }

    fn raw_string(&self, record: &Record, decoded: &[u8]) -> String {
        if !self.config.raw_extended {
            return String::from_utf8_lossy(decoded).into_owned();
        }

        let decoded_value: &RawValue = match serde_json::from_slice(decoded) {
            Ok(value) => value,
            Err(err) => {
                warn!(%err, "error marshalling JSON");
                return String::new();
            }
        };

        let extended = ExtendedRecord {
            decoded_value,
            key: &record.key,
            offset: record.offset,
            partition: record.partition,
            time: record.time,
        };

        match serde_json::to_string(&extended) {
            Ok(output) => output,
            Err(err) => {
                warn!(%err, "error marshalling JSON");
                String::new()
            }
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ExtendedRecord<'a> {
    decoded_value: &'a RawValue,
    key: &'a str,
    offset: i64,
    partition: i32,
    time: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use digger_stats::Bucket;

    fn record(value: &str) -> Record {
        Record {
            value: value.as_bytes().to_vec(),
            ..Record::default()
        }
    }

    async fn process_all(mut live_stats: LiveStats, records: &[Record]) -> LiveStats {
        for record in records {
            live_stats.process(record).unwrap();
        }
        live_stats.stop().await.unwrap();
        live_stats
    }

    #[tokio::test]
    async fn test_live_stats_single_dimension() {
        let live_stats = LiveStats::new(LiveStatsConfig {
            filter: Some("filter-value".to_string()),
            k: 10,
            paths: "body.id,body.name".to_string(),
            ..LiveStatsConfig::default()
        })
        .unwrap();

        let records = vec![
            record(r#"{"body": {"id": "id1"}, "key": "filter-value"}"#),
            record(r#"{"body": {"id": "id1"}, "key": "filter-value"}"#),
            record(r#"{"body": {"id": "id1"}, "key": "non-matching-value"}"#),
            record(r#"{"body": {"name": "testname"}, "key": "filter-value"}"#),
            record(r#"{"body": {"name": ["testname", "othername"]}, "key": "filter-value"}"#),
            record(r#"{"body": {}, "key": "filter-value"}"#),
        ];

        let live_stats = process_all(live_stats, &records).await;

        let buckets = live_stats.top_k.buckets(4, false);
        assert_eq!(buckets.len(), 4);

        assert_eq!(buckets[0].key, "id1");
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[1].key, "testname");
        assert_eq!(buckets[1].count, 2);
        assert_eq!(buckets[2].key, "__missing__");
        assert_eq!(buckets[2].count, 1);
        assert_eq!(buckets[3].key, "othername");
        assert_eq!(buckets[3].count, 1);

        let messages = live_stats.messages.summary();
        assert_eq!(messages.total_messages, 6);
        assert_eq!(messages.post_filter_messages, 5);
    }

    #[tokio::test]
    async fn test_live_stats_single_dimension_numeric() {
        let live_stats = LiveStats::new(LiveStatsConfig {
            k: 10,
            numeric: true,
            paths: "body.value".to_string(),
            ..LiveStatsConfig::default()
        })
        .unwrap();

        let records = vec![
            record(r#"{"body": {"value": 1}}"#),
            record(r#"{"body": {"value": 2}}"#),
            record(r#"{"body": {"value": 3}}"#),
            record(r#"{"body": {"value": 4}}"#),
            record(r#"{"body": {"value": "not a number"}}"#),
            record(r#"{"body": {}}"#),
        ];

        let live_stats = process_all(live_stats, &records).await;

        let buckets = live_stats.top_k.buckets(4, false);
        assert_eq!(buckets.len(), 3);

        assert_eq!(
            buckets[0],
            Bucket {
                key: "__all__".to_string(),
                count: 4,
                min: 1.0,
                max: 4.0,
                sum: 10.0,
            },
        );
        assert_eq!(buckets[1].key, "__invalid__");
        assert_eq!(buckets[1].count, 1);
        assert_eq!(buckets[2].key, "__missing__");
        assert_eq!(buckets[2].count, 1);
    }

    #[tokio::test]
    async fn test_live_stats_multi_dimension() {
        let live_stats = LiveStats::new(LiveStatsConfig {
            k: 10,
            paths: "body.id,body.altId;body.name".to_string(),
            ..LiveStatsConfig::default()
        })
        .unwrap();

        let records = vec![
            record(r#"{"body": {"id": "id1", "name": "name1"}}"#),
            record(r#"{"body": {"altId": "id1", "name": "name1"}}"#),
            record(r#"{"body": {"id": "id1", "name": "name2"}}"#),
            record(r#"{"body": {"id": "id2", "name": "name1"}}"#),
            record(r#"{"body": {"name": "name3"}}"#),
        ];

        let live_stats = process_all(live_stats, &records).await;

        let buckets = live_stats.top_k.buckets(4, false);
        assert_eq!(buckets.len(), 4);

        assert_eq!(buckets[0].key, "id1∪∪name1");
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[1].key, "__missing__∪∪name3");
        assert_eq!(buckets[1].count, 1);
        assert_eq!(buckets[2].key, "id1∪∪name2");
        assert_eq!(buckets[2].count, 1);
        assert_eq!(buckets[3].key, "id2∪∪name1");
        assert_eq!(buckets[3].count, 1);
    }

    #[tokio::test]
    async fn test_live_stats_multi_dimension_numeric() {
        let live_stats = LiveStats::new(LiveStatsConfig {
            k: 10,
            numeric: true,
            paths: "body.id;body.value".to_string(),
            ..LiveStatsConfig::default()
        })
        .unwrap();

        let records = vec![
            record(r#"{"body": {"id": "id1", "value": 1}}"#),
            record(r#"{"body": {"id": "id1", "value": 2}}"#),
            record(r#"{"body": {"id": "id2", "value": 3}}"#),
            record(r#"{"body": {"id": "id2"}}"#),
            record(r#"{"body": {"id": "id3", "value": "not a number"}}"#),
        ];

        let live_stats = process_all(live_stats, &records).await;

        let buckets = live_stats.top_k.buckets(4, false);
        assert_eq!(buckets.len(), 4);

        assert_eq!(buckets[0].key, "id1");
        assert_eq!(buckets[0].count, 2);
        assert_eq!(buckets[0].min, 1.0);
        assert_eq!(buckets[0].max, 2.0);
        assert_eq!(buckets[0].sum, 3.0);
        assert_eq!(buckets[1].key, "__invalid__");
        assert_eq!(buckets[1].count, 1);
        assert_eq!(buckets[2].key, "__missing__");
        assert_eq!(buckets[2].count, 1);
        assert_eq!(buckets[3].key, "id2");
        assert_eq!(buckets[3].count, 1);
        assert_eq!(buckets[3].sum, 3.0);
    }

    #[tokio::test]
    async fn test_live_stats_invalid_records() {
        let live_stats = LiveStats::new(LiveStatsConfig {
            k: 10,
            paths: "body.id".to_string(),
            ..LiveStatsConfig::default()
        })
        .unwrap();

        let records = vec![
            record(r#"{"body": {"id": "id1"}}"#),
            record("not json at all"),
        ];

        let live_stats = process_all(live_stats, &records).await;

        let summary = live_stats.top_k.summary();
        assert_eq!(summary.total_invalid, 1);

        // Undecodable records are not counted by the message counter
        assert_eq!(live_stats.messages.summary().total_messages, 1);
    }

    #[tokio::test]
    async fn test_live_stats_bad_filter_is_fatal() {
        let result = LiveStats::new(LiveStatsConfig {
            filter: Some("[unclosed".to_string()),
            k: 10,
            ..LiveStatsConfig::default()
        });
        assert!(matches!(result, Err(DiggerError::Filter(_))));
    }

    #[tokio::test]
    async fn test_live_stats_summary_table() {
        let live_stats = LiveStats::new(LiveStatsConfig {
            k: 10,
            paths: "body.id".to_string(),
            ..LiveStatsConfig::default()
        })
        .unwrap();

        let records = vec![
            record(r#"{"body": {"id": "id1"}}"#),
            record(r#"{"body": {"id": "id1"}}"#),
        ];

        let live_stats = process_all(live_stats, &records).await;

        let summary = live_stats.summary();
        assert!(summary.starts_with("Top K values (approximate):"));
        assert!(summary.contains("id1"));
        assert!(summary.contains("100.00%"));
    }
}
