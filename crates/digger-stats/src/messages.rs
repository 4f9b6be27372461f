use std::collections::HashMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Detailed stats about the records seen so far in a specific partition
/// (or file or object for non-queue sources).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartitionCounter {
    pub partition_id: i32,
    pub total_messages: i64,
    pub post_filter_messages: i64,
    pub first_offset: i64,
    pub last_offset: i64,
    pub first_time: Option<DateTime<Utc>>,
    pub last_time: Option<DateTime<Utc>>,
}

/// Snapshot of the counts seen so far across all partitions.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MessageCounterSummary {
    pub total_messages: i64,
    pub post_filter_messages: i64,
    pub first_time: Option<DateTime<Utc>>,
    pub last_time: Option<DateTime<Utc>>,
    pub partition_counters: HashMap<i32, PartitionCounter>,
}

/// Stores record counts by partition. Used by the digger progress view.
#[derive(Default)]
pub struct MessageCounter {
    inner: Mutex<MessageCounterInner>,
}

#[derive(Default)]
struct MessageCounterInner {
    total_messages: i64,
    post_filter_messages: i64,
    partition_counters: HashMap<i32, PartitionCounter>,
}

impl MessageCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one message for the argument partition. `post_filter` marks
    /// messages that passed the configured filter and count toward the
    /// analytical stats.
    pub fn update(
        &self,
        partition: i32,
        offset: i64,
        time: Option<DateTime<Utc>>,
        post_filter: bool,
    ) {
        let mut inner = self.lock();

        inner.total_messages += 1;
        if post_filter {
            inner.post_filter_messages += 1;
        }

        let counter = inner
            .partition_counters
            .entry(partition)
            .or_insert_with(|| PartitionCounter {
                partition_id: partition,
                total_messages: 0,
                post_filter_messages: 0,
                first_offset: offset,
                last_offset: offset,
                first_time: time,
                last_time: time,
            });

        counter.total_messages += 1;
        if post_filter {
            counter.post_filter_messages += 1;
        }

        if offset < counter.first_offset {
            counter.first_offset = offset;
        }
        if offset > counter.last_offset {
            counter.last_offset = offset;
        }
        if let Some(time) = time {
            if counter.first_time.map_or(true, |first| time < first) {
                counter.first_time = Some(time);
            }
            if counter.last_time.map_or(true, |last| time > last) {
                counter.last_time = Some(time);
            }
        }
    }

    /// Snapshot the per-partition counters and fold first/last times across
    /// partitions.
    pub fn summary(&self) -> MessageCounterSummary {
        let inner = self.lock();

        let mut summary = MessageCounterSummary {
            total_messages: inner.total_messages,
            post_filter_messages: inner.post_filter_messages,
            first_time: None,
            last_time: None,
            partition_counters: inner.partition_counters.clone(),
        };

        for counter in inner.partition_counters.values() {
            if let Some(first) = counter.first_time {
                if summary.first_time.map_or(true, |t| first < t) {
                    summary.first_time = Some(first);
                }
            }
            if let Some(last) = counter.last_time {
                if summary.last_time.map_or(true, |t| last > t) {
                    summary.last_time = Some(last);
                }
            }
        }

        summary
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MessageCounterInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> Option<DateTime<Utc>> {
        Some(Utc.timestamp_opt(secs, 0).unwrap())
    }

    #[test]
    fn test_message_counter() {
        let counter = MessageCounter::new();

        counter.update(2, 123, ts(900), true);
        counter.update(3, 1234, ts(1000), true);
        counter.update(3, 1235, ts(1100), false);

        let summary = counter.summary();
        assert_eq!(summary.total_messages, 3);
        assert_eq!(summary.post_filter_messages, 2);
        assert_eq!(summary.first_time, ts(900));
        assert_eq!(summary.last_time, ts(1100));

        assert_eq!(
            summary.partition_counters.get(&3),
            Some(&PartitionCounter {
                partition_id: 3,
                total_messages: 2,
                post_filter_messages: 1,
                first_offset: 1234,
                last_offset: 1235,
                first_time: ts(1000),
                last_time: ts(1100),
            }),
        );
    }

    #[test]
    fn test_message_counter_missing_times() {
        let counter = MessageCounter::new();

        counter.update(0, 5, None, true);
        counter.update(0, 6, ts(500), true);
        counter.update(0, 7, None, true);

        let summary = counter.summary();
        assert_eq!(summary.first_time, ts(500));
        assert_eq!(summary.last_time, ts(500));

        let partition = &summary.partition_counters[&0];
        assert_eq!(partition.first_offset, 5);
        assert_eq!(partition.last_offset, 7);
        assert_eq!(partition.first_time, ts(500));
    }
}
