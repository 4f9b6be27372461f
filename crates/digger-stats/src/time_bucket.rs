use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

/// Counter that records the approximate number of events over a recent
/// interval; the interval length and bucket resolution are configurable.
/// Used to measure the approximate processing rate for the digger.
pub struct TimeBucketCounter {
    resolution_ms: i64,
    length: Duration,
    max_size: usize,
    inner: Mutex<TimeBucketInner>,
}

struct TimeBucketInner {
    // Head tick in resolution-sized increments since the epoch; None until
    // the first increment.
    head: Option<i64>,
    buckets: VecDeque<i64>,
    total: i64,
}

impl TimeBucketCounter {
    pub fn new(resolution: Duration, length: Duration) -> Self {
        TimeBucketCounter {
            resolution_ms: resolution.as_millis() as i64,
            length,
            max_size: (length.as_millis() / resolution.as_millis()) as usize,
            inner: Mutex::new(TimeBucketInner {
                head: None,
                buckets: VecDeque::new(),
                total: 0,
            }),
        }
    }

    /// Record `count` events, assuming that the current time is `now`.
    pub fn increment(&self, now: DateTime<Utc>, count: i64) {
        let mut inner = self.lock();
        let tick = now.timestamp_millis() / self.resolution_ms;

        let Some(head) = inner.head else {
            inner.head = Some(tick);
            inner.buckets.clear();
            inner.buckets.push_front(count);
            inner.total = count;
            return;
        };

        if tick > head {
            for _ in head..tick {
                inner.buckets.push_front(0);
            }
            while inner.buckets.len() > self.max_size {
                if let Some(dropped) = inner.buckets.pop_back() {
                    inner.total -= dropped;
                }
            }
            inner.head = Some(tick);
        }

        if let Some(front) = inner.buckets.front_mut() {
            *front += count;
        }
        inner.total += count;
    }

    /// Total count across the retained window.
    pub fn total(&self) -> i64 {
        self.lock().total
    }

    /// Average count per second over the window length.
    pub fn rate_per_sec(&self) -> f64 {
        self.lock().total as f64 / self.length.as_secs_f64()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TimeBucketInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
