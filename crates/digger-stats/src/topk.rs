//! Approximate heavy-hitters counter.
//!
//! Keeps stats for the top K keys seen so far using a bounded binary heap.
//! The heap is allowed to grow to 200·K entries before being trimmed back to
//! 100·K, so a key whose count rises late is unlikely to have been evicted
//! while it was still part of the noisy tail. Counts dropped by trimming are
//! accumulated in `total_removed` so that percentages can be computed over
//! the retained mass.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::bucket::Bucket;
use crate::table;
use crate::{DIM_SEPARATOR, INVALID_VALUE, MISSING_VALUE};

/// Summary of the current top-K state, used by the progress display.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TopKCounterSummary {
    pub total_added: u64,
    pub total_removed: u64,
    pub total_missing: u64,
    pub total_invalid: u64,
    pub num_categories: usize,
}

/// Counter that keeps stats on the approximate top K keys seen so far.
pub struct TopKCounter {
    k: usize,
    inner: Mutex<TopKInner>,
}

/// Heap invariant: `index[key] == i` iff `heap[i].key == key`. The heap is a
/// max-heap per `Bucket::outranks`; trimming repeatedly removes the worst
/// bucket per that ordering.
struct TopKInner {
    heap: Vec<Bucket>,
    index: HashMap<String, usize>,
    total_added: u64,
    total_removed: u64,
    total_missing: u64,
    total_invalid: u64,
}

impl TopKCounter {
    pub fn new(k: usize) -> Self {
        TopKCounter {
            k,
            inner: Mutex::new(TopKInner {
                heap: Vec::new(),
                index: HashMap::new(),
                total_added: 0,
                total_removed: 0,
                total_missing: 0,
                total_invalid: 0,
            }),
        }
    }

    /// Update the counter state for the argument key and value. If the key is
    /// not currently in the heap, a bucket is created for it.
    pub fn add(&self, key: &str, value: f64) {
        let mut inner = self.lock();

        inner.total_added += 1;
        if key == MISSING_VALUE {
            inner.total_missing += 1;
        } else if key == INVALID_VALUE {
            inner.total_invalid += 1;
        }

        match inner.index.get(key).copied() {
            Some(pos) => {
                inner.heap[pos].update(value);
                inner.fix(pos);
            }
            None => {
                let pos = inner.heap.len();
                inner.heap.push(Bucket::new(key.to_string(), value));
                inner.index.insert(key.to_string(), pos);
                inner.sift_up(pos);
            }
        }

        // Trim down to 100k instead of k so that we keep a better
        // approximation of late-rising values.
        if inner.heap.len() > 200 * self.k {
            inner.clean(100 * self.k);
        }
    }

    /// Remove buckets until the heap size is at most `limit`, accumulating
    /// the removed counts into the removal total.
    pub fn clean(&self, limit: usize) {
        self.lock().clean(limit);
    }

    /// Snapshot the current buckets, sorted descending by (count, -key) and
    /// truncated to `limit`. With `sort_by_name`, the truncated slice is
    /// re-sorted ascending by key; the top-K identity is unchanged, only the
    /// display order.
    pub fn buckets(&self, limit: usize, sort_by_name: bool) -> Vec<Bucket> {
        let inner = self.lock();

        let mut buckets = inner.heap.clone();
        buckets.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.key.cmp(&b.key)));
        buckets.truncate(limit);

        if sort_by_name {
            buckets.sort_by(|a, b| a.key.cmp(&b.key));
        }

        buckets
    }

    pub fn summary(&self) -> TopKCounterSummary {
        let inner = self.lock();

        TopKCounterSummary {
            total_added: inner.total_added,
            total_removed: inner.total_removed,
            total_missing: inner.total_missing,
            total_invalid: inner.total_invalid,
            num_categories: inner.index.len(),
        }
    }

    /// Render a table summarizing the top K buckets. `dims` is the number of
    /// path groups behind the keys; in numeric mode the trailing numeric
    /// dimension has no column of its own.
    pub fn pretty_table(&self, dims: usize, numeric: bool, sort_by_name: bool) -> String {
        let mut n = dims.max(1);
        if numeric && n > 1 {
            n -= 1;
        }

        let mut header = vec!["Rank".to_string()];
        if n == 1 {
            header.push("Bucket".to_string());
        } else {
            for i in 0..n {
                header.push(format!("Dim {}", i + 1));
            }
        }
        if numeric {
            header.extend(["Min".to_string(), "Avg".to_string(), "Max".to_string()]);
        }
        header.extend([
            "Count".to_string(),
            "Percent".to_string(),
            "Cumulative".to_string(),
        ]);

        let retained = {
            let inner = self.lock();
            inner.total_added - inner.total_removed
        };

        let mut rows = Vec::new();
        let mut cuml_percent = 0.0;

        for (i, bucket) in self.buckets(self.k, sort_by_name).iter().enumerate() {
            let percent = if retained > 0 {
                bucket.count as f64 / retained as f64 * 100.0
            } else {
                0.0
            };
            cuml_percent += percent;

            let mut row = vec![format!("{}", i + 1)];

            let components: Vec<&str> = bucket.key.splitn(n, DIM_SEPARATOR).collect();
            for component in &components {
                row.push(component.to_string());
            }
            for _ in components.len()..n {
                row.push(String::new());
            }

            if numeric {
                if bucket.key == MISSING_VALUE || bucket.key == INVALID_VALUE {
                    row.extend([String::new(), String::new(), String::new()]);
                } else {
                    row.extend([
                        format!("{:.6}", bucket.min),
                        format!("{:.6}", bucket.avg()),
                        format!("{:.6}", bucket.max),
                    ]);
                }
            }

            row.extend([
                format!("{}", bucket.count),
                format!("{:.2}%", percent),
                format!("{:.2}%", cuml_percent),
            ]);

            rows.push(row);
        }

        table::render(&header, &rows)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, TopKInner> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl TopKInner {
    fn clean(&mut self, limit: usize) {
        while self.heap.len() > limit {
            let mut worst = 0;
            for i in 1..self.heap.len() {
                if self.heap[worst].outranks(&self.heap[i]) {
                    worst = i;
                }
            }

            let last = self.heap.len() - 1;
            self.swap(worst, last);
            if let Some(bucket) = self.heap.pop() {
                self.total_removed += bucket.count;
                self.index.remove(&bucket.key);
            }
            if worst < self.heap.len() {
                self.fix(worst);
            }
        }
    }

    fn fix(&mut self, pos: usize) {
        let pos = self.sift_up(pos);
        self.sift_down(pos);
    }

    fn sift_up(&mut self, mut pos: usize) -> usize {
        while pos > 0 {
            let parent = (pos - 1) / 2;
            if !self.heap[pos].outranks(&self.heap[parent]) {
                break;
            }
            self.swap(pos, parent);
            pos = parent;
        }
        pos
    }

    fn sift_down(&mut self, mut pos: usize) {
        loop {
            let left = 2 * pos + 1;
            if left >= self.heap.len() {
                break;
            }
            let mut best = left;
            let right = left + 1;
            if right < self.heap.len() && self.heap[right].outranks(&self.heap[left]) {
                best = right;
            }
            if !self.heap[best].outranks(&self.heap[pos]) {
                break;
            }
            self.swap(pos, best);
            pos = best;
        }
    }

    fn swap(&mut self, a: usize, b: usize) {
        self.heap.swap(a, b);
        self.index.insert(self.heap[a].key.clone(), a);
        self.index.insert(self.heap[b].key.clone(), b);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_consistent(counter: &TopKCounter) {
        let inner = counter.lock();

        let total: u64 = inner.heap.iter().map(|b| b.count).sum();
        assert_eq!(inner.total_added - inner.total_removed, total);

        assert_eq!(inner.index.len(), inner.heap.len());
        for (key, &pos) in &inner.index {
            assert_eq!(&inner.heap[pos].key, key);
        }
    }

    #[test]
    fn test_top_k_counter() {
        let counter = TopKCounter::new(4);

        for _ in 0..20 {
            counter.add("a", 1.0);
            counter.add("b", 1.0);
            counter.add("c", 1.0);
        }
        for _ in 0..400 {
            counter.add("d", 1.0);
            counter.add("e", 1.0);
        }
        for _ in 0..100 {
            counter.add("d", 2.0);
            counter.add("e", 2.0);
        }
        for _ in 0..1000 {
            counter.add("f", 2.0);
        }

        assert_consistent(&counter);
        counter.clean(4);
        assert_consistent(&counter);

        let buckets = counter.buckets(4, false);
        assert_eq!(
            buckets,
            vec![
                Bucket {
                    key: "f".to_string(),
                    count: 1000,
                    min: 2.0,
                    max: 2.0,
                    sum: 2000.0,
                },
                Bucket {
                    key: "d".to_string(),
                    count: 500,
                    min: 1.0,
                    max: 2.0,
                    sum: 600.0,
                },
                Bucket {
                    key: "e".to_string(),
                    count: 500,
                    min: 1.0,
                    max: 2.0,
                    sum: 600.0,
                },
                Bucket {
                    key: "a".to_string(),
                    count: 20,
                    min: 1.0,
                    max: 1.0,
                    sum: 20.0,
                },
            ],
        );

        let buckets_by_name = counter.buckets(4, true);
        let keys: Vec<&str> = buckets_by_name.iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "d", "e", "f"]);
    }

    #[test]
    fn test_top_k_counter_sentinels() {
        let counter = TopKCounter::new(4);

        counter.add("real", 1.0);
        counter.add(MISSING_VALUE, 1.0);
        counter.add(MISSING_VALUE, 1.0);
        counter.add(INVALID_VALUE, 1.0);

        let summary = counter.summary();
        assert_eq!(summary.total_added, 4);
        assert_eq!(summary.total_missing, 2);
        assert_eq!(summary.total_invalid, 1);
        assert_eq!(summary.num_categories, 3);
    }

    #[test]
    fn test_top_k_counter_overflow_trim() {
        let k = 2;
        let counter = TopKCounter::new(k);

        // A heavy key that must survive trimming, plus enough singletons to
        // push the heap over the 200*k bound.
        for _ in 0..500 {
            counter.add("heavy", 1.0);
        }
        for i in 0..(200 * k + 100) {
            counter.add(&format!("singleton-{i}"), 1.0);
        }

        assert_consistent(&counter);

        let summary = counter.summary();
        assert!(summary.num_categories <= 200 * k);
        assert!(summary.total_removed > 0);

        let buckets = counter.buckets(1, false);
        assert_eq!(buckets[0].key, "heavy");
        assert_eq!(buckets[0].count, 500);
    }

    #[test]
    fn test_pretty_table_numeric() {
        let counter = TopKCounter::new(4);
        counter.add("a", 1.0);
        counter.add("a", 3.0);
        counter.add("b", 2.0);

        let table = counter.pretty_table(1, true, false);
        assert!(table.contains("Bucket"));
        assert!(table.contains("Min"));
        assert!(table.contains("2.000000"));
        assert!(table.contains("66.67%"));
    }
}
