//! Per-emote rolling windows with eviction and burst extraction
//!
//! Every key owns a `Bucket` of observation instants kept in non-decreasing
//! order. Two independent passes run against the map:
//! - eviction drops observations older than the retention window
//! - extraction drains buckets whose count exceeded the threshold and whose
//!   oldest observation has aged past the settle delay
//!
//! All operations share one lock so a scan never interleaves with an `add`.

use super::types::{BurstRecord, EmoteEvent, EvictionStats};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// Observation instants for a single key, oldest first
#[derive(Debug, Clone, Default)]
pub struct Bucket {
    observations: Vec<DateTime<Utc>>,
}

impl Bucket {
    /// Insert keeping the sequence non-decreasing; late stamps (wall-clock
    /// steps backwards) land before any later observation
    fn push(&mut self, at: DateTime<Utc>) {
        match self.observations.last() {
            Some(last) if at < *last => {
                let idx = self.observations.partition_point(|seen| *seen <= at);
                self.observations.insert(idx, at);
            }
            _ => self.observations.push(at),
        }
    }

    /// Remove observations whose age at `now` is >= `retention`
    fn evict_aged(&mut self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.observations.len();
        self.observations.retain(|at| now - *at < retention);
        before - self.observations.len()
    }

    /// Age of the oldest observation. Entries stamped after `now` count as
    /// zero age.
    fn max_age(&self, now: DateTime<Utc>) -> Option<Duration> {
        self.observations
            .first()
            .map(|oldest| (now - *oldest).max(Duration::zero()))
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn observations(&self) -> &[DateTime<Utc>] {
        &self.observations
    }
}

/// Thread-safe emote frequency counter
#[derive(Debug, Default)]
pub struct WindowedAggregator {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl WindowedAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Bucket>> {
        self.buckets.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append an observation for `key`, creating its bucket if needed
    pub fn add(&self, key: &str, at: DateTime<Utc>) {
        let mut buckets = self.lock();
        match buckets.get_mut(key) {
            Some(bucket) => bucket.push(at),
            None => {
                let mut bucket = Bucket::default();
                bucket.push(at);
                buckets.insert(key.to_string(), bucket);
            }
        }
    }

    pub fn record(&self, event: EmoteEvent) {
        self.add(&event.key, event.observed_at);
    }

    /// Drop every observation aged `retention` or more; empty buckets go too
    pub fn evict(&self, now: DateTime<Utc>, retention: Duration) -> EvictionStats {
        let mut buckets = self.lock();
        let mut stats = EvictionStats::default();

        for bucket in buckets.values_mut() {
            stats.entries_removed += bucket.evict_aged(now, retention);
        }

        let before = buckets.len();
        buckets.retain(|_, bucket| !bucket.is_empty());
        stats.buckets_removed = before - buckets.len();

        stats
    }

    /// Drain settled bursts
    ///
    /// A bucket qualifies when `len > count_threshold` and its oldest entry is
    /// at least `settle_delay` old. Qualifying buckets are removed whole and
    /// reported as one `BurstRecord` each; younger buckets stay untouched so a
    /// live burst is never split across records.
    pub fn extract_bursts(
        &self,
        now: DateTime<Utc>,
        count_threshold: usize,
        settle_delay: Duration,
    ) -> Vec<BurstRecord> {
        let mut buckets = self.lock();

        let settled: Vec<String> = buckets
            .iter()
            .filter(|(_, bucket)| bucket.len() > count_threshold)
            .filter(|(_, bucket)| {
                bucket
                    .max_age(now)
                    .is_some_and(|age| age >= settle_delay)
            })
            .map(|(key, _)| key.clone())
            .collect();

        settled
            .into_iter()
            .filter_map(|key| {
                let bucket = buckets.remove(&key)?;
                log::debug!(
                    "🎯 Burst settled: {} ({} observations, oldest {}ms)",
                    key,
                    bucket.len(),
                    bucket.max_age(now).map_or(0, |age| age.num_milliseconds())
                );
                Some(BurstRecord::new(key, bucket.len(), now))
            })
            .collect()
    }

    /// Key-sorted `key(count), key(count)` summary of current bucket sizes
    pub fn snapshot(&self) -> String {
        let buckets = self.lock();
        let mut entries: Vec<(&String, usize)> =
            buckets.iter().map(|(key, bucket)| (key, bucket.len())).collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));

        entries
            .iter()
            .map(|(key, len)| format!("{}({})", key, len))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn bucket_len(&self, key: &str) -> Option<usize> {
        self.lock().get(key).map(Bucket::len)
    }

    pub fn bucket(&self, key: &str) -> Option<Bucket> {
        self.lock().get(key).cloned()
    }

    pub fn key_count(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t0() -> DateTime<Utc> {
        DateTime::from_timestamp(1_700_000_000, 0).unwrap()
    }

    fn ms(n: i64) -> Duration {
        Duration::milliseconds(n)
    }

    /// 16 observations for "K" at 0.0s, 0.1s, ... 1.5s
    fn seed_burst(agg: &WindowedAggregator) {
        for i in 0..16 {
            agg.add("K", t0() + ms(i * 100));
        }
    }

    #[test]
    fn test_add_preserves_arrival_order() {
        let agg = WindowedAggregator::new();
        for i in 0..50 {
            agg.add("K", t0() + ms(i * 7));
        }

        let bucket = agg.bucket("K").unwrap();
        assert_eq!(bucket.len(), 50);
        assert!(bucket.observations().windows(2).all(|w| w[0] <= w[1]));
    }

    #[test]
    fn test_out_of_order_add_stays_sorted() {
        let agg = WindowedAggregator::new();
        agg.add("K", t0() + ms(500));
        agg.add("K", t0() + ms(300));
        agg.add("K", t0() + ms(900));
        agg.add("K", t0() + ms(300));
        agg.add("K", t0());

        let bucket = agg.bucket("K").unwrap();
        assert_eq!(
            bucket.observations(),
            &[t0(), t0() + ms(300), t0() + ms(300), t0() + ms(500), t0() + ms(900)]
        );

        // Settle is measured from the earliest stamp, not the first arrival
        assert_eq!(agg.extract_bursts(t0() + ms(8_600), 4, ms(8_500)).len(), 1);
    }

    #[test]
    fn test_record_and_add_share_buckets() {
        let agg = WindowedAggregator::new();
        agg.record(EmoteEvent::new("K", t0()));
        agg.add("K", t0() + ms(100));

        assert_eq!(agg.bucket_len("K"), Some(2));
        assert_eq!(agg.key_count(), 1);
    }

    #[test]
    fn test_extract_waits_for_settle_delay() {
        let agg = WindowedAggregator::new();
        seed_burst(&agg);

        let records = agg.extract_bursts(t0() + ms(8_000), 15, ms(8_500));

        assert!(records.is_empty());
        assert_eq!(agg.bucket_len("K"), Some(16));
    }

    #[test]
    fn test_extract_fires_once_settled() {
        let agg = WindowedAggregator::new();
        seed_burst(&agg);

        let now = t0() + ms(9_000);
        let records = agg.extract_bursts(now, 15, ms(8_500));

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].key, "K");
        assert_eq!(records[0].count, 16);
        assert_eq!(records[0].extracted_at, now);
        assert_eq!(agg.bucket_len("K"), None);
    }

    #[test]
    fn test_extract_threshold_is_strict() {
        let agg = WindowedAggregator::new();
        for i in 0..15 {
            agg.add("EXACT", t0() + ms(i));
        }

        let records = agg.extract_bursts(t0() + ms(60_000), 15, ms(8_500));

        assert!(records.is_empty());
        assert_eq!(agg.bucket_len("EXACT"), Some(15));
    }

    #[test]
    fn test_extract_is_idempotent_per_burst() {
        let agg = WindowedAggregator::new();
        seed_burst(&agg);

        let first = agg.extract_bursts(t0() + ms(9_000), 15, ms(8_500));
        let second = agg.extract_bursts(t0() + ms(9_100), 15, ms(8_500));
        assert_eq!(first.len(), 1);
        assert!(second.is_empty());

        // A few stragglers do not produce another record
        for i in 0..5 {
            agg.add("K", t0() + ms(9_200 + i));
        }
        assert!(agg.extract_bursts(t0() + ms(20_000), 15, ms(8_500)).is_empty());
    }

    #[test]
    fn test_extract_ignores_sub_threshold_buckets() {
        let agg = WindowedAggregator::new();
        for _ in 0..10 {
            agg.add("L", t0());
        }

        assert!(agg.extract_bursts(t0() + ms(9_000), 15, ms(8_500)).is_empty());
        assert_eq!(agg.bucket_len("L"), Some(10));

        let stats = agg.evict(t0() + ms(10_000), ms(10_000));
        assert_eq!(stats.entries_removed, 10);
        assert_eq!(agg.bucket_len("L"), None);
    }

    #[test]
    fn test_evict_removes_aged_and_empty_buckets() {
        let agg = WindowedAggregator::new();
        for _ in 0..5 {
            agg.add("M", t0());
        }

        let stats = agg.evict(t0() + ms(11_000), ms(10_000));

        assert_eq!(stats.entries_removed, 5);
        assert_eq!(stats.buckets_removed, 1);
        assert!(agg.is_empty());
    }

    #[test]
    fn test_evict_boundary_and_survivors() {
        let agg = WindowedAggregator::new();
        agg.add("K", t0()); // exactly 10s old at check time -> evicted
        agg.add("K", t0() + ms(1)); // 9.999s old -> kept
        agg.add("K", t0() + ms(5_000));
        agg.add("J", t0() + ms(2_000));

        let stats = agg.evict(t0() + ms(10_000), ms(10_000));

        assert_eq!(stats.entries_removed, 1);
        assert_eq!(stats.buckets_removed, 0);
        let bucket = agg.bucket("K").unwrap();
        assert_eq!(bucket.observations(), &[t0() + ms(1), t0() + ms(5_000)]);
        assert_eq!(agg.bucket_len("J"), Some(1));
    }

    #[test]
    fn test_future_observations_never_settle_or_evict() {
        let agg = WindowedAggregator::new();
        for _ in 0..20 {
            agg.add("SKEW", t0() + ms(60_000));
        }

        assert!(agg.extract_bursts(t0(), 15, ms(8_500)).is_empty());
        assert_eq!(agg.evict(t0(), ms(10_000)).entries_removed, 0);
        assert_eq!(agg.bucket_len("SKEW"), Some(20));
    }

    #[test]
    fn test_snapshot_is_sorted_and_read_only() {
        let agg = WindowedAggregator::new();
        agg.add("PEPE", t0());
        agg.add("AYAYA", t0());
        agg.add("AYAYA", t0());
        agg.add("Kappa", t0());

        let snapshot = agg.snapshot();

        assert_eq!(snapshot, "AYAYA(2), Kappa(1), PEPE(1)");
        assert_eq!(agg.snapshot(), snapshot);
        assert_eq!(agg.key_count(), 3);
    }

    #[test]
    fn test_snapshot_empty() {
        assert_eq!(WindowedAggregator::new().snapshot(), "");
    }

    #[test]
    fn test_concurrent_adds_are_not_lost() {
        use std::sync::Arc;
        use std::thread;

        let agg = Arc::new(WindowedAggregator::new());
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let agg = Arc::clone(&agg);
                thread::spawn(move || {
                    for i in 0..250 {
                        agg.add("K", t0() + ms(i));
                        agg.evict(t0() + ms(i), ms(10_000));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(agg.bucket_len("K"), Some(1000));
    }
}
