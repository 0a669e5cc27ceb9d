//! Burst engine - the explicit state every task works against
//!
//! ```text
//! ChatMessage
//!     ↓
//! BurstEngine::ingest_message()  (catalog lookup per token)
//!     ↓
//! WindowedAggregator::add()
//!     ↓  (periodic)
//! evict_tick() / extract_tick() → BatchSink::enqueue()
//!     ↓  (periodic)
//! flush_tick() → BurstStore (→ dead letter on repeated failure)
//! ```
//!
//! The engine owns no tasks itself; `runtime` wires its ticks into the
//! scheduler. Tests drive it directly with a `ManualClock`.

use super::clock::Clock;
use super::config::BurstPolicy;
use super::sink::{BatchSink, FlushOutcome};
use super::types::{EmoteEvent, EvictionStats};
use super::windows::WindowedAggregator;
use crate::chat_core::{Catalog, ChatMessage};
use chrono::{DateTime, Utc};
use std::sync::Arc;

pub struct BurstEngine {
    aggregator: WindowedAggregator,
    sink: BatchSink,
    catalog: Arc<Catalog>,
    clock: Arc<dyn Clock>,
    policy: BurstPolicy,
}

impl BurstEngine {
    pub fn new(
        catalog: Arc<Catalog>,
        sink: BatchSink,
        clock: Arc<dyn Clock>,
        policy: BurstPolicy,
    ) -> Self {
        Self {
            aggregator: WindowedAggregator::new(),
            sink,
            catalog,
            clock,
            policy,
        }
    }

    pub fn aggregator(&self) -> &WindowedAggregator {
        &self.aggregator
    }

    pub fn sink(&self) -> &BatchSink {
        &self.sink
    }

    pub fn policy(&self) -> BurstPolicy {
        self.policy
    }

    /// One event per token that names a catalog emote, in message order
    pub fn match_emotes(&self, message: &ChatMessage, now: DateTime<Utc>) -> Vec<EmoteEvent> {
        message
            .tokens()
            .filter_map(|token| self.catalog.canonical_key(token))
            .map(|key| EmoteEvent::new(key, now))
            .collect()
    }

    /// Count every catalog emote in the message; returns the number matched
    pub fn ingest_message(&self, message: &ChatMessage) -> usize {
        let events = self.match_emotes(message, self.clock.now());
        let matched = events.len();

        for event in events {
            self.aggregator.record(event);
        }

        matched
    }

    pub fn evict_tick(&self) -> EvictionStats {
        let stats = self.aggregator.evict(self.clock.now(), self.policy.retention);
        if stats.buckets_removed > 0 {
            log::debug!(
                "🧹 Evicted {} observations ({} emotes idle)",
                stats.entries_removed,
                stats.buckets_removed
            );
        }
        stats
    }

    /// Move settled bursts into the sink; returns how many were extracted
    pub fn extract_tick(&self) -> usize {
        let records = self.aggregator.extract_bursts(
            self.clock.now(),
            self.policy.count_threshold,
            self.policy.settle_delay,
        );

        let extracted = records.len();
        if extracted > 0 {
            for record in &records {
                log::info!("🚨 Burst: {} x{}", record.key, record.count);
            }
            self.sink.enqueue(records);
        }
        extracted
    }

    pub async fn flush_tick(&self) -> FlushOutcome {
        let outcome = self.sink.flush().await;
        if let FlushOutcome::Persisted(rows) = outcome {
            log::info!("📊 Flush complete: {} bursts persisted", rows);
        }
        outcome
    }

    pub fn snapshot(&self) -> String {
        self.aggregator.snapshot()
    }

    /// Final evict → extract → flush pass on shutdown
    pub async fn drain(&self) -> FlushOutcome {
        log::info!("🔄 Performing final drain...");
        self.evict_tick();
        self.extract_tick();
        let outcome = self.flush_tick().await;
        log::info!("✅ Final drain complete ({:?})", outcome);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::clock::ManualClock;
    use crate::pipeline::db::{BurstStore, StoreError};
    use crate::pipeline::retry::ExponentialBackoff;
    use crate::pipeline::types::BurstRecord;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration};
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<BurstRecord>>,
    }

    #[async_trait]
    impl BurstStore for MemoryStore {
        async fn insert_batch(&self, records: &[BurstRecord]) -> Result<usize, StoreError> {
            self.rows.lock().unwrap().extend_from_slice(records);
            Ok(records.len())
        }

        fn backend_type(&self) -> &'static str {
            "Memory"
        }
    }

    fn setup() -> (BurstEngine, ManualClock, Arc<MemoryStore>) {
        let clock = ManualClock::new(DateTime::from_timestamp(1_700_000_000, 0).unwrap());
        let store = Arc::new(MemoryStore::default());
        let sink = BatchSink::new(store.clone(), ExponentialBackoff::new(1, 1, 0).without_jitter());
        let catalog = Catalog::from_json(r#"[{"prefix":"PEPE"},{"prefix":"AYAYA"}]"#).unwrap();
        let engine = BurstEngine::new(
            Arc::new(catalog),
            sink,
            Arc::new(clock.clone()),
            BurstPolicy::default(),
        );
        (engine, clock, store)
    }

    fn chat(data: &str) -> ChatMessage {
        ChatMessage {
            nick: "tester".to_string(),
            features: Vec::new(),
            timestamp: 0,
            data: data.to_string(),
        }
    }

    #[test]
    fn test_ingest_counts_only_catalog_tokens() {
        let (engine, _clock, _store) = setup();

        let matched = engine.ingest_message(&chat("PEPE hello PEPE  AYAYA pepe"));

        assert_eq!(matched, 3);
        assert_eq!(engine.aggregator().bucket_len("PEPE"), Some(2));
        assert_eq!(engine.aggregator().bucket_len("AYAYA"), Some(1));
        assert_eq!(engine.aggregator().bucket_len("hello"), None);
        assert_eq!(engine.snapshot(), "AYAYA(1), PEPE(2)");
    }

    #[test]
    fn test_match_emotes_keeps_message_order() {
        let (engine, clock, _store) = setup();
        let now = clock.now();

        let events = engine.match_emotes(&chat("AYAYA x PEPE AYAYA"), now);

        let keys: Vec<&str> = events.iter().map(|e| e.key.as_str()).collect();
        assert_eq!(keys, vec!["AYAYA", "PEPE", "AYAYA"]);
        assert!(events.iter().all(|e| e.observed_at == now));
    }

    #[tokio::test]
    async fn test_settled_burst_reaches_store() {
        let (engine, clock, store) = setup();

        for _ in 0..16 {
            engine.ingest_message(&chat("PEPE"));
            clock.advance(Duration::milliseconds(100));
        }

        clock.advance(Duration::milliseconds(6_400)); // oldest is 8.0s old
        assert_eq!(engine.extract_tick(), 0);

        clock.advance(Duration::milliseconds(1_000)); // oldest is 9.0s old
        assert_eq!(engine.extract_tick(), 1);
        assert_eq!(engine.sink().pending_len(), 1);

        assert_eq!(engine.flush_tick().await, FlushOutcome::Persisted(1));
        let rows = store.rows.lock().unwrap();
        assert_eq!(rows[0].key, "PEPE");
        assert_eq!(rows[0].count, 16);
    }

    #[tokio::test]
    async fn test_drain_flushes_already_settled_bursts() {
        let (engine, clock, store) = setup();

        for _ in 0..20 {
            engine.ingest_message(&chat("AYAYA"));
        }
        clock.advance(Duration::milliseconds(9_000));

        assert_eq!(engine.drain().await, FlushOutcome::Persisted(1));
        assert_eq!(store.rows.lock().unwrap().len(), 1);
        assert!(engine.aggregator().is_empty());
    }
}
