//! Pending burst queue with periodic bulk flush
//!
//! The extraction task enqueues and the flush task drains; both go through
//! the same mutex. A flush takes the whole pending batch up front, so the
//! lock is never held across database I/O and the queue is empty as soon as
//! the attempt starts, whatever its outcome.

use super::dead_letter::DeadLetterWriter;
use super::db::BurstStore;
use super::retry::ExponentialBackoff;
use super::types::BurstRecord;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Result of a single `BatchSink::flush` call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing was pending
    Idle,
    /// Rows written to the store
    Persisted(usize),
    /// Store kept failing; records appended to the dead-letter file
    Spilled(usize),
    /// Store kept failing and no spill was possible; records lost
    Dropped(usize),
}

pub struct BatchSink {
    pending: Mutex<Vec<BurstRecord>>,
    store: Arc<dyn BurstStore>,
    backoff: ExponentialBackoff,
    dead_letter: Option<DeadLetterWriter>,
}

impl BatchSink {
    pub fn new(store: Arc<dyn BurstStore>, backoff: ExponentialBackoff) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            store,
            backoff,
            dead_letter: None,
        }
    }

    pub fn with_dead_letter(mut self, writer: DeadLetterWriter) -> Self {
        self.dead_letter = Some(writer);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Vec<BurstRecord>> {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn enqueue(&self, records: Vec<BurstRecord>) {
        if records.is_empty() {
            return;
        }
        self.lock().extend(records);
    }

    pub fn pending_len(&self) -> usize {
        self.lock().len()
    }

    /// Persist everything pending as one batch
    pub async fn flush(&self) -> FlushOutcome {
        let batch = std::mem::take(&mut *self.lock());
        if batch.is_empty() {
            return FlushOutcome::Idle;
        }

        let mut backoff = self.backoff.clone();
        backoff.reset();

        loop {
            match self.store.insert_batch(&batch).await {
                Ok(written) => {
                    if backoff.attempts() > 0 {
                        log::info!(
                            "✅ Flush succeeded after {} retries ({} bursts)",
                            backoff.attempts(),
                            written
                        );
                    }
                    return FlushOutcome::Persisted(written);
                }
                Err(e) => {
                    log::warn!(
                        "⚠️  {} flush of {} bursts failed: {}",
                        self.store.backend_type(),
                        batch.len(),
                        e
                    );
                    if backoff.sleep().await.is_err() {
                        break;
                    }
                }
            }
        }

        self.give_up(&batch)
    }

    fn give_up(&self, batch: &[BurstRecord]) -> FlushOutcome {
        let Some(writer) = &self.dead_letter else {
            log::error!(
                "❌ Dropping {} bursts after exhausting flush retries (no dead-letter file configured)",
                batch.len()
            );
            return FlushOutcome::Dropped(batch.len());
        };

        match writer.spill(batch) {
            Ok(()) => {
                log::error!(
                    "❌ Spilled {} bursts to {} after exhausting flush retries",
                    batch.len(),
                    writer.path().display()
                );
                FlushOutcome::Spilled(batch.len())
            }
            Err(e) => {
                log::error!(
                    "❌ Dropping {} bursts: dead-letter spill to {} failed: {}",
                    batch.len(),
                    writer.path().display(),
                    e
                );
                FlushOutcome::Dropped(batch.len())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::db::StoreError;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    /// Records every batch; fails the first `fail_first` calls
    #[derive(Default)]
    struct MockStore {
        batches: Mutex<Vec<Vec<BurstRecord>>>,
        calls: AtomicUsize,
        fail_first: usize,
    }

    impl MockStore {
        fn failing(fail_first: usize) -> Self {
            Self {
                fail_first,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl BurstStore for MockStore {
        async fn insert_batch(&self, records: &[BurstRecord]) -> Result<usize, StoreError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                return Err(StoreError::Database("connection refused".to_string()));
            }
            self.batches.lock().unwrap().push(records.to_vec());
            Ok(records.len())
        }

        fn backend_type(&self) -> &'static str {
            "Mock"
        }
    }

    fn records(keys: &[&str]) -> Vec<BurstRecord> {
        keys.iter().map(|k| BurstRecord::new(*k, 16, Utc::now())).collect()
    }

    fn quick_backoff(retries: u32) -> ExponentialBackoff {
        ExponentialBackoff::new(1, 4, retries).without_jitter()
    }

    #[tokio::test]
    async fn test_flush_empty_is_idle() {
        let store = Arc::new(MockStore::default());
        let sink = BatchSink::new(store.clone(), quick_backoff(0));

        assert_eq!(sink.flush().await, FlushOutcome::Idle);
        assert_eq!(store.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_flush_sends_one_batch_in_enqueue_order() {
        let store = Arc::new(MockStore::default());
        let sink = BatchSink::new(store.clone(), quick_backoff(0));

        let first = records(&["A", "B"]);
        let second = records(&["C"]);
        sink.enqueue(first.clone());
        sink.enqueue(Vec::new());
        sink.enqueue(second.clone());

        assert_eq!(sink.flush().await, FlushOutcome::Persisted(3));
        assert_eq!(sink.pending_len(), 0);

        let batches = store.batches.lock().unwrap();
        assert_eq!(batches.len(), 1);
        let keys: Vec<&str> = batches[0].iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["A", "B", "C"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_retries_then_persists() {
        let store = Arc::new(MockStore::failing(2));
        let sink = BatchSink::new(store.clone(), quick_backoff(3));
        sink.enqueue(records(&["PEPE"]));

        assert_eq!(sink.flush().await, FlushOutcome::Persisted(1));
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_failure_drops_without_dead_letter() {
        let store = Arc::new(MockStore::failing(usize::MAX));
        let sink = BatchSink::new(store.clone(), quick_backoff(2));
        sink.enqueue(records(&["A", "B"]));

        assert_eq!(sink.flush().await, FlushOutcome::Dropped(2));
        assert_eq!(sink.pending_len(), 0);
        assert_eq!(store.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_failure_spills_to_dead_letter() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dead_letter.jsonl");
        let store = Arc::new(MockStore::failing(usize::MAX));
        let sink = BatchSink::new(store, quick_backoff(1))
            .with_dead_letter(DeadLetterWriter::new(&path).unwrap());

        let batch = records(&["A", "B", "C"]);
        sink.enqueue(batch.clone());

        assert_eq!(sink.flush().await, FlushOutcome::Spilled(3));
        assert_eq!(sink.pending_len(), 0);

        let spilled: Vec<BurstRecord> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(spilled, batch);
    }

    #[tokio::test]
    async fn test_enqueue_after_flush_lands_in_next_batch() {
        let store = Arc::new(MockStore::default());
        let sink = BatchSink::new(store.clone(), quick_backoff(0));

        sink.enqueue(records(&["A"]));
        sink.flush().await;
        sink.enqueue(records(&["B"]));
        sink.flush().await;

        let batches = store.batches.lock().unwrap();
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[1][0].key, "B");
    }
}
