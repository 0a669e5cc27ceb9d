//! Chat ingestion - drains the reader channel into the engine
//!
//! Every decoded `ChatMessage` is tokenized and counted against the catalog.
//! Eviction, extraction and flushing run as their own periodic tasks; this
//! loop only counts.

use super::engine::BurstEngine;
use super::scheduler::TaskError;
use crate::chat_core::ChatMessage;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const THROUGHPUT_LOG_INTERVAL: Duration = Duration::from_secs(10);

/// Consume chat messages until the channel closes or `cancel` fires
///
/// Messages already buffered when cancellation arrives are still counted so
/// the final drain sees them.
pub async fn start_ingestion(
    mut rx: mpsc::Receiver<ChatMessage>,
    engine: Arc<BurstEngine>,
    cancel: CancellationToken,
) -> Result<(), TaskError> {
    log::info!("🚀 Starting chat ingestion");
    log::info!("   └─ Waiting for messages...");

    let mut message_count = 0u64;
    let mut emote_count = 0u64;
    let mut last_log_time = Instant::now();

    loop {
        let message = tokio::select! {
            _ = cancel.cancelled() => break,
            message = rx.recv() => message,
        };

        let Some(message) = message else {
            log::info!("⚠️  Chat channel closed, ingestion stopping");
            return Ok(());
        };

        emote_count += engine.ingest_message(&message) as u64;
        message_count += 1;

        if last_log_time.elapsed() >= THROUGHPUT_LOG_INTERVAL {
            let elapsed = last_log_time.elapsed().as_secs_f64();
            log::info!(
                "📊 Ingestion rate: {:.1} msgs/sec, {:.1} emotes/sec | tracking {} emotes",
                message_count as f64 / elapsed,
                emote_count as f64 / elapsed,
                engine.aggregator().key_count()
            );
            message_count = 0;
            emote_count = 0;
            last_log_time = Instant::now();
        }
    }

    rx.close();
    let mut buffered = 0usize;
    while let Ok(message) = rx.try_recv() {
        engine.ingest_message(&message);
        buffered += 1;
    }
    if buffered > 0 {
        log::debug!("Counted {} buffered messages after cancellation", buffered);
    }

    log::info!("🛑 Ingestion stopped");
    Ok(())
}
