//! Burst runtime - wires the engine, transport and scheduler together
//!
//! Lifecycle: `Starting` (catalog, database, connect) → `Running` (all tasks
//! spawned) → `Terminated` (tasks cancelled, final drain done). A transport
//! failure in `Running` cancels every task and is reported as
//! `RuntimeError::Fatal` after the drain.

use super::clock::{Clock, SystemClock};
use super::config::{ConfigError, PipelineConfig};
use super::db::{BurstStore, SqliteBurstStore, StoreError};
use super::dead_letter::DeadLetterWriter;
use super::engine::BurstEngine;
use super::ingestion::start_ingestion;
use super::retry::ExponentialBackoff;
use super::scheduler::{FatalError, Scheduler, TaskError};
use super::sink::{BatchSink, FlushOutcome};
use crate::chat_core::{
    connect, fetch_catalog, pump_frames, Catalog, ChatMessage, KeepaliveWriter, TransportError,
};
use futures::{Sink, Stream};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_util::sync::CancellationToken;

/// Upper bound for a single flush retry delay
const FLUSH_RETRY_MAX_MS: u64 = 5_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuntimeState {
    Starting,
    Running,
    Terminated,
}

#[derive(Debug)]
pub enum RuntimeError {
    Config(ConfigError),
    Store(StoreError),
    DeadLetter(std::io::Error),
    Transport(TransportError),
    Fatal(FatalError),
}

impl From<ConfigError> for RuntimeError {
    fn from(err: ConfigError) -> Self {
        RuntimeError::Config(err)
    }
}

impl From<StoreError> for RuntimeError {
    fn from(err: StoreError) -> Self {
        RuntimeError::Store(err)
    }
}

impl From<TransportError> for RuntimeError {
    fn from(err: TransportError) -> Self {
        RuntimeError::Transport(err)
    }
}

impl From<FatalError> for RuntimeError {
    fn from(err: FatalError) -> Self {
        RuntimeError::Fatal(err)
    }
}

impl std::fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RuntimeError::Config(e) => write!(f, "Configuration error: {}", e),
            RuntimeError::Store(e) => write!(f, "Store error: {}", e),
            RuntimeError::DeadLetter(e) => write!(f, "Dead-letter file error: {}", e),
            RuntimeError::Transport(e) => write!(f, "Transport error: {}", e),
            RuntimeError::Fatal(e) => write!(f, "Runtime terminated: {}", e),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// Build the sink (with optional dead-letter spill) and the engine around it
pub fn build_engine(
    config: &PipelineConfig,
    catalog: Catalog,
    store: Arc<dyn BurstStore>,
    clock: Arc<dyn Clock>,
) -> Result<BurstEngine, RuntimeError> {
    let backoff = ExponentialBackoff::new(
        config.flush_retry_base_ms,
        FLUSH_RETRY_MAX_MS,
        config.flush_max_retries,
    );

    let mut sink = BatchSink::new(store, backoff);
    if let Some(path) = &config.dead_letter_path {
        let writer = DeadLetterWriter::new(path).map_err(RuntimeError::DeadLetter)?;
        sink = sink.with_dead_letter(writer);
    }

    Ok(BurstEngine::new(
        Arc::new(catalog),
        sink,
        clock,
        config.policy,
    ))
}

/// Spawn the engine's periodic ticks: evict, extract, flush and snapshot
pub fn spawn_engine_tasks(
    scheduler: &mut Scheduler,
    engine: &Arc<BurstEngine>,
    config: &PipelineConfig,
) {
    let evict_engine = Arc::clone(engine);
    scheduler.spawn_periodic("evict", config.evict_interval, move || {
        let engine = Arc::clone(&evict_engine);
        async move {
            engine.evict_tick();
            Ok(())
        }
    });

    let extract_engine = Arc::clone(engine);
    scheduler.spawn_periodic("extract", config.extract_interval, move || {
        let engine = Arc::clone(&extract_engine);
        async move {
            engine.extract_tick();
            Ok(())
        }
    });

    let flush_engine = Arc::clone(engine);
    scheduler.spawn_periodic("flush", config.flush_interval, move || {
        let engine = Arc::clone(&flush_engine);
        async move {
            match engine.flush_tick().await {
                FlushOutcome::Dropped(n) => {
                    Err(TaskError::Transient(format!("{} bursts dropped", n)))
                }
                _ => Ok(()),
            }
        }
    });

    let snapshot_engine = Arc::clone(engine);
    scheduler.spawn_periodic("snapshot", config.snapshot_interval, move || {
        let engine = Arc::clone(&snapshot_engine);
        async move {
            let snapshot = engine.snapshot();
            if !snapshot.is_empty() {
                log::debug!("📸 Buckets: {}", snapshot);
            }
            Ok(())
        }
    });
}

/// Spawn the ingestion loop draining `rx` into the engine
pub fn spawn_ingestion(
    scheduler: &mut Scheduler,
    engine: &Arc<BurstEngine>,
    rx: mpsc::Receiver<ChatMessage>,
) {
    let cancel = scheduler.cancel_token();
    scheduler.spawn("ingestion", start_ingestion(rx, Arc::clone(engine), cancel));
}

/// Run until `shutdown` is cancelled or a task fails fatally
///
/// The catalog is fetched once; if that fails the runtime logs the error and
/// keeps running with an empty catalog, so nothing is counted until restart.
pub async fn run(config: PipelineConfig, shutdown: CancellationToken) -> Result<(), RuntimeError> {
    let mut state = RuntimeState::Starting;
    log::info!("🔧 Runtime {:?}", state);

    let catalog = match fetch_catalog(&config.catalog_url).await {
        Ok(catalog) => catalog,
        Err(e) => {
            log::error!("❌ {} (continuing with an empty catalog)", e);
            Catalog::empty()
        }
    };

    let store: Arc<dyn BurstStore> = Arc::new(SqliteBurstStore::open(&config.db_path)?);
    log::info!("✅ Database ready ({}: {})", store.backend_type(), config.db_path);

    let engine = Arc::new(build_engine(&config, catalog, store, Arc::new(SystemClock))?);

    let (reader, keepalive) = connect(&config.chat_ws_url).await?;

    state = RuntimeState::Running;
    log::info!("✅ Runtime {:?}", state);

    serve(&config, engine, reader, keepalive, shutdown).await
}

/// Run every task against an already-connected transport until `shutdown`
/// fires or a task fails fatally, then drain the engine once
pub async fn serve<R, W>(
    config: &PipelineConfig,
    engine: Arc<BurstEngine>,
    frames: R,
    keepalive: KeepaliveWriter<W>,
    shutdown: CancellationToken,
) -> Result<(), RuntimeError>
where
    R: Stream<Item = Result<Message, tungstenite::Error>> + Unpin + Send + 'static,
    W: Sink<Message> + Unpin + Send + 'static,
    W::Error: std::fmt::Display,
{
    let (tx, rx) = mpsc::channel::<ChatMessage>(config.channel_buffer);
    let mut scheduler = Scheduler::new(shutdown.child_token());

    let reader_cancel = scheduler.cancel_token();
    scheduler.spawn("reader", async move {
        match pump_frames(frames, tx, reader_cancel).await {
            Ok(forwarded) => {
                log::debug!("Reader forwarded {} messages", forwarded);
                Ok(())
            }
            Err(e) => Err(TaskError::Fatal(e.to_string())),
        }
    });

    spawn_ingestion(&mut scheduler, &engine, rx);
    spawn_engine_tasks(&mut scheduler, &engine, config);

    let keepalive_writer = keepalive.clone();
    scheduler.spawn_periodic("keepalive", config.keepalive_interval, move || {
        let writer = keepalive_writer.clone();
        async move {
            writer
                .send_keepalive()
                .await
                .map_err(|e| TaskError::Fatal(e.to_string()))
        }
    });

    log::info!("   ├─ Tasks: {}", scheduler.task_names().join(", "));
    log::info!(
        "   └─ Burst rule: > {} hits, settled after {}ms, retained {}ms",
        config.policy.count_threshold,
        config.policy.settle_delay.num_milliseconds(),
        config.policy.retention.num_milliseconds()
    );

    scheduler.cancelled().await;

    log::info!("⚠️  Shutting down...");
    let fatal = scheduler.shutdown().await;
    engine.drain().await;
    keepalive.close().await;

    log::info!("✅ Runtime {:?}", RuntimeState::Terminated);

    match fatal {
        Some(e) => Err(RuntimeError::Fatal(e)),
        None => Ok(()),
    }
}
