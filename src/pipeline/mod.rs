//! # Emote Burst Pipeline
//!
//! In-memory rolling windows per emote with threshold + settle burst
//! detection, persisted in batches to SQLite.
//!
//! ## Architecture
//!
//! **Key Principle:** individual chat messages are NEVER persisted.
//!
//! 1. Chat messages arrive from the WebSocket reader (in-memory only)
//! 2. Each catalog emote in a message becomes one observation in its bucket
//! 3. Observations older than the retention window are evicted
//! 4. Buckets over the threshold whose oldest entry has settled are drained
//!    into `BurstRecord`s
//! 5. The sink writes pending bursts as one multi-row INSERT per flush
//!
//! ## Module Organization
//!
//! - `types` - EmoteEvent, BurstRecord, EvictionStats
//! - `clock` - injectable time source
//! - `windows` - per-emote buckets, eviction and extraction
//! - `db` - `timestamps` schema and the BurstStore trait
//! - `retry` / `dead_letter` - flush retry policy and JSONL spill
//! - `sink` - pending batch and flush
//! - `scheduler` - named periodic tasks under one cancellation token
//! - `engine` / `ingestion` / `runtime` - orchestration

pub mod clock;
pub mod config;
pub mod db;
pub mod dead_letter;
pub mod engine;
pub mod ingestion;
pub mod retry;
pub mod runtime;
pub mod scheduler;
pub mod sink;
pub mod types;
pub mod windows;

// Re-export commonly used types
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{BurstPolicy, ConfigError, PipelineConfig};
pub use db::{BurstStore, SqliteBurstStore, StoreError};
pub use engine::BurstEngine;
pub use runtime::{RuntimeError, RuntimeState};
pub use sink::{BatchSink, FlushOutcome};
pub use types::{BurstRecord, EmoteEvent, EvictionStats};
pub use windows::WindowedAggregator;
