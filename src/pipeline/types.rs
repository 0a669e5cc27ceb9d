//! Core data types shared by the aggregator, sink and store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single matched emote occurrence, created by ingestion and consumed by
/// the aggregator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmoteEvent {
    /// Canonical catalog key (the emote prefix)
    pub key: String,
    pub observed_at: DateTime<Utc>,
}

impl EmoteEvent {
    pub fn new(key: impl Into<String>, observed_at: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            observed_at,
        }
    }
}

/// A completed burst, ready for persistence
///
/// Created atomically by `WindowedAggregator::extract_bursts` and never
/// mutated afterwards. Maps 1:1 onto a row of the `timestamps` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BurstRecord {
    pub id: Uuid,
    pub key: String,
    pub count: usize,
    pub extracted_at: DateTime<Utc>,
}

impl BurstRecord {
    pub fn new(key: impl Into<String>, count: usize, extracted_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: key.into(),
            count,
            extracted_at,
        }
    }
}

/// Counters returned by a single eviction pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvictionStats {
    pub entries_removed: usize,
    pub buckets_removed: usize,
}
