//! Burst persistence
//!
//! Table written: `timestamps` (one row per settled burst).
//!
//! Every flush becomes a single multi-row INSERT with four positional
//! parameters per record, bound in record order: id, emote, count, timestamp.
//! Batches above `MAX_ROWS_PER_STATEMENT` are split into consecutive
//! statements inside one transaction to stay below SQLite's variable limit.

use super::types::BurstRecord;
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

/// Columns bound per record
pub const PARAMS_PER_RECORD: usize = 4;

/// 8000 rows * 4 params = 32000, under SQLite's 32766 default
pub const MAX_ROWS_PER_STATEMENT: usize = 8_000;

/// Timestamp column format (UTC, millisecond precision)
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.3f";

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS timestamps (
    id TEXT PRIMARY KEY,
    emote TEXT NOT NULL,
    count INTEGER NOT NULL,
    timestamp TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_timestamps_emote ON timestamps(emote, timestamp DESC);
";

#[derive(Debug)]
pub enum StoreError {
    Database(String),
    Schema(String),
}

impl From<rusqlite::Error> for StoreError {
    fn from(err: rusqlite::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Database(e) => write!(f, "Database error: {}", e),
            StoreError::Schema(e) => write!(f, "Schema error: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}

impl BurstRecord {
    /// Positional parameters for one `timestamps` row: id, emote, count, timestamp
    pub fn to_params(&self) -> [Value; PARAMS_PER_RECORD] {
        [
            Value::Text(self.id.to_string()),
            Value::Text(self.key.clone()),
            Value::Integer(self.count as i64),
            Value::Text(self.extracted_at.format(TIMESTAMP_FORMAT).to_string()),
        ]
    }
}

/// `(?1, ?2, ?3, ?4), (?5, ?6, ?7, ?8), ...` for `rows` rows of `arity` params
pub fn batch_placeholders(arity: usize, rows: usize) -> String {
    (0..rows)
        .map(|row| {
            let params: Vec<String> = (1..=arity)
                .map(|col| format!("?{}", row * arity + col))
                .collect();
            format!("({})", params.join(", "))
        })
        .collect::<Vec<_>>()
        .join(", ")
}

/// Full INSERT statement for `rows` burst records
pub fn insert_statement(rows: usize) -> String {
    format!(
        "INSERT INTO timestamps (id, emote, count, timestamp) VALUES {}",
        batch_placeholders(PARAMS_PER_RECORD, rows)
    )
}

/// Flattened parameter list in record order
pub fn encode_batch(records: &[BurstRecord]) -> Vec<Value> {
    records.iter().flat_map(BurstRecord::to_params).collect()
}

/// Persistence collaborator for the batch sink
#[async_trait]
pub trait BurstStore: Send + Sync {
    /// Insert all records; returns the number of rows written
    async fn insert_batch(&self, records: &[BurstRecord]) -> Result<usize, StoreError>;

    /// Backend name for logging
    fn backend_type(&self) -> &'static str;
}

/// Create the `timestamps` table and enable WAL (idempotent)
pub fn run_schema_migrations(conn: &Connection) -> Result<(), StoreError> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.execute_batch(SCHEMA_SQL)
        .map_err(|e| StoreError::Schema(e.to_string()))?;

    log::info!("✅ Schema ready (timestamps table, WAL mode)");
    Ok(())
}

pub struct SqliteBurstStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteBurstStore {
    /// Open (or create) the database and apply the schema
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db_path = db_path.as_ref();
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::Database(format!(
                        "Failed to create database directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let conn = Connection::open(db_path)?;
        run_schema_migrations(&conn)?;

        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }
}

#[async_trait]
impl BurstStore for SqliteBurstStore {
    async fn insert_batch(&self, records: &[BurstRecord]) -> Result<usize, StoreError> {
        if records.is_empty() {
            return Ok(0);
        }

        let mut conn = self.conn.lock().unwrap_or_else(PoisonError::into_inner);
        let tx = conn.transaction()?;

        let mut written = 0;
        for chunk in records.chunks(MAX_ROWS_PER_STATEMENT) {
            let sql = insert_statement(chunk.len());
            written += tx.execute(&sql, params_from_iter(encode_batch(chunk)))?;
        }

        tx.commit()?;
        log::debug!("✅ Inserted {} bursts into timestamps", written);

        Ok(written)
    }

    fn backend_type(&self) -> &'static str {
        "SQLite"
    }
}
