//! Runtime configuration from environment variables

use chrono::Duration as ChronoDuration;
use std::env;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub enum ConfigError {
    MissingVariable(String),
    InvalidValue(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::MissingVariable(var) => write!(f, "Missing environment variable: {}", var),
            ConfigError::InvalidValue(msg) => write!(f, "Invalid configuration value: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Threshold + settle rule for declaring a burst complete
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BurstPolicy {
    /// Bucket must hold strictly more observations than this
    pub count_threshold: usize,
    /// Oldest observation must be at least this old
    pub settle_delay: ChronoDuration,
    /// Observations this old are evicted regardless of burst status
    pub retention: ChronoDuration,
}

impl Default for BurstPolicy {
    fn default() -> Self {
        Self {
            count_threshold: 15,
            settle_delay: ChronoDuration::milliseconds(8_500),
            retention: ChronoDuration::milliseconds(10_000),
        }
    }
}

/// Configuration for the burst runtime
///
/// Loaded from environment variables with sensible defaults.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Chat WebSocket endpoint
    pub chat_ws_url: String,

    /// Emote catalog JSON endpoint
    pub catalog_url: String,

    /// Path to SQLite database file
    pub db_path: String,

    /// JSONL file receiving batches that exhausted their flush retries
    pub dead_letter_path: Option<String>,

    pub policy: BurstPolicy,

    pub evict_interval: Duration,
    pub extract_interval: Duration,
    pub flush_interval: Duration,
    pub keepalive_interval: Duration,

    /// Debug snapshot of bucket sizes; zero disables it
    pub snapshot_interval: Duration,

    pub flush_max_retries: u32,
    pub flush_retry_base_ms: u64,

    /// Inbound chat message channel capacity
    pub channel_buffer: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chat_ws_url: "wss://chat.destiny.gg:443/ws".to_string(),
            catalog_url: "https://cdn.destiny.gg/2.24.1/emotes/emotes.json".to_string(),
            db_path: "data/emoteburst.db".to_string(),
            dead_letter_path: None,
            policy: BurstPolicy::default(),
            evict_interval: Duration::from_millis(100),
            extract_interval: Duration::from_millis(100),
            flush_interval: Duration::from_millis(5_000),
            keepalive_interval: Duration::from_millis(1_000),
            snapshot_interval: Duration::ZERO,
            flush_max_retries: 3,
            flush_retry_base_ms: 200,
            channel_buffer: 10_000,
        }
    }
}

fn parse_var<T: FromStr>(name: &str) -> Result<Option<T>, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{}={:?} is not a valid number", name, raw))),
        Err(_) => Ok(None),
    }
}

fn millis_var(name: &str, default: Duration) -> Result<Duration, ConfigError> {
    Ok(parse_var::<u64>(name)?.map(Duration::from_millis).unwrap_or(default))
}

/// Millisecond variable as a chrono duration; out-of-range values are rejected
fn age_var(name: &str, default: ChronoDuration) -> Result<ChronoDuration, ConfigError> {
    let Some(ms) = parse_var::<u64>(name)? else {
        return Ok(default);
    };

    i64::try_from(ms)
        .ok()
        .and_then(ChronoDuration::try_milliseconds)
        .ok_or_else(|| ConfigError::InvalidValue(format!("{}={} is out of range", name, ms)))
}

impl PipelineConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `CHAT_WS_URL` (default: wss://chat.destiny.gg:443/ws)
    /// - `CATALOG_URL` (default: destiny.gg emotes.json)
    /// - `BURST_DB_PATH` (default: data/emoteburst.db)
    /// - `DEAD_LETTER_PATH` (default: unset, spill disabled)
    /// - `BURST_THRESHOLD` (default: 15)
    /// - `SETTLE_DELAY_MS` (default: 8500)
    /// - `RETENTION_MS` (default: 10000)
    /// - `EVICT_INTERVAL_MS` / `EXTRACT_INTERVAL_MS` (default: 100)
    /// - `FLUSH_INTERVAL_MS` (default: 5000)
    /// - `KEEPALIVE_INTERVAL_MS` (default: 1000)
    /// - `SNAPSHOT_INTERVAL_MS` (default: 0, disabled)
    /// - `FLUSH_MAX_RETRIES` (default: 3)
    /// - `FLUSH_RETRY_BASE_MS` (default: 200)
    /// - `CHANNEL_BUFFER` (default: 10000)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let policy = BurstPolicy {
            count_threshold: parse_var("BURST_THRESHOLD")?
                .unwrap_or(defaults.policy.count_threshold),
            settle_delay: age_var("SETTLE_DELAY_MS", defaults.policy.settle_delay)?,
            retention: age_var("RETENTION_MS", defaults.policy.retention)?,
        };

        let config = Self {
            chat_ws_url: env::var("CHAT_WS_URL").unwrap_or(defaults.chat_ws_url),
            catalog_url: env::var("CATALOG_URL").unwrap_or(defaults.catalog_url),
            db_path: env::var("BURST_DB_PATH").unwrap_or(defaults.db_path),
            dead_letter_path: env::var("DEAD_LETTER_PATH")
                .ok()
                .filter(|path| !path.trim().is_empty()),
            policy,
            evict_interval: millis_var("EVICT_INTERVAL_MS", defaults.evict_interval)?,
            extract_interval: millis_var("EXTRACT_INTERVAL_MS", defaults.extract_interval)?,
            flush_interval: millis_var("FLUSH_INTERVAL_MS", defaults.flush_interval)?,
            keepalive_interval: millis_var("KEEPALIVE_INTERVAL_MS", defaults.keepalive_interval)?,
            snapshot_interval: millis_var("SNAPSHOT_INTERVAL_MS", defaults.snapshot_interval)?,
            flush_max_retries: parse_var("FLUSH_MAX_RETRIES")?
                .unwrap_or(defaults.flush_max_retries),
            flush_retry_base_ms: parse_var("FLUSH_RETRY_BASE_MS")?
                .unwrap_or(defaults.flush_retry_base_ms),
            channel_buffer: parse_var("CHANNEL_BUFFER")?.unwrap_or(defaults.channel_buffer),
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.chat_ws_url.starts_with("ws://") && !self.chat_ws_url.starts_with("wss://") {
            return Err(ConfigError::InvalidValue(
                "CHAT_WS_URL must start with ws:// or wss://".to_string(),
            ));
        }

        if !self.catalog_url.starts_with("http://") && !self.catalog_url.starts_with("https://") {
            return Err(ConfigError::InvalidValue(
                "CATALOG_URL must start with http:// or https://".to_string(),
            ));
        }

        if self.db_path.trim().is_empty() {
            return Err(ConfigError::MissingVariable("BURST_DB_PATH".to_string()));
        }

        let required = [
            ("EVICT_INTERVAL_MS", self.evict_interval),
            ("EXTRACT_INTERVAL_MS", self.extract_interval),
            ("FLUSH_INTERVAL_MS", self.flush_interval),
            ("KEEPALIVE_INTERVAL_MS", self.keepalive_interval),
        ];
        for (name, interval) in required {
            if interval.is_zero() {
                return Err(ConfigError::InvalidValue(format!("{} must be greater than 0", name)));
            }
        }

        if self.channel_buffer == 0 {
            return Err(ConfigError::InvalidValue("CHANNEL_BUFFER must be greater than 0".to_string()));
        }

        if self.policy.settle_delay <= ChronoDuration::zero() {
            return Err(ConfigError::InvalidValue("SETTLE_DELAY_MS must be greater than 0".to_string()));
        }

        // Eviction would empty a bucket before it could ever settle
        if self.policy.settle_delay >= self.policy.retention {
            return Err(ConfigError::InvalidValue(format!(
                "SETTLE_DELAY_MS ({}) must be below RETENTION_MS ({})",
                self.policy.settle_delay.num_milliseconds(),
                self.policy.retention.num_milliseconds()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: &[&str] = &[
        "CHAT_WS_URL",
        "CATALOG_URL",
        "BURST_DB_PATH",
        "DEAD_LETTER_PATH",
        "BURST_THRESHOLD",
        "SETTLE_DELAY_MS",
        "RETENTION_MS",
        "EVICT_INTERVAL_MS",
        "EXTRACT_INTERVAL_MS",
        "FLUSH_INTERVAL_MS",
        "KEEPALIVE_INTERVAL_MS",
        "SNAPSHOT_INTERVAL_MS",
        "FLUSH_MAX_RETRIES",
        "FLUSH_RETRY_BASE_MS",
        "CHANNEL_BUFFER",
    ];

    fn clear_env() {
        for var in VARS {
            env::remove_var(var);
        }
    }

    // Env mutation is process-global, so every case runs inside one test
    #[test]
    fn test_config_from_env() {
        clear_env();
        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.chat_ws_url, "wss://chat.destiny.gg:443/ws");
        assert_eq!(config.db_path, "data/emoteburst.db");
        assert_eq!(config.policy, BurstPolicy::default());
        assert_eq!(config.flush_interval, Duration::from_millis(5_000));
        assert_eq!(config.snapshot_interval, Duration::ZERO);
        assert!(config.dead_letter_path.is_none());

        env::set_var("BURST_THRESHOLD", "30");
        env::set_var("SETTLE_DELAY_MS", "4000");
        env::set_var("RETENTION_MS", "6000");
        env::set_var("FLUSH_INTERVAL_MS", "2000");
        env::set_var("DEAD_LETTER_PATH", "/tmp/dead.jsonl");
        let config = PipelineConfig::from_env().unwrap();
        assert_eq!(config.policy.count_threshold, 30);
        assert_eq!(config.policy.settle_delay, ChronoDuration::milliseconds(4_000));
        assert_eq!(config.policy.retention, ChronoDuration::milliseconds(6_000));
        assert_eq!(config.flush_interval, Duration::from_millis(2_000));
        assert_eq!(config.dead_letter_path.as_deref(), Some("/tmp/dead.jsonl"));

        env::set_var("BURST_THRESHOLD", "many");
        assert!(matches!(
            PipelineConfig::from_env(),
            Err(ConfigError::InvalidValue(_))
        ));
        env::remove_var("BURST_THRESHOLD");

        env::set_var("SETTLE_DELAY_MS", "6000");
        assert!(matches!(
            PipelineConfig::from_env(),
            Err(ConfigError::InvalidValue(_))
        ));

        clear_env();
        env::set_var("SETTLE_DELAY_MS", i64::MIN.to_string());
        assert!(matches!(
            PipelineConfig::from_env(),
            Err(ConfigError::InvalidValue(_))
        ));
        env::set_var("SETTLE_DELAY_MS", u64::MAX.to_string());
        assert!(matches!(
            PipelineConfig::from_env(),
            Err(ConfigError::InvalidValue(_))
        ));
        env::set_var("SETTLE_DELAY_MS", "-1");
        assert!(PipelineConfig::from_env().is_err());

        clear_env();
        env::set_var("CHAT_WS_URL", "https://chat.example.com/ws");
        assert!(PipelineConfig::from_env().is_err());

        clear_env();
        env::set_var("EVICT_INTERVAL_MS", "0");
        assert!(PipelineConfig::from_env().is_err());

        clear_env();
    }
}
