//! Burst Runtime
//!
//! Connects to chat, counts catalog emotes per rolling window and persists
//! settled bursts to SQLite.
//!
//! Usage:
//!   cargo run --release --bin burst_runtime
//!
//! Environment variables (see `PipelineConfig::from_env` for the full list):
//!   CHAT_WS_URL - chat WebSocket endpoint
//!   CATALOG_URL - emote catalog JSON
//!   BURST_DB_PATH - SQLite database path (default: data/emoteburst.db)
//!   DEAD_LETTER_PATH - JSONL spill file for failed flushes (default: unset)
//!   RUST_LOG - log filter (default: info)

use dotenv::dotenv;
use emoteburst::pipeline::{config::PipelineConfig, runtime};
use log::{error, info};
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> ExitCode {
    dotenv().ok();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    // NOTE: Workaround for rustls issue
    let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

    info!("🚀 Emote Burst Runtime");
    info!("   └─ Version: {}", env!("CARGO_PKG_VERSION"));

    let config = match PipelineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };

    info!("✅ Configuration loaded");
    info!("   ├─ Chat: {}", config.chat_ws_url);
    info!("   ├─ Catalog: {}", config.catalog_url);
    info!("   ├─ Database: {}", config.db_path);
    info!("   ├─ Channel buffer: {} messages", config.channel_buffer);
    info!(
        "   ├─ Intervals: evict {}ms, extract {}ms, flush {}ms, keepalive {}ms",
        config.evict_interval.as_millis(),
        config.extract_interval.as_millis(),
        config.flush_interval.as_millis(),
        config.keepalive_interval.as_millis()
    );
    info!(
        "   └─ Flush retries: {} (base {}ms)",
        config.flush_max_retries, config.flush_retry_base_ms
    );

    let shutdown = CancellationToken::new();
    let ctrl_c_token = shutdown.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("");
                info!("⚠️  Received CTRL+C, shutting down...");
            }
            Err(err) => error!("❌ Failed to listen for CTRL+C: {}", err),
        }
        ctrl_c_token.cancel();
    });

    info!("🔄 Press CTRL+C to shutdown gracefully");

    match runtime::run(config, shutdown).await {
        Ok(()) => {
            info!("✅ Burst runtime stopped");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("❌ {}", e);
            ExitCode::FAILURE
        }
    }
}
