use std::str::FromStr;

use anyhow::{Context, Result};
use tracing::Level;
use tracing_subscriber::prelude::*;

/// If in debug mode, default level is debug to get maximum logging
#[cfg(debug_assertions)]
const DEFAULT_LOG_LEVEL: &str = "debug";

/// If not in debug mode, default level is error to get important logs
#[cfg(not(debug_assertions))]
const DEFAULT_LOG_LEVEL: &str = "error";

fn detect_log_level(is_debug: bool) -> Result<Level> {
    // `IODAEMON_LOG` takes precedence over the `-debug` flag when both are
    // set, mirroring the teacher's `log-level`/`debug` precedence.
    let level = match std::env::var("IODAEMON_LOG") {
        Ok(level) => level,
        Err(_) if is_debug => "debug".to_string(),
        Err(_) => DEFAULT_LOG_LEVEL.to_string(),
    };
    Level::from_str(&level).context("failed to parse IODAEMON_LOG level")
}

/// Installs a `tracing-subscriber` text formatter writing to stderr, leveled
/// by `IODAEMON_LOG` (or `-debug` as a fallback).
pub fn init(is_debug: bool) -> Result<()> {
    let level = detect_log_level(is_debug)?;
    let log_level_filter = tracing_subscriber::filter::LevelFilter::from(level);

    tracing_subscriber::registry()
        .with(log_level_filter)
        .with(
            tracing_subscriber::fmt::layer()
                .without_time()
                .with_writer(std::io::stderr),
        )
        .try_init()
        .map_err(|e| anyhow::anyhow!("failed to init logger: {}", e))
}
