//! Structured JSON logging.

use crate::error::{Error, Result};
use tracing::Level;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, EnvFilter};

/// Parses a log level name (`trace`, `debug`, `info`, `warn`, `error`), case-insensitively.
pub fn parse_level(level: &str) -> Result<Level> {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(Error::config(format!(
            "invalid log level {:?} (expected trace, debug, info, warn or error)",
            other
        ))),
    }
}

/// Installs the global JSON subscriber at `level`.
///
/// `RUST_LOG`, when set, adds per-target directives on top of the level.
pub fn init_logging(level: &str) -> Result<()> {
    let level = parse_level(level)?;
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    fmt()
        .with_env_filter(filter)
        .json()
        .with_current_span(false)
        .try_init()
        .map_err(|e| Error::config(format!("failed to initialize global tracing subscriber: {}", e)))
}
