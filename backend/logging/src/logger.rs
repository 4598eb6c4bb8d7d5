//! Structured Logger
//!
//! Console output plus NDJSON written to `<log_dir>/signalforge.log.YYYY-MM-DD`.
//! `RUST_LOG` overrides the configured level.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const LOG_FILE_PREFIX: &str = "signalforge.log";

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Initialize the global logger with a console layer and a rolling file layer.
///
/// A second call is a no-op.
pub fn init_logger<P: AsRef<Path>>(log_dir: P, level: &str) -> Result<()> {
    let log_dir = log_dir.as_ref();
    std::fs::create_dir_all(log_dir)
        .with_context(|| format!("Failed to create log directory: {}", log_dir.display()))?;

    let file_appender = RollingFileAppender::new(Rotation::DAILY, log_dir, LOG_FILE_PREFIX);

    let file_layer = fmt::layer()
        .json()
        .with_writer(file_appender)
        .with_ansi(false);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(true);

    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(console_layer)
        .with(file_layer)
        .try_init();
    Ok(())
}

/// Console-only logger, for one-shot commands that should not touch the log directory.
pub fn init_console_logger(level: &str) {
    let _ = tracing_subscriber::registry()
        .with(env_filter(level))
        .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
        .try_init();
}
