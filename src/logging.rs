//! Log file setup.
//!
//! Logs go to a daily-rotated file so they never interleave with command
//! output. The filter comes from `FRAVAER_LOG`, then `RUST_LOG`, then the
//! configured level.

use color_eyre::{eyre::eyre, Result};
use std::path::{Path, PathBuf};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

const LOG_FILE_PREFIX: &str = "fravaer.log";

/// Install the global subscriber. Keep the guard alive until exit or
/// buffered lines are lost.
pub fn init(config: &LoggingConfig, data_dir: &Path) -> Result<WorkerGuard> {
  let dir = log_dir(config, data_dir);
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(&dir, LOG_FILE_PREFIX);
  let (writer, guard) = tracing_appender::non_blocking(appender);

  tracing_subscriber::registry()
    .with(filter(config))
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}

fn log_dir(config: &LoggingConfig, data_dir: &Path) -> PathBuf {
  config
    .directory
    .clone()
    .unwrap_or_else(|| data_dir.join("logs"))
}

fn filter(config: &LoggingConfig) -> EnvFilter {
  EnvFilter::try_from_env("FRAVAER_LOG")
    .or_else(|_| EnvFilter::try_from_default_env())
    .unwrap_or_else(|_| EnvFilter::new(&config.level))
}
