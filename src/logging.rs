//! Tracing setup: a daily rolling log file plus warnings on stderr.

use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Environment variable holding the log filter (e.g. `spesa=debug`)
const LOG_ENV: &str = "SPESA_LOG";

/// Install the global subscriber.
///
/// The returned guard flushes the file writer on drop and must be held for
/// the lifetime of the process.
pub fn init(log_dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(log_dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", log_dir.display(), e))?;

  let appender = tracing_appender::rolling::daily(log_dir, "spesa.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  let filter = EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"));

  let file_layer = fmt::layer()
    .with_writer(writer)
    .with_ansi(false)
    .with_target(true);

  let stderr_layer = fmt::layer()
    .with_writer(std::io::stderr)
    .without_time()
    .with_filter(tracing_subscriber::filter::LevelFilter::WARN);

  tracing_subscriber::registry()
    .with(filter)
    .with(file_layer)
    .with(stderr_layer)
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(guard)
}
