use color_eyre::{eyre::eyre, Result};
use std::path::Path;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the tracing filter directives.
pub const LOG_ENV: &str = "LIFELINE_LOG";
const DEFAULT_FILTER: &str = "lifeline=info";

fn filter() -> EnvFilter {
  EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

/// Log to stderr. Used by the one-shot commands.
pub fn init_stderr() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(filter())
    .with_writer(std::io::stderr)
    .with_target(false)
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))
}

/// Log to a daily rolling file under `dir`, keeping the terminal free for the
/// console. Logs stop being flushed once the guard is dropped.
pub fn init_file(dir: &Path) -> Result<WorkerGuard> {
  std::fs::create_dir_all(dir).map_err(|e| eyre!("Failed to create log directory: {}", e))?;
  let appender = tracing_appender::rolling::daily(dir, "lifeline.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);
  tracing_subscriber::fmt()
    .with_env_filter(filter())
    .with_writer(writer)
    .with_ansi(false)
    .try_init()
    .map_err(|e| eyre!("Failed to install logger: {}", e))?;
  Ok(guard)
}
