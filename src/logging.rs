use crate::config;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

/// Env var holding a tracing filter directive, e.g. `RETUNE_LOG=retune=debug`.
pub const LOG_FILTER_ENV: &str = "RETUNE_LOG";

/// Sends tracing output to the log file under the config root. The terminal
/// belongs to the TUI, so nothing is written to stdout or stderr.
pub fn init() -> Result<()> {
    let path = config::log_path()?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    let filter = EnvFilter::try_from_env(LOG_FILTER_ENV).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(Mutex::new(file))
        .with_env_filter(filter)
        .with_ansi(false)
        .try_init()
        .map_err(|err| anyhow::anyhow!("failed to install log subscriber: {err}"))?;
    Ok(())
}
