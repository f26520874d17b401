use std::fs::OpenOptions;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Path of the log file. The terminal belongs to the UI, so nothing is
/// logged unless this is set.
pub const LOG_FILE_ENV: &str = "REELS_TUI_LOG";
/// Filter directives, `info` when unset.
pub const LOG_LEVEL_ENV: &str = "REELS_TUI_LOG_LEVEL";

pub fn log_path() -> Option<PathBuf> {
    std::env::var_os(LOG_FILE_ENV)
        .filter(|value| !value.is_empty())
        .map(PathBuf::from)
}

/// Installs the global subscriber. Returns `false` when logging is off.
pub fn init() -> Result<bool> {
    let Some(path) = log_path() else {
        return Ok(false);
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("open log file {}", path.display()))?;

    let filter = EnvFilter::try_from_env(LOG_LEVEL_ENV).unwrap_or_else(|_| "info".into());
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(Mutex::new(file)),
        )
        .try_init()
        .context("install tracing subscriber")?;
    tracing::info!(version = crate::VERSION, "logging started");
    Ok(true)
}
