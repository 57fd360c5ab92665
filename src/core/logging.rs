//! Logging setup.
//!
//! Installs a `tracing` subscriber according to the loaded configuration:
//! `LOG_LEVEL` seeds an `EnvFilter` (overridable via `RUST_LOG`), `LOG_FILE`
//! redirects output to an append-mode file, and `CLEAR_LOG=true` truncates
//! that file first. Every log line carries the node id through the runtime's
//! root span.

use crate::core::config::Config;
use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::path::Path;
use tracing_subscriber::EnvFilter;

/// Install the global subscriber. Call once, before the runtime starts.
pub fn init(config: &Config) -> Result<()> {
    if config.clear_log {
        if let Some(path) = &config.log_file {
            truncate_log(path)?;
        }
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    match &config.log_file {
        Some(path) => {
            if let Some(dir) = Path::new(path).parent().filter(|d| !d.as_os_str().is_empty()) {
                std::fs::create_dir_all(dir)
                    .with_context(|| format!("failed to create log directory {}", dir.display()))?;
            }
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {path}"))?;
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
        }
        None => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .init();
        }
    }

    Ok(())
}

fn truncate_log(path: &str) -> Result<()> {
    OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("failed to clear log file {path}"))?;
    Ok(())
}
