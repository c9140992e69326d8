//! Logging goes to a file: the terminal belongs to the UI while it runs.

use anyhow::Result;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

const DEFAULT_FILTER: &str = "info,speedprobe=debug";

/// Default log location, `~/.local/state/speedprobe/speedprobe.log`.
pub fn default_log_path() -> Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("speedprobe")?;
    Ok(xdg_dirs.get_state_home().join("speedprobe.log"))
}

/// Initialize structured logging, appending to `path`. Returns Err when the
/// file cannot be opened so the caller can run without logs.
pub fn init_logging(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = fs::OpenOptions::new().create(true).append(true).open(path)?;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .try_init()
        .map_err(|e| anyhow::anyhow!("{}", e))?;

    tracing::info!("speedprobe logging initialized at {}", path.display());
    Ok(())
}
