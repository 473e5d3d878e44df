//! Central path resolution for DeskPulse CLI files.
//!
//! Resolved once at startup from: `--data-dir` > `DESKPULSE_DATA_DIR` env > `~/.deskpulse`.

use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::Context;

static DATA_DIR: RwLock<Option<PathBuf>> = RwLock::new(None);

/// Pure resolution step, separated from the global for tests.
pub fn resolve_data_dir(
    explicit: Option<&Path>,
    env_value: Option<String>,
    home: Option<PathBuf>,
) -> anyhow::Result<PathBuf> {
    if let Some(p) = explicit {
        return Ok(p.to_path_buf());
    }
    if let Some(value) = env_value.filter(|v| !v.trim().is_empty()) {
        return Ok(PathBuf::from(value));
    }
    home.map(|h| h.join(".deskpulse"))
        .context("HOME directory not found; pass --data-dir")
}

/// Initialize the global data directory. Returns the resolved path.
pub fn init_data_dir(explicit: Option<&Path>) -> anyhow::Result<PathBuf> {
    let dir = resolve_data_dir(
        explicit,
        std::env::var("DESKPULSE_DATA_DIR").ok(),
        dirs::home_dir(),
    )?;
    let mut guard = DATA_DIR.write().unwrap_or_else(|e| e.into_inner());
    *guard = Some(dir.clone());
    Ok(dir)
}

/// Current data directory, falling back to resolution without `--data-dir`.
pub fn data_dir() -> anyhow::Result<PathBuf> {
    let current = DATA_DIR.read().unwrap_or_else(|e| e.into_inner()).clone();
    match current {
        Some(dir) => Ok(dir),
        None => init_data_dir(None),
    }
}

pub fn log_dir() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("logs"))
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    Ok(data_dir()?.join("config.toml"))
}
