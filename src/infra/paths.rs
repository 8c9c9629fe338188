// src/infra/paths.rs — Path management
//
// All paths respect the TUNELOOP_HOME environment variable for isolation.
// When TUNELOOP_HOME is set, config and data live under that directory.
// When unset, config uses ~/.tuneloop/ and data uses XDG_DATA_HOME/tuneloop.

use directories::{BaseDirs, ProjectDirs};
use std::path::PathBuf;

/// Returns the TUNELOOP_HOME override, if set.
fn tuneloop_home() -> Option<PathBuf> {
    std::env::var_os("TUNELOOP_HOME").map(PathBuf::from)
}

fn home_dir() -> PathBuf {
    BaseDirs::new()
        .map(|b| b.home_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Configuration directory: $TUNELOOP_HOME/ or ~/.tuneloop/
pub fn config_dir() -> PathBuf {
    if let Some(home) = tuneloop_home() {
        return home;
    }
    home_dir().join(".tuneloop")
}

/// Data directory: $TUNELOOP_HOME/data/ or ~/.local/share/tuneloop/
pub fn data_dir() -> PathBuf {
    if let Some(home) = tuneloop_home() {
        return home.join("data");
    }
    ProjectDirs::from("", "", "tuneloop")
        .map(|p| p.data_local_dir().to_path_buf())
        .unwrap_or_else(|| config_dir().join("data"))
}

/// Database path
pub fn db_path() -> PathBuf {
    data_dir().join("tuneloop.db")
}

/// Config file path
pub fn config_file_path() -> PathBuf {
    config_dir().join("config.toml")
}

/// Ensure all required directories exist
pub async fn ensure_dirs() -> anyhow::Result<()> {
    for dir in [config_dir(), data_dir()] {
        tokio::fs::create_dir_all(&dir).await?;
    }
    Ok(())
}
