//! XDG Base Directory utilities for configuration and workspace state.

use crate::error::SyncError;
use std::path::{Component, Path, PathBuf};

const APP_DIR: &str = "hashsync";

/// Get XDG data home directory
///
/// Returns `$XDG_DATA_HOME` if set, otherwise defaults to `$HOME/.local/share`
pub fn data_home() -> Option<PathBuf> {
    if let Ok(xdg_data_home) = std::env::var("XDG_DATA_HOME") {
        if !xdg_data_home.is_empty() {
            return Some(PathBuf::from(xdg_data_home));
        }
    }

    std::env::var("HOME")
        .ok()
        .map(|home| PathBuf::from(home).join(".local").join("share"))
}

/// Get XDG config home directory
///
/// Returns `$XDG_CONFIG_HOME` if set, otherwise defaults to `$HOME/.config`
pub fn config_home() -> Result<PathBuf, SyncError> {
    if let Ok(xdg_config_home) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg_config_home.is_empty() {
            return Ok(PathBuf::from(xdg_config_home));
        }
    }

    let home = std::env::var("HOME").map_err(|_| {
        SyncError::ConfigError(
            "Could not determine XDG config home directory (HOME not set)".to_string(),
        )
    })?;

    Ok(PathBuf::from(home).join(".config"))
}

/// `$XDG_CONFIG_HOME/hashsync/config.toml`
pub fn global_config_path() -> Result<PathBuf, SyncError> {
    Ok(config_home()?.join(APP_DIR).join("config.toml"))
}

/// Application data directory, `$XDG_DATA_HOME/hashsync`
pub fn app_data_dir() -> Result<PathBuf, SyncError> {
    data_home().map(|d| d.join(APP_DIR)).ok_or_else(|| {
        SyncError::ConfigError(
            "Could not determine XDG data home directory (HOME not set)".to_string(),
        )
    })
}

/// Get the data directory for a specific workspace
///
/// The canonical workspace path is mirrored below the data directory, so
/// `/home/user/notes` maps to `$XDG_DATA_HOME/hashsync/workspaces/home/user/notes/`.
/// Nothing is written inside the workspace itself.
pub fn workspace_data_dir(workspace_root: &Path) -> Result<PathBuf, SyncError> {
    let canonical = dunce::canonicalize(workspace_root).map_err(|e| {
        SyncError::ConfigError(format!("Failed to canonicalize workspace path: {}", e))
    })?;
    Ok(mirror_under(&app_data_dir()?.join("workspaces"), &canonical))
}

fn mirror_under(base: &Path, path: &Path) -> PathBuf {
    let mut dir = base.to_path_buf();
    for component in path.components() {
        if let Component::Normal(name) = component {
            dir.push(name);
        }
    }
    dir
}
