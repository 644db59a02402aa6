//! ConfigLoader facade delegating to the merge service.

use super::merge::service::MergeService;
use super::SyncConfig;
use crate::error::SyncError;
use std::path::{Path, PathBuf};

/// Configuration loader facade.
pub struct ConfigLoader;

impl ConfigLoader {
    /// Workspace-local config file (`<workspace>/.hashsync.toml`)
    pub fn workspace_config_path(workspace_root: &Path) -> PathBuf {
        workspace_root.join(super::WORKSPACE_CONFIG_FILE)
    }

    /// Load configuration from files and environment, then validate it.
    pub fn load(workspace_root: &Path) -> Result<SyncConfig, SyncError> {
        let config = MergeService::load(workspace_root).map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file with the environment overlay.
    pub fn load_from_file(path: &Path) -> Result<SyncConfig, SyncError> {
        let config = MergeService::load_from_file(path).map_err(config_error)?;
        config.validate()?;
        Ok(config)
    }
}

fn config_error(err: config::ConfigError) -> SyncError {
    SyncError::ConfigError(err.to_string())
}
