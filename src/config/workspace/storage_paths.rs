//! StorageConfig and resolve_paths for device state and the shared remote.

use crate::config::xdg;
use crate::error::SyncError;
use crate::keys::DEFAULT_PREFIX;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Storage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Device state database (local tree and base); defaults to the workspace data dir
    pub state_path: Option<PathBuf>,

    /// Shared remote directory holding the authoritative tree and the objects.
    /// Devices pointing at the same directory sync with each other.
    pub remote_path: Option<PathBuf>,

    /// Namespace for permanent object keys
    pub key_prefix: String,

    /// Ceiling for access descriptor lifetimes
    pub descriptor_max_ttl_secs: u64,

    /// Secret for signing access descriptors; defaults to the remote path
    pub signing_secret: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_path: None,
            remote_path: None,
            key_prefix: DEFAULT_PREFIX.to_string(),
            descriptor_max_ttl_secs: 3600,
            signing_secret: None,
        }
    }
}

/// Concrete locations derived from a `StorageConfig`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedStorage {
    pub state_db: PathBuf,
    pub authority_db: PathBuf,
    pub objects_root: PathBuf,
    pub signing_secret: String,
}

impl StorageConfig {
    pub fn descriptor_max_ttl(&self) -> Duration {
        Duration::from_secs(self.descriptor_max_ttl_secs)
    }

    /// Resolve storage paths to actual filesystem locations.
    ///
    /// Relative configured paths are taken relative to the workspace root.
    pub fn resolve_paths(&self, workspace_root: &Path) -> Result<ResolvedStorage, SyncError> {
        let state_db = match &self.state_path {
            Some(path) => workspace_root.join(path),
            None => xdg::workspace_data_dir(workspace_root)?.join("state"),
        };
        let remote = match &self.remote_path {
            Some(path) => workspace_root.join(path),
            None => xdg::app_data_dir()?.join("remote"),
        };
        let signing_secret = self
            .signing_secret
            .clone()
            .unwrap_or_else(|| remote.to_string_lossy().into_owned());

        Ok(ResolvedStorage {
            state_db,
            authority_db: remote.join("authority"),
            objects_root: remote.join("objects"),
            signing_secret,
        })
    }
}
