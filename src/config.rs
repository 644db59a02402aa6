//! Configuration
//!
//! Layered with the `config` crate: serde defaults, then the global file
//! (`$XDG_CONFIG_HOME/hashsync/config.toml`), then the workspace file
//! (`.hashsync.toml`), then `HASHSYNC__*` environment variables.

mod facade;
mod merge;
mod paths;
mod sources;
mod workspace;

pub use facade::ConfigLoader;
pub use paths::xdg_root as xdg;
pub use sources::environment::ENV_PREFIX;
pub use workspace::storage_paths::{ResolvedStorage, StorageConfig};

use crate::error::SyncError;
use crate::logging::LoggingConfig;
use crate::pending::RetryPolicy;
use crate::workspace::watch::WatchConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Workspace-local config file name
pub const WORKSPACE_CONFIG_FILE: &str = ".hashsync.toml";

/// Top-level configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Stable identifier of this device; derived from host and workspace when unset
    pub device_id: Option<String>,

    /// Seconds between polls of the authoritative tree
    pub poll_interval_secs: u64,

    /// Concurrent transfers per cycle
    pub max_concurrency: usize,

    /// Re-diffs allowed after losing a push race before the cycle fails
    pub conflict_retry_budget: u32,

    pub retry: RetryConfig,
    pub storage: StorageConfig,
    pub watch: WatchConfig,
    pub logging: LoggingConfig,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            device_id: None,
            poll_interval_secs: 30,
            max_concurrency: 4,
            conflict_retry_budget: 3,
            retry: RetryConfig::default(),
            storage: StorageConfig::default(),
            watch: WatchConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

/// Upload retry settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay_ms: 200,
            max_delay_ms: 30_000,
            multiplier: 2.0,
        }
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        RetryPolicy {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
        }
    }
}

impl SyncConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::from(&self.retry)
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<(), SyncError> {
        if self.poll_interval_secs == 0 {
            return Err(SyncError::ConfigError("poll_interval_secs must be at least 1".to_string()));
        }
        if self.max_concurrency == 0 {
            return Err(SyncError::ConfigError("max_concurrency must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SyncError::ConfigError("retry.max_attempts must be at least 1".to_string()));
        }
        if !(self.retry.multiplier >= 1.0) {
            return Err(SyncError::ConfigError(format!(
                "retry.multiplier must be >= 1.0, got {}",
                self.retry.multiplier
            )));
        }
        if self.retry.initial_delay_ms > self.retry.max_delay_ms {
            return Err(SyncError::ConfigError(
                "retry.initial_delay_ms exceeds retry.max_delay_ms".to_string(),
            ));
        }
        if let Some(id) = &self.device_id {
            if id.trim().is_empty() || id.contains('/') {
                return Err(SyncError::ConfigError(format!("invalid device_id {:?}", id)));
            }
        }
        Ok(())
    }

    /// Configured device id, or `<host>-<8 hex of workspace path>`
    pub fn device_id_for(&self, workspace_root: &Path) -> String {
        if let Some(id) = &self.device_id {
            return id.clone();
        }
        let host = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .ok()
            .filter(|h| !h.is_empty() && !h.contains('/'))
            .unwrap_or_else(|| "device".to_string());
        let canonical = dunce::canonicalize(workspace_root).unwrap_or_else(|_| workspace_root.to_path_buf());
        let digest = blake3::hash(canonical.to_string_lossy().as_bytes());
        format!("{}-{}", host, &digest.to_hex()[..8])
    }

    /// Render as TOML, for writing a starter workspace config
    pub fn to_toml(&self) -> Result<String, SyncError> {
        toml::to_string_pretty(self).map_err(|e| SyncError::ConfigError(e.to_string()))
    }
}
