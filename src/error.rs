//! Error types for the reconciliation engine and its collaborators.

use thiserror::Error;

/// Errors raised by persistence and object-store adapters
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Sled error: {0}")]
    SledError(#[from] sled::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid object key: {0}")]
    InvalidKey(String),
}

/// Engine-level error taxonomy
#[derive(Debug, Error)]
pub enum SyncError {
    /// Entry, tree or object absent. Often expected and treated as a no-op.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Optimistic-concurrency loss; the caller must re-diff
    #[error("Version conflict: expected version {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    /// Root hash mismatch or malformed tree; the tree must be rebuilt
    #[error("Corrupt tree for device '{device_id}': {reason}")]
    CorruptTree { device_id: String, reason: String },

    #[error("Upload failed for '{path}': {reason}")]
    UploadFailed { path: String, reason: String },

    #[error("Download failed for '{path}': {reason}")]
    DownloadFailed { path: String, reason: String },

    /// Upload confirmed for a path that was deleted or changed meanwhile
    #[error("Lost update for '{path}': entry removed or changed before confirmation")]
    LostUpdate { path: String },

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Unsupported tree schema version {found} (newest supported is {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Storage error: {0}")]
    StorageError(#[from] StorageError),
}

impl SyncError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, SyncError::NotFound(_))
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, SyncError::VersionConflict { .. })
    }

    /// Per-file transfer failures worth another attempt
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SyncError::UploadFailed { .. }
                | SyncError::DownloadFailed { .. }
                | SyncError::StorageError(StorageError::IoError(_))
        )
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::StorageError(StorageError::IoError(err))
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::StorageError(StorageError::SerializationError(err.to_string()))
    }
}

impl From<sled::Error> for SyncError {
    fn from(err: sled::Error) -> Self {
        SyncError::StorageError(StorageError::SledError(err))
    }
}
