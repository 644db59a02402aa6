//! Workspace domain: local file access, scanning, ignore rules and the watch feed.

pub mod fs;
pub mod ignore;
pub mod memory;
pub mod scan;
pub mod watch;

pub use fs::WorkspaceFs;
pub use ignore::IgnoreRules;
pub use memory::MemoryFiles;
pub use watch::{ChangeEvent, WatchFeed};

use crate::error::SyncError;
use crate::tree::FileEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Size and modification time of a local file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: u64,
    pub modified_at: DateTime<Utc>,
}

/// Local file access addressed by normalized tree paths
#[async_trait]
pub trait LocalFiles: Send + Sync {
    /// Local location of `path`, recorded as the entry's local ref
    fn locate(&self, path: &str) -> PathBuf;

    /// File bytes; `NotFound` when absent
    async fn read(&self, path: &str) -> Result<Vec<u8>, SyncError>;

    /// Replace the file atomically; returns once the bytes are durable
    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), SyncError>;

    /// Delete the file; `false` when it was already gone
    async fn remove(&self, path: &str) -> Result<bool, SyncError>;

    async fn stat(&self, path: &str) -> Result<Option<FileStat>, SyncError>;

    /// Copy `from` to `to`, replacing `to` atomically
    async fn copy(&self, from: &str, to: &str) -> Result<(), SyncError>;

    /// Hash every tracked file into fresh entries (no remote keys)
    async fn scan(&self) -> Result<BTreeMap<String, FileEntry>, SyncError>;
}
