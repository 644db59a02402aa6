//! In-memory local files for tests and embedding.

use super::fs::mime_type_for;
use super::{FileStat, LocalFiles};
use crate::error::SyncError;
use crate::tree::hasher::content_hash;
use crate::tree::path::normalize_path;
use crate::tree::FileEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

#[derive(Debug, Clone)]
struct MemoryFile {
    bytes: Vec<u8>,
    modified_at: DateTime<Utc>,
}

/// A device's files held in a map, with write fault injection
#[derive(Default)]
pub struct MemoryFiles {
    files: RwLock<BTreeMap<String, MemoryFile>>,
    failing_writes: AtomicUsize,
}

impl MemoryFiles {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or replace a file as a user edit would, stamped now
    pub fn put(&self, path: &str, bytes: impl Into<Vec<u8>>) -> Result<(), SyncError> {
        self.put_at(path, bytes, Utc::now())
    }

    /// Create or replace a file with an explicit modification time
    pub fn put_at(
        &self,
        path: &str,
        bytes: impl Into<Vec<u8>>,
        modified_at: DateTime<Utc>,
    ) -> Result<(), SyncError> {
        let key = normalize_path(path)?;
        self.files.write().insert(
            key,
            MemoryFile {
                bytes: bytes.into(),
                modified_at,
            },
        );
        Ok(())
    }

    /// Delete a file as a user would
    pub fn delete(&self, path: &str) -> bool {
        match normalize_path(path) {
            Ok(key) => self.files.write().remove(&key).is_some(),
            Err(_) => false,
        }
    }

    pub fn contents(&self, path: &str) -> Option<Vec<u8>> {
        let key = normalize_path(path).ok()?;
        self.files.read().get(&key).map(|f| f.bytes.clone())
    }

    pub fn paths(&self) -> Vec<String> {
        self.files.read().keys().cloned().collect()
    }

    /// Make the next `count` writes fail
    pub fn fail_next_writes(&self, count: usize) {
        self.failing_writes.store(count, Ordering::SeqCst);
    }
}

#[async_trait]
impl LocalFiles for MemoryFiles {
    fn locate(&self, path: &str) -> PathBuf {
        PathBuf::from("memory").join(path)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, SyncError> {
        let key = normalize_path(path)?;
        self.files
            .read()
            .get(&key)
            .map(|f| f.bytes.clone())
            .ok_or_else(|| SyncError::NotFound(format!("local file {}", key)))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), SyncError> {
        let injected = self
            .failing_writes
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if injected {
            return Err(std::io::Error::other("injected write failure").into());
        }
        self.put(path, bytes.to_vec())
    }

    async fn remove(&self, path: &str) -> Result<bool, SyncError> {
        let key = normalize_path(path)?;
        Ok(self.files.write().remove(&key).is_some())
    }

    async fn stat(&self, path: &str) -> Result<Option<FileStat>, SyncError> {
        let key = normalize_path(path)?;
        Ok(self.files.read().get(&key).map(|f| FileStat {
            size: f.bytes.len() as u64,
            modified_at: f.modified_at,
        }))
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), SyncError> {
        let bytes = self.read(from).await?;
        self.write(to, &bytes).await
    }

    async fn scan(&self) -> Result<BTreeMap<String, FileEntry>, SyncError> {
        let files = self.files.read();
        Ok(files
            .iter()
            .map(|(path, file)| {
                let entry = FileEntry {
                    path: path.clone(),
                    content_hash: content_hash(&file.bytes),
                    size: file.bytes.len() as u64,
                    mime_type: mime_type_for(path).map(str::to_string),
                    modified_at: file.modified_at,
                    local_ref: Some(self.locate(path)),
                    remote_key: None,
                };
                (path.clone(), entry)
            })
            .collect())
    }
}
