//! Per-path transfer operations run on the pool.
//!
//! Every operation re-checks the local tree and the file on disk under the
//! path lock before touching anything, so a local edit that raced with the
//! plan is never overwritten or deleted.

use super::conflict::{Download, LocalCopy, LocalDeletion};
use crate::concurrency::{PathLockManager, SharedTree};
use crate::error::SyncError;
use crate::keys::ObjectKeyResolver;
use crate::pending::{MarkOutcome, PendingUploadTracker};
use crate::store::ObjectStore;
use crate::tree::hasher::content_hash;
use crate::tree::FileEntry;
use crate::types::{Digest, ObjectKey};
use crate::workspace::LocalFiles;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, info};

/// Shared handles the transfer jobs need
#[derive(Clone)]
pub(crate) struct Transfers {
    pub files: Arc<dyn LocalFiles>,
    pub objects: Arc<dyn ObjectStore>,
    pub keys: Arc<ObjectKeyResolver>,
    pub local: Arc<SharedTree>,
    pub tracker: Arc<Mutex<PendingUploadTracker>>,
    pub locks: Arc<PathLockManager>,
}

pub(crate) enum InboundOp {
    Download(Download),
    Delete(LocalDeletion),
}

impl InboundOp {
    pub fn path(&self) -> &str {
        match self {
            InboundOp::Download(d) => &d.entry.path,
            InboundOp::Delete(d) => &d.path,
        }
    }
}

pub(crate) enum InboundResult {
    Downloaded,
    AlreadyPresent,
    Deleted,
    /// The path changed locally after planning; left for the next cycle
    Deferred(&'static str),
    Failed(SyncError),
}

/// Outcome of uploading one distinct content
pub(crate) struct UploadResult {
    pub hash: Digest,
    pub result: Result<ObjectKey, SyncError>,
}

impl Transfers {
    fn local_hash(&self, path: &str) -> Option<Digest> {
        self.local.snapshot().get(path).map(|e| e.content_hash)
    }

    /// Hash of the file currently on disk, `None` when absent
    async fn disk_hash(&self, path: &str) -> Result<Option<Digest>, SyncError> {
        match self.files.read(path).await {
            Ok(bytes) => Ok(Some(content_hash(&bytes))),
            Err(e) if e.is_not_found() => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Mark `path` as awaiting upload, adopting a stored key when the content is known
    pub fn queue_upload(&self, path: &str, hash: Digest) -> Result<bool, SyncError> {
        let outcome = self.tracker.lock().mark_pending(path, hash);
        match outcome {
            MarkOutcome::Queued => Ok(false),
            MarkOutcome::Reused(key) => {
                self.local.update(|tree| match tree.get(path) {
                    Some(entry) if entry.content_hash == hash && entry.remote_key.is_none() => {
                        tree.set_remote_key(path, key.clone())
                    }
                    _ => Ok(()),
                })?;
                Ok(true)
            }
        }
    }

    /// Preserve local content at a conflict-copy path
    pub async fn copy_local(&self, copy: &LocalCopy) -> Result<(), SyncError> {
        let _from = self.locks.lock(&copy.from).await;
        let _to = self.locks.lock(&copy.entry.path).await;

        if self.disk_hash(&copy.from).await? != Some(copy.entry.content_hash) {
            return Err(SyncError::LostUpdate {
                path: copy.from.clone(),
            });
        }
        self.files.copy(&copy.from, &copy.entry.path).await?;

        let entry = FileEntry {
            local_ref: Some(self.files.locate(&copy.entry.path)),
            ..copy.entry.clone()
        };
        let hash = entry.content_hash;
        let uploaded = entry.remote_key.clone();
        self.local.update(|tree| tree.put_entry(entry.clone()))?;
        match uploaded {
            Some(key) => self.tracker.lock().learn_key(hash, key),
            None => {
                self.queue_upload(&copy.entry.path, hash)?;
            }
        }
        info!(from = %copy.from, to = %copy.entry.path, "Preserved conflicting local content");
        Ok(())
    }

    pub async fn inbound(self, op: InboundOp) -> InboundResult {
        let result = match &op {
            InboundOp::Download(download) => self.download(download).await,
            InboundOp::Delete(deletion) => self.delete(deletion).await,
        };
        result.unwrap_or_else(InboundResult::Failed)
    }

    async fn download(&self, download: &Download) -> Result<InboundResult, SyncError> {
        let entry = &download.entry;
        let path = entry.path.as_str();
        let _guard = self.locks.lock(path).await;

        let current = self.local_hash(path);
        if current == Some(entry.content_hash) {
            if let Some(key) = &entry.remote_key {
                self.adopt_key(path, entry.content_hash, key)?;
            }
            return Ok(InboundResult::AlreadyPresent);
        }
        if current != download.expected_local {
            return Ok(InboundResult::Deferred("entry changed since planning"));
        }
        if self.disk_hash(path).await? != download.expected_local {
            return Ok(InboundResult::Deferred("file on disk has unrecorded edits"));
        }

        let failed = |reason: String| SyncError::DownloadFailed {
            path: path.to_string(),
            reason,
        };
        let key = entry
            .remote_key
            .clone()
            .ok_or_else(|| failed("entry has no remote key".to_string()))?;
        let bytes = self
            .objects
            .get(&key)
            .await
            .map_err(|e| failed(e.to_string()))?;
        let actual = content_hash(&bytes);
        if actual != entry.content_hash {
            return Err(failed(format!(
                "content hash mismatch: expected {}, got {}",
                entry.content_hash.short(),
                actual.short()
            )));
        }
        self.files
            .write(path, &bytes)
            .await
            .map_err(|e| failed(e.to_string()))?;

        // Committed only after the write is durable
        let committed = FileEntry {
            local_ref: Some(self.files.locate(path)),
            ..entry.clone()
        };
        self.local.update(|tree| tree.put_entry(committed.clone()))?;
        {
            let mut tracker = self.tracker.lock();
            tracker.forget(path);
            tracker.learn_key(entry.content_hash, key.clone());
        }
        debug!(path, key = %key, size = bytes.len(), "Downloaded");
        Ok(InboundResult::Downloaded)
    }

    async fn delete(&self, deletion: &LocalDeletion) -> Result<InboundResult, SyncError> {
        let path = deletion.path.as_str();
        let _guard = self.locks.lock(path).await;

        match self.local_hash(path) {
            Some(hash) if hash != deletion.content_hash => {
                return Ok(InboundResult::Deferred("entry changed since planning"))
            }
            _ => {}
        }
        match self.disk_hash(path).await? {
            Some(hash) if hash != deletion.content_hash => {
                return Ok(InboundResult::Deferred("file on disk has unrecorded edits"))
            }
            _ => {}
        }

        self.files.remove(path).await?;
        self.local.update(|tree| Ok(tree.remove(path)))?;
        self.tracker.lock().forget(path);
        debug!(path, "Deleted locally");
        Ok(InboundResult::Deleted)
    }

    /// Record a key for a path whose content is already in place
    pub fn adopt_key(&self, path: &str, hash: Digest, key: &ObjectKey) -> Result<(), SyncError> {
        self.local.update(|tree| match tree.get(path) {
            Some(entry) if entry.content_hash == hash && entry.remote_key.is_none() => {
                tree.set_remote_key(path, key.clone())
            }
            _ => Ok(()),
        })?;
        let mut tracker = self.tracker.lock();
        if tracker.get(path).is_some_and(|p| p.content_hash == hash) {
            tracker.resolve(path, key.clone());
        } else {
            tracker.learn_key(hash, key.clone());
        }
        Ok(())
    }

    /// Upload one content, reading it from any path that still holds it
    pub async fn upload(self, hash: Digest, paths: Vec<String>) -> UploadResult {
        for path in &paths {
            let bytes = match self.files.read(path).await {
                Ok(bytes) => bytes,
                Err(_) => continue,
            };
            if content_hash(&bytes) != hash {
                continue;
            }
            let key = self.keys.permanent_key_for(&hash, path);
            let size = bytes.len();
            let result = match self.objects.put(&key, bytes).await {
                Ok(()) => {
                    debug!(path, key = %key, size, "Uploaded");
                    Ok(key)
                }
                Err(e) => Err(SyncError::UploadFailed {
                    path: path.clone(),
                    reason: e.to_string(),
                }),
            };
            return UploadResult { hash, result };
        }

        UploadResult {
            hash,
            result: Err(SyncError::UploadFailed {
                path: paths.first().cloned().unwrap_or_default(),
                reason: "content no longer present locally".to_string(),
            }),
        }
    }
}
