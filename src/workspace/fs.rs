//! Filesystem-backed local files on tokio::fs.

use super::ignore::{IgnoreRules, TEMP_FILE_MARKER};
use super::scan::scan_entries;
use super::{FileStat, LocalFiles};
use crate::error::SyncError;
use crate::tree::path::normalize_path;
use crate::tree::FileEntry;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::AsyncWriteExt;
use tracing::debug;

static TEMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Write `bytes` to `target` through a synced sibling temp file and a rename
///
/// Readers observe either the old file or the complete new one.
pub async fn write_atomic(target: &Path, bytes: &[u8]) -> Result<(), SyncError> {
    let parent = target
        .parent()
        .ok_or_else(|| SyncError::InvalidPath(format!("{} has no parent", target.display())))?;
    tokio::fs::create_dir_all(parent).await?;

    let file_name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = parent.join(format!(
        ".{}{}{}-{}",
        file_name,
        TEMP_FILE_MARKER,
        std::process::id(),
        TEMP_COUNTER.fetch_add(1, Ordering::Relaxed)
    ));

    let result = async {
        let mut file = tokio::fs::File::create(&temp).await?;
        file.write_all(bytes).await?;
        file.sync_all().await?;
        drop(file);
        tokio::fs::rename(&temp, target).await
    }
    .await;

    if let Err(e) = result {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Best-effort MIME type from the file extension
pub fn mime_type_for(path: &str) -> Option<&'static str> {
    let ext = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match ext.as_str() {
        "txt" | "log" => "text/plain",
        "md" => "text/markdown",
        "html" | "htm" => "text/html",
        "css" => "text/css",
        "csv" => "text/csv",
        "json" => "application/json",
        "toml" => "application/toml",
        "xml" => "application/xml",
        "pdf" => "application/pdf",
        "zip" => "application/zip",
        "gz" => "application/gzip",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "mp3" => "audio/mpeg",
        "mp4" => "video/mp4",
        _ => return None,
    };
    Some(mime)
}

pub(crate) fn system_time_to_utc(time: std::io::Result<std::time::SystemTime>) -> DateTime<Utc> {
    time.map(DateTime::<Utc>::from).unwrap_or_else(|_| Utc::now())
}

/// Local files rooted at a workspace directory
pub struct WorkspaceFs {
    root: PathBuf,
    ignore: IgnoreRules,
}

impl WorkspaceFs {
    pub fn new(root: impl Into<PathBuf>, ignore: IgnoreRules) -> Self {
        Self {
            root: root.into(),
            ignore,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn ignore_rules(&self) -> &IgnoreRules {
        &self.ignore
    }

    fn resolve(&self, path: &str) -> Result<PathBuf, SyncError> {
        let key = normalize_path(path)?;
        Ok(self.root.join(key))
    }
}

fn not_found(path: &str) -> impl FnOnce(std::io::Error) -> SyncError + '_ {
    move |e| {
        if e.kind() == ErrorKind::NotFound {
            SyncError::NotFound(format!("local file {}", path))
        } else {
            e.into()
        }
    }
}

#[async_trait]
impl LocalFiles for WorkspaceFs {
    fn locate(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    async fn read(&self, path: &str) -> Result<Vec<u8>, SyncError> {
        let full = self.resolve(path)?;
        tokio::fs::read(&full).await.map_err(not_found(path))
    }

    async fn write(&self, path: &str, bytes: &[u8]) -> Result<(), SyncError> {
        let full = self.resolve(path)?;
        write_atomic(&full, bytes).await?;
        debug!(path, size = bytes.len(), "Wrote local file");
        Ok(())
    }

    async fn remove(&self, path: &str) -> Result<bool, SyncError> {
        let full = self.resolve(path)?;
        match tokio::fs::remove_file(&full).await {
            Ok(()) => {
                debug!(path, "Removed local file");
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn stat(&self, path: &str) -> Result<Option<FileStat>, SyncError> {
        let full = self.resolve(path)?;
        match tokio::fs::metadata(&full).await {
            Ok(meta) if meta.is_file() => Ok(Some(FileStat {
                size: meta.len(),
                modified_at: system_time_to_utc(meta.modified()),
            })),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn copy(&self, from: &str, to: &str) -> Result<(), SyncError> {
        let bytes = self.read(from).await?;
        self.write(to, &bytes).await
    }

    async fn scan(&self) -> Result<BTreeMap<String, FileEntry>, SyncError> {
        let root = self.root.clone();
        let ignore = self.ignore.clone();
        tokio::task::spawn_blocking(move || scan_entries(&root, &ignore))
            .await
            .map_err(|e| SyncError::from(std::io::Error::other(format!("scan task failed: {}", e))))?
    }
}
