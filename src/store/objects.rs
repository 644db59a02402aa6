//! Directory-backed object store
//!
//! Objects live at `<root>/<key>`. Access descriptors are `file://` URLs carrying
//! an expiry and a keyed BLAKE3 signature, so a holder can be checked without
//! any stored state.

use super::{AccessDescriptor, ObjectStore};
use crate::error::{StorageError, SyncError};
use crate::tree::path::{normalize_path, relative_key};
use crate::types::ObjectKey;
use crate::workspace::fs::write_atomic;
use crate::workspace::ignore::TEMP_FILE_MARKER;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};
use walkdir::WalkDir;

const SIGNING_CONTEXT: &str = "hashsync 2024 fs object store descriptor signing";

pub struct FsObjectStore {
    root: PathBuf,
    signing_key: [u8; 32],
}

impl FsObjectStore {
    /// Store rooted at `root`, signing descriptors with a key derived from `secret`
    pub fn new(root: impl Into<PathBuf>, secret: &[u8]) -> Self {
        Self {
            root: root.into(),
            signing_key: blake3::derive_key(SIGNING_CONTEXT, secret),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn object_path(&self, key: &ObjectKey) -> Result<PathBuf, SyncError> {
        match normalize_path(key.as_str()) {
            Ok(normalized) if normalized == key.as_str() => Ok(self.root.join(normalized)),
            _ => Err(StorageError::InvalidKey(key.to_string()).into()),
        }
    }

    fn signature(&self, key: &ObjectKey, expires: i64) -> String {
        let mut hasher = blake3::Hasher::new_keyed(&self.signing_key);
        hasher.update(key.as_str().as_bytes());
        hasher.update(b"\0");
        hasher.update(&expires.to_le_bytes());
        hasher.finalize().to_hex().to_string()
    }

    /// Check a descriptor issued by this store; returns the object's path
    pub fn verify_descriptor(
        &self,
        descriptor: &AccessDescriptor,
        now: DateTime<Utc>,
    ) -> Result<PathBuf, SyncError> {
        if descriptor.is_expired(now) {
            return Err(SyncError::NotFound(format!(
                "descriptor for {} expired at {}",
                descriptor.key, descriptor.expires_at
            )));
        }
        let expected = self.signature(&descriptor.key, descriptor.expires_at.timestamp());
        let signed = descriptor
            .url
            .rsplit_once("sig=")
            .map(|(_, sig)| sig == expected)
            .unwrap_or(false);
        if !signed {
            return Err(StorageError::InvalidKey(format!("bad signature for {}", descriptor.key)).into());
        }
        self.object_path(&descriptor.key)
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, key: &ObjectKey, bytes: Vec<u8>) -> Result<(), SyncError> {
        let path = self.object_path(key)?;
        write_atomic(&path, &bytes).await?;
        debug!(key = %key, size = bytes.len(), "Stored object");
        Ok(())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Vec<u8>, SyncError> {
        let path = self.object_path(key)?;
        tokio::fs::read(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                SyncError::NotFound(format!("object {}", key))
            } else {
                e.into()
            }
        })
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), SyncError> {
        let path = self.object_path(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                info!(key = %key, "Deleted object");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn presign(&self, key: &ObjectKey, ttl: Duration) -> Result<AccessDescriptor, SyncError> {
        let path = self.object_path(key)?;
        if !tokio::fs::try_exists(&path).await? {
            return Err(SyncError::NotFound(format!("object {}", key)));
        }

        let expires = (Utc::now() + chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::zero()))
            .timestamp();
        let expires_at = Utc
            .timestamp_opt(expires, 0)
            .single()
            .ok_or_else(|| SyncError::ConfigError(format!("ttl {:?} out of range", ttl)))?;
        let absolute = dunce::canonicalize(&path)?;
        let url = format!(
            "file://{}?expires={}&sig={}",
            absolute.to_string_lossy().replace('\\', "/"),
            expires,
            self.signature(key, expires)
        );
        Ok(AccessDescriptor {
            key: key.clone(),
            url,
            expires_at,
        })
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>, SyncError> {
        let root = self.root.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<ObjectKey>, SyncError> {
            if !root.exists() {
                return Ok(Vec::new());
            }
            let mut keys = Vec::new();
            for item in WalkDir::new(&root).follow_links(false) {
                let item = item.map_err(std::io::Error::from)?;
                if !item.file_type().is_file() {
                    continue;
                }
                let key = relative_key(&root, item.path())?;
                if key.contains(TEMP_FILE_MARKER) {
                    continue;
                }
                keys.push(ObjectKey::new(key));
            }
            keys.sort();
            Ok(keys)
        })
        .await
        .map_err(|e| SyncError::from(std::io::Error::other(format!("listing task failed: {}", e))))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> FsObjectStore {
        FsObjectStore::new(dir.path().join("objects"), b"test-secret")
    }

    #[tokio::test]
    async fn test_put_get_delete() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = ObjectKey::new("objects/sha256/ab/abcd");

        store.put(&key, b"payload".to_vec()).await.unwrap();
        assert_eq!(store.get(&key).await.unwrap(), b"payload".to_vec());
        assert_eq!(store.list_keys().await.unwrap(), vec![key.clone()]);

        store.delete(&key).await.unwrap();
        store.delete(&key).await.unwrap();
        assert!(store.get(&key).await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_invalid_keys_are_rejected() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        for bad in ["../escape", "/abs/key", "a//b"] {
            let err = store.put(&ObjectKey::new(bad), vec![1]).await.unwrap_err();
            assert!(matches!(err, SyncError::StorageError(StorageError::InvalidKey(_))), "{}", bad);
        }
    }

    #[tokio::test]
    async fn test_descriptor_round_trip_and_expiry() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let key = ObjectKey::new("k/1");
        assert!(store.presign(&key, Duration::from_secs(60)).await.unwrap_err().is_not_found());

        store.put(&key, b"1".to_vec()).await.unwrap();
        let descriptor = store.presign(&key, Duration::from_secs(60)).await.unwrap();
        assert!(descriptor.url.starts_with("file://"));

        let path = store.verify_descriptor(&descriptor, Utc::now()).unwrap();
        assert_eq!(std::fs::read(path).unwrap(), b"1".to_vec());

        let later = Utc::now() + chrono::Duration::seconds(120);
        assert!(store.verify_descriptor(&descriptor, later).is_err());

        let forged = AccessDescriptor {
            url: descriptor.url.replace("sig=", "sig=00"),
            ..descriptor.clone()
        };
        assert!(store.verify_descriptor(&forged, Utc::now()).is_err());
    }

    #[tokio::test]
    async fn test_list_keys_on_missing_root() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).list_keys().await.unwrap().is_empty());
    }
}
