//! Device File Tree
//!
//! The versioned, hashable representation of one device's known file set. The
//! root hash is a pure function of the `(path, content hash)` pairs, so two
//! devices holding the same files agree on it regardless of insertion order.

pub mod hasher;
pub mod node;
pub mod path;
pub mod wire;

use crate::diff::DiffResult;
use crate::error::SyncError;
use crate::types::{DeviceId, Digest, ObjectKey};
use chrono::{DateTime, Utc};
use node::DirectoryNode;
use path::normalize_path;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// One tracked file on one device tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    /// Normalized relative path; unique key within a tree
    pub path: String,
    /// SHA-256 of the file bytes
    pub content_hash: Digest,
    pub size: u64,
    pub mime_type: Option<String>,
    pub modified_at: DateTime<Utc>,
    /// Local filesystem location; absent until the file is materialized here
    pub local_ref: Option<PathBuf>,
    /// Permanent storage key; absent until the upload is confirmed
    pub remote_key: Option<ObjectKey>,
}

impl FileEntry {
    pub fn is_uploaded(&self) -> bool {
        self.remote_key.is_some()
    }

    /// Copy suitable for the authoritative side (no device-local fields)
    pub fn for_remote(&self) -> FileEntry {
        FileEntry {
            local_ref: None,
            ..self.clone()
        }
    }
}

/// Descriptive metadata supplied with an upsert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    pub size: u64,
    pub mime_type: Option<String>,
    pub modified_at: DateTime<Utc>,
    pub local_ref: Option<PathBuf>,
}

impl EntryMetadata {
    pub fn new(size: u64, modified_at: DateTime<Utc>) -> Self {
        Self {
            size,
            mime_type: None,
            modified_at,
            local_ref: None,
        }
    }

    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    pub fn with_local_ref(mut self, local_ref: PathBuf) -> Self {
        self.local_ref = Some(local_ref);
        self
    }
}

/// Versioned tree of file entries for one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tree {
    device_id: DeviceId,
    entries: BTreeMap<String, FileEntry>,
    root_hash: Digest,
    version: u64,
}

impl Tree {
    /// Create an empty tree at version 0
    pub fn new(device_id: impl Into<DeviceId>) -> Self {
        Tree {
            device_id: device_id.into(),
            entries: BTreeMap::new(),
            root_hash: hasher::empty_root(),
            version: 0,
        }
    }

    /// Assemble a tree from already-normalized entries, recomputing the root
    pub(crate) fn from_parts(
        device_id: DeviceId,
        entries: BTreeMap<String, FileEntry>,
        version: u64,
    ) -> Self {
        let root_hash = DirectoryNode::build(&entries).hash;
        Tree {
            device_id,
            entries,
            root_hash,
            version,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn root_hash(&self) -> Digest {
        self.root_hash
    }

    pub fn entries(&self) -> &BTreeMap<String, FileEntry> {
        &self.entries
    }

    pub fn get(&self, path: &str) -> Option<&FileEntry> {
        match normalize_path(path) {
            Ok(key) => self.entries.get(&key),
            Err(_) => None,
        }
    }

    pub fn contains(&self, path: &str) -> bool {
        self.get(path).is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Entries whose content matches `hash`
    pub fn entries_with_hash<'a>(
        &'a self,
        hash: &'a Digest,
    ) -> impl Iterator<Item = &'a FileEntry> + 'a {
        self.entries
            .values()
            .filter(move |entry| entry.content_hash == *hash)
    }

    /// Any confirmed storage key already holding `hash`
    pub fn remote_key_for(&self, hash: &Digest) -> Option<&ObjectKey> {
        self.entries
            .values()
            .filter(|entry| entry.content_hash == *hash)
            .find_map(|entry| entry.remote_key.as_ref())
    }

    /// Derived node hierarchy
    pub fn node_view(&self) -> DirectoryNode {
        DirectoryNode::build(&self.entries)
    }

    /// Recompute the root hash from entries alone
    pub fn compute_root_hash(&self) -> Digest {
        DirectoryNode::build(&self.entries).hash
    }

    /// Insert or replace the entry at `path`
    ///
    /// A content change resets upload state. Upserting the same content keeps the
    /// confirmed key since the stored object is unchanged.
    pub fn upsert(
        &mut self,
        path: &str,
        content_hash: Digest,
        metadata: EntryMetadata,
    ) -> Result<&FileEntry, SyncError> {
        let key = normalize_path(path)?;
        let remote_key = match self.entries.get(&key) {
            Some(existing) if existing.content_hash == content_hash => existing.remote_key.clone(),
            _ => None,
        };

        let entry = FileEntry {
            path: key.clone(),
            content_hash,
            size: metadata.size,
            mime_type: metadata.mime_type,
            modified_at: metadata.modified_at,
            local_ref: metadata.local_ref,
            remote_key,
        };
        self.entries.insert(key.clone(), entry);
        self.commit();
        Ok(&self.entries[&key])
    }

    /// Insert a complete entry as-is (including its remote key)
    ///
    /// Used when materializing a pulled entry whose upload state is already known.
    pub fn put_entry(&mut self, mut entry: FileEntry) -> Result<(), SyncError> {
        let key = normalize_path(&entry.path)?;
        entry.path = key.clone();
        self.entries.insert(key, entry);
        self.commit();
        Ok(())
    }

    /// Remove the entry at `path`
    ///
    /// Returns `false` without touching the version when the path is absent.
    pub fn remove(&mut self, path: &str) -> bool {
        let Ok(key) = normalize_path(path) else {
            return false;
        };
        if self.entries.remove(&key).is_some() {
            self.commit();
            true
        } else {
            false
        }
    }

    /// Record a confirmed upload for `path`
    pub fn set_remote_key(&mut self, path: &str, key: ObjectKey) -> Result<(), SyncError> {
        let normalized = normalize_path(path)?;
        let entry = self
            .entries
            .get_mut(&normalized)
            .ok_or_else(|| SyncError::NotFound(format!("tree entry {}", normalized)))?;
        entry.remote_key = Some(key);
        self.commit();
        Ok(())
    }

    /// Apply a diff as a single committed mutation
    ///
    /// Every path is normalized before any entry changes, so a diff with an
    /// invalid path leaves the tree untouched. Removals only take effect when
    /// the current entry still carries the removed content hash; a newer
    /// modification is never deleted by a stale removal. Returns `true` when
    /// the diff was non-empty.
    pub fn apply_diff(&mut self, diff: &DiffResult) -> Result<bool, SyncError> {
        if diff.is_empty() {
            return Ok(false);
        }

        let mut upserts = Vec::with_capacity(diff.added.len() + diff.modified.len());
        for entry in diff.added.iter().chain(diff.modified.iter().map(|m| &m.entry)) {
            let key = normalize_path(&entry.path)?;
            upserts.push(FileEntry { path: key, ..entry.clone() });
        }
        let removals = diff
            .removed
            .iter()
            .map(|removal| Ok((normalize_path(&removal.path)?, removal.content_hash)))
            .collect::<Result<Vec<_>, SyncError>>()?;

        for entry in upserts {
            self.entries.insert(entry.path.clone(), entry);
        }
        for (key, content_hash) in removals {
            let matches = self
                .entries
                .get(&key)
                .map(|current| current.content_hash == content_hash)
                .unwrap_or(false);
            if matches {
                self.entries.remove(&key);
            }
        }

        self.commit();
        Ok(true)
    }

    /// Replace the entry set wholesale, as one committed mutation
    pub fn replace_entries(&mut self, entries: BTreeMap<String, FileEntry>) {
        self.entries = entries;
        self.commit();
    }

    /// Copy of this tree under another device id, same version and entries
    pub fn with_device_id(&self, device_id: impl Into<DeviceId>) -> Tree {
        Tree {
            device_id: device_id.into(),
            ..self.clone()
        }
    }

    pub(crate) fn set_version(&mut self, version: u64) {
        self.version = version;
    }

    /// Serialize to the JSON wire format
    pub fn serialize(&self) -> Result<Vec<u8>, SyncError> {
        wire::encode(self)
    }

    /// Deserialize from the JSON wire format, verifying the root hash
    pub fn deserialize(bytes: &[u8]) -> Result<Tree, SyncError> {
        wire::decode(bytes)
    }

    fn commit(&mut self) {
        self.root_hash = DirectoryNode::build(&self.entries).hash;
        self.version += 1;
    }
}
