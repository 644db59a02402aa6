//! Workspace scanning: walk the directory and hash every tracked file.

use super::fs::{mime_type_for, system_time_to_utc};
use super::ignore::IgnoreRules;
use crate::error::SyncError;
use crate::tree::hasher::ContentHasher;
use crate::tree::path::relative_key;
use crate::tree::{FileEntry, Tree};
use crate::types::{DeviceId, Digest};
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

const READ_CHUNK: usize = 64 * 1024;

/// Stream a file through SHA-256
pub fn hash_file(path: &Path) -> Result<(Digest, u64), SyncError> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = ContentHasher::new();
    let mut buffer = vec![0u8; READ_CHUNK];
    let mut size = 0u64;
    loop {
        let read = file.read(&mut buffer)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
        size += read as u64;
    }
    Ok((hasher.finalize(), size))
}

/// Hash every non-ignored regular file under `root`
///
/// Symlinks are not followed. Entries carry their local path and no remote key.
pub fn scan_entries(root: &Path, ignore: &IgnoreRules) -> Result<BTreeMap<String, FileEntry>, SyncError> {
    let mut entries = BTreeMap::new();
    let walker = WalkDir::new(root).follow_links(false).into_iter();

    for item in walker.filter_entry(|e| {
        e.depth() == 0
            || relative_key(root, e.path())
                .map(|key| !ignore.is_ignored(&key))
                .unwrap_or(false)
    }) {
        let item = match item {
            Ok(item) => item,
            Err(e) => {
                warn!(error = %e, "Skipping unreadable workspace entry");
                continue;
            }
        };
        if !item.file_type().is_file() {
            continue;
        }

        let key = relative_key(root, item.path())?;
        let (content_hash, size) = match hash_file(item.path()) {
            Ok(hashed) => hashed,
            Err(e) => {
                warn!(path = %key, error = %e, "Skipping file that could not be hashed");
                continue;
            }
        };
        let modified_at = system_time_to_utc(item.metadata().map_err(std::io::Error::from).and_then(|m| m.modified()));

        debug!(path = %key, hash = %content_hash.short(), "Scanned file");
        entries.insert(
            key.clone(),
            FileEntry {
                path: key.clone(),
                content_hash,
                size,
                mime_type: mime_type_for(&key).map(str::to_string),
                modified_at,
                local_ref: Some(item.path().to_path_buf()),
                remote_key: None,
            },
        );
    }

    info!(root = %root.display(), files = entries.len(), "Workspace scan complete");
    Ok(entries)
}

/// Fresh tree for `device_id` holding the scanned workspace
pub fn scan_tree(root: &Path, device_id: impl Into<DeviceId>, ignore: &IgnoreRules) -> Result<Tree, SyncError> {
    let mut tree = Tree::new(device_id);
    let entries = scan_entries(root, ignore)?;
    if !entries.is_empty() {
        tree.replace_entries(entries);
    }
    Ok(tree)
}
