//! Tree wire format
//!
//! ```json
//! {
//!   "schemaVersion": 1,
//!   "deviceId": "laptop",
//!   "version": 7,
//!   "rootHash": "…",
//!   "entries": {
//!     "docs/a.txt": {
//!       "contentHash": "…",
//!       "size": 12,
//!       "mimeType": "text/plain",
//!       "modifiedAt": "2024-01-01T00:00:00Z",
//!       "remoteKey": "objects/sha256/ab/ab…"
//!     }
//!   }
//! }
//! ```
//!
//! The transmitted `rootHash` is never trusted: decoding recomputes it and
//! rejects any mismatch as a corrupt tree.

use crate::error::SyncError;
use crate::tree::path::normalize_path;
use crate::tree::{FileEntry, Tree};
use crate::types::{Digest, ObjectKey};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Newest schema this build reads and the one it writes
pub const TREE_SCHEMA_VERSION: u32 = 1;

/// Documents written before the schema field existed
fn legacy_schema_version() -> u32 {
    1
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TreeDocument {
    #[serde(default = "legacy_schema_version")]
    schema_version: u32,
    device_id: String,
    version: u64,
    root_hash: Digest,
    #[serde(default)]
    entries: BTreeMap<String, WireEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WireEntry {
    content_hash: Digest,
    size: u64,
    #[serde(default)]
    mime_type: Option<String>,
    modified_at: DateTime<Utc>,
    #[serde(default)]
    remote_key: Option<ObjectKey>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    local_ref: Option<PathBuf>,
}

impl From<&FileEntry> for WireEntry {
    fn from(entry: &FileEntry) -> Self {
        WireEntry {
            content_hash: entry.content_hash,
            size: entry.size,
            mime_type: entry.mime_type.clone(),
            modified_at: entry.modified_at,
            remote_key: entry.remote_key.clone(),
            local_ref: entry.local_ref.clone(),
        }
    }
}

fn document(tree: &Tree) -> TreeDocument {
    TreeDocument {
        schema_version: TREE_SCHEMA_VERSION,
        device_id: tree.device_id().to_string(),
        version: tree.version(),
        root_hash: tree.root_hash(),
        entries: tree
            .entries()
            .iter()
            .map(|(path, entry)| (path.clone(), WireEntry::from(entry)))
            .collect(),
    }
}

/// Encode a tree as compact JSON
pub fn encode(tree: &Tree) -> Result<Vec<u8>, SyncError> {
    Ok(serde_json::to_vec(&document(tree))?)
}

/// Encode a tree as indented JSON (CLI output, snapshots on disk)
pub fn encode_pretty(tree: &Tree) -> Result<Vec<u8>, SyncError> {
    Ok(serde_json::to_vec_pretty(&document(tree))?)
}

/// Decode a tree, recomputing and verifying its root hash
pub fn decode(bytes: &[u8]) -> Result<Tree, SyncError> {
    let doc: TreeDocument = serde_json::from_slice(bytes).map_err(|e| SyncError::CorruptTree {
        device_id: "<unknown>".to_string(),
        reason: format!("malformed tree document: {}", e),
    })?;

    if doc.schema_version > TREE_SCHEMA_VERSION {
        return Err(SyncError::UnsupportedSchema {
            found: doc.schema_version,
            supported: TREE_SCHEMA_VERSION,
        });
    }

    let mut entries = BTreeMap::new();
    for (raw_path, wire) in doc.entries {
        let path = normalize_path(&raw_path).map_err(|e| SyncError::CorruptTree {
            device_id: doc.device_id.clone(),
            reason: format!("bad entry path: {}", e),
        })?;
        if path != raw_path {
            return Err(SyncError::CorruptTree {
                device_id: doc.device_id.clone(),
                reason: format!("entry path {:?} is not normalized", raw_path),
            });
        }
        let entry = FileEntry {
            path: path.clone(),
            content_hash: wire.content_hash,
            size: wire.size,
            mime_type: wire.mime_type,
            modified_at: wire.modified_at,
            local_ref: wire.local_ref,
            remote_key: wire.remote_key,
        };
        entries.insert(path, entry);
    }

    let tree = Tree::from_parts(doc.device_id, entries, doc.version);
    if tree.root_hash() != doc.root_hash {
        return Err(SyncError::CorruptTree {
            device_id: tree.device_id().to_string(),
            reason: format!(
                "root hash mismatch: transmitted {}, recomputed {}",
                doc.root_hash.short(),
                tree.root_hash().short()
            ),
        });
    }
    Ok(tree)
}
