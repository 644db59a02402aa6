//! Tree Diffing
//!
//! Pure comparison of two trees into an add/modify/remove plan. Entries are
//! equal when their content hashes are equal; metadata drift never counts as a
//! change.

use crate::tree::{FileEntry, Tree};
use crate::types::Digest;
use std::cmp::Ordering;

/// A path whose content hash differs between base and target
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Modification {
    pub path: String,
    pub old_hash: Digest,
    pub new_hash: Digest,
    /// The target side's entry
    pub entry: FileEntry,
}

/// A path present in base but not in target
///
/// Carries the base content hash so deletions are keyed by content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Removal {
    pub path: String,
    pub content_hash: Digest,
}

/// Difference between a base tree and a target tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiffResult {
    pub added: Vec<FileEntry>,
    pub modified: Vec<Modification>,
    pub removed: Vec<Removal>,
}

impl DiffResult {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.modified.is_empty() && self.removed.is_empty()
    }

    pub fn len(&self) -> usize {
        self.added.len() + self.modified.len() + self.removed.len()
    }

    /// All paths touched by this diff, in path order
    pub fn changed_paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self
            .added
            .iter()
            .map(|e| e.path.as_str())
            .chain(self.modified.iter().map(|m| m.path.as_str()))
            .chain(self.removed.iter().map(|r| r.path.as_str()))
            .collect();
        paths.sort_unstable();
        paths
    }

    /// The same diff with device-local fields stripped from every entry
    pub fn for_remote(&self) -> DiffResult {
        DiffResult {
            added: self.added.iter().map(FileEntry::for_remote).collect(),
            modified: self
                .modified
                .iter()
                .map(|m| Modification {
                    entry: m.entry.for_remote(),
                    ..m.clone()
                })
                .collect(),
            removed: self.removed.clone(),
        }
    }
}

/// Compare `base` to `target`
///
/// Merge-walks both path-sorted entry maps:
/// - path only in target → added
/// - path only in base → removed
/// - path in both with different content hash → modified
pub fn diff(base: &Tree, target: &Tree) -> DiffResult {
    let mut result = DiffResult::default();
    let mut left = base.entries().iter().peekable();
    let mut right = target.entries().iter().peekable();

    loop {
        let ordering = match (left.peek(), right.peek()) {
            (None, None) => break,
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (Some((lp, _)), Some((rp, _))) => lp.cmp(rp),
        };

        match ordering {
            Ordering::Less => {
                if let Some((path, entry)) = left.next() {
                    result.removed.push(Removal {
                        path: path.clone(),
                        content_hash: entry.content_hash,
                    });
                }
            }
            Ordering::Greater => {
                if let Some((_, entry)) = right.next() {
                    result.added.push(entry.clone());
                }
            }
            Ordering::Equal => {
                if let (Some((path, old)), Some((_, new))) = (left.next(), right.next()) {
                    if old.content_hash != new.content_hash {
                        result.modified.push(Modification {
                            path: path.clone(),
                            old_hash: old.content_hash,
                            new_hash: new.content_hash,
                            entry: new.clone(),
                        });
                    }
                }
            }
        }
    }

    result
}

/// Paths whose content is equal but whose descriptive metadata differs
///
/// For callers that propagate metadata-only edits explicitly.
pub fn diff_metadata(base: &Tree, target: &Tree) -> Vec<String> {
    base.entries()
        .iter()
        .filter_map(|(path, old)| {
            let new = target.entries().get(path)?;
            let drifted = old.content_hash == new.content_hash
                && (old.size != new.size
                    || old.mime_type != new.mime_type
                    || old.modified_at != new.modified_at);
            drifted.then(|| path.clone())
        })
        .collect()
}
