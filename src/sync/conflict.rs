//! Pairing inbound and outbound changes into one reconciliation plan.
//!
//! Paths changed on only one side flow in that direction. Paths changed on both
//! sides are resolved by last-writer-wins on `modified_at`, with the larger
//! content hash breaking ties, and the losing content is kept under a
//! conflict-copy path. Every device computes the same winner and the same copy
//! name for the same pair of versions.

use super::report::{ConflictRecord, Winner};
use crate::diff::{DiffResult, Removal};
use crate::tree::path::conflict_copy_path;
use crate::tree::{FileEntry, Tree};
use crate::types::Digest;
use std::collections::BTreeMap;

/// Materialize a remote entry locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Download {
    pub entry: FileEntry,
    /// Local content hash the plan was made against; `None` means absent
    pub expected_local: Option<Digest>,
}

/// Delete a local file removed upstream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalDeletion {
    pub path: String,
    /// Only delete while the local entry still holds this content
    pub content_hash: Digest,
}

/// Preserve local content under a conflict-copy path before it is overwritten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalCopy {
    pub from: String,
    /// The losing entry, re-keyed to the copy path
    pub entry: FileEntry,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub local_copies: Vec<LocalCopy>,
    pub downloads: Vec<Download>,
    pub deletions: Vec<LocalDeletion>,
    /// Local paths whose current entry should be published
    pub push_paths: Vec<String>,
    /// Remote removals, keyed by the content they remove
    pub push_removals: Vec<Removal>,
    pub conflicts: Vec<ConflictRecord>,
    /// Paths both sides changed identically
    pub converged: Vec<String>,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.local_copies.is_empty()
            && self.downloads.is_empty()
            && self.deletions.is_empty()
            && self.push_paths.is_empty()
            && self.push_removals.is_empty()
            && self.converged.is_empty()
    }

    pub fn has_conflicts(&self) -> bool {
        !self.conflicts.is_empty()
    }
}

#[derive(Clone, Copy)]
enum Change<'a> {
    Upsert(&'a FileEntry),
    Remove(&'a Removal),
}

fn changes(diff: &DiffResult) -> BTreeMap<&str, Change<'_>> {
    let mut map = BTreeMap::new();
    for entry in &diff.added {
        map.insert(entry.path.as_str(), Change::Upsert(entry));
    }
    for modification in &diff.modified {
        map.insert(modification.path.as_str(), Change::Upsert(&modification.entry));
    }
    for removal in &diff.removed {
        map.insert(removal.path.as_str(), Change::Remove(removal));
    }
    map
}

/// Whether `local` beats `remote` under last-writer-wins
pub fn local_wins(local: &FileEntry, remote: &FileEntry) -> bool {
    (local.modified_at, local.content_hash) > (remote.modified_at, remote.content_hash)
}

fn renamed(entry: &FileEntry, path: String) -> FileEntry {
    FileEntry {
        path,
        local_ref: None,
        ..entry.clone()
    }
}

/// Build the plan for one cycle
///
/// `inbound` is base→remote, `outbound` is base→local; `local` is the snapshot
/// the outbound diff was taken from.
pub fn reconcile(inbound: &DiffResult, outbound: &DiffResult, local: &Tree) -> ReconcilePlan {
    let incoming = changes(inbound);
    let outgoing = changes(outbound);
    let mut paths: Vec<&str> = incoming.keys().chain(outgoing.keys()).copied().collect();
    paths.sort_unstable();
    paths.dedup();

    let local_hash = |path: &str| local.get(path).map(|e| e.content_hash);
    let mut plan = ReconcilePlan::default();

    for path in paths {
        match (incoming.get(path).copied(), outgoing.get(path).copied()) {
            (Some(Change::Upsert(remote)), None) => plan.downloads.push(Download {
                entry: remote.clone(),
                expected_local: local_hash(path),
            }),
            (Some(Change::Remove(removal)), None) => plan.deletions.push(LocalDeletion {
                path: path.to_string(),
                content_hash: removal.content_hash,
            }),
            (None, Some(Change::Upsert(_))) => plan.push_paths.push(path.to_string()),
            (None, Some(Change::Remove(removal))) => plan.push_removals.push(removal.clone()),
            (Some(Change::Upsert(remote)), Some(Change::Upsert(mine))) => {
                if remote.content_hash == mine.content_hash {
                    plan.converged.push(path.to_string());
                } else if local_wins(mine, remote) {
                    let copy = conflict_copy_path(path, &remote.content_hash.short());
                    plan.downloads.push(Download {
                        entry: renamed(remote, copy.clone()),
                        expected_local: local_hash(&copy),
                    });
                    plan.push_paths.push(path.to_string());
                    plan.push_paths.push(copy.clone());
                    plan.conflicts.push(ConflictRecord {
                        path: path.to_string(),
                        winner: Winner::Local,
                        copy_path: Some(copy),
                    });
                } else {
                    let copy = conflict_copy_path(path, &mine.content_hash.short());
                    plan.local_copies.push(LocalCopy {
                        from: path.to_string(),
                        entry: renamed(mine, copy.clone()),
                    });
                    plan.downloads.push(Download {
                        entry: remote.clone(),
                        expected_local: Some(mine.content_hash),
                    });
                    plan.push_paths.push(copy.clone());
                    plan.conflicts.push(ConflictRecord {
                        path: path.to_string(),
                        winner: Winner::Remote,
                        copy_path: Some(copy),
                    });
                }
            }
            (Some(Change::Remove(_)), Some(Change::Upsert(_))) => {
                plan.push_paths.push(path.to_string());
                plan.conflicts.push(ConflictRecord {
                    path: path.to_string(),
                    winner: Winner::Local,
                    copy_path: None,
                });
            }
            (Some(Change::Upsert(remote)), Some(Change::Remove(_))) => {
                plan.downloads.push(Download {
                    entry: remote.clone(),
                    expected_local: None,
                });
                plan.conflicts.push(ConflictRecord {
                    path: path.to_string(),
                    winner: Winner::Remote,
                    copy_path: None,
                });
            }
            (Some(Change::Remove(_)), Some(Change::Remove(_))) => {
                plan.converged.push(path.to_string())
            }
            (None, None) => {}
        }
    }

    plan.push_paths.sort();
    plan.push_paths.dedup();
    plan
}
