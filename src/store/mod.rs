//! Collaborator Contracts
//!
//! Narrow async interfaces to tree persistence, the authoritative tree service and
//! the object store. The engine talks to these only; reference adapters live in
//! the submodules.

pub mod memory;
pub mod objects;
pub mod persistence;

use crate::diff::DiffResult;
use crate::error::SyncError;
use crate::tree::Tree;
use crate::types::{Digest, ObjectKey, RequestContext};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

/// Time-limited access to one stored object. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccessDescriptor {
    pub key: ObjectKey,
    pub url: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessDescriptor {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Acknowledgement of an accepted push
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushReceipt {
    pub version: u64,
    pub root_hash: Digest,
}

/// Persistence for device trees, keyed by an opaque tree key
#[async_trait]
pub trait TreeStore: Send + Sync {
    /// Load a tree; `NotFound` when nothing was saved under `key`
    async fn load_tree(&self, key: &str) -> Result<Tree, SyncError>;

    /// Save a tree if the stored version still equals `expected_version`
    ///
    /// A missing tree counts as version 0.
    async fn save_tree(&self, key: &str, tree: &Tree, expected_version: u64)
        -> Result<(), SyncError>;
}

/// The authoritative tree shared by all devices
#[async_trait]
pub trait AuthoritativeService: Send + Sync {
    async fn get_remote_tree(&self, ctx: &RequestContext) -> Result<Tree, SyncError>;

    /// Apply `diff` if the authoritative version still equals `expected_version`
    async fn push_diff(
        &self,
        ctx: &RequestContext,
        diff: &DiffResult,
        expected_version: u64,
    ) -> Result<PushReceipt, SyncError>;
}

/// Whole-object storage addressed by permanent keys
#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, key: &ObjectKey, bytes: Vec<u8>) -> Result<(), SyncError>;

    /// Fetch an object; `NotFound` when absent
    async fn get(&self, key: &ObjectKey) -> Result<Vec<u8>, SyncError>;

    /// Delete an object; deleting an absent object succeeds
    async fn delete(&self, key: &ObjectKey) -> Result<(), SyncError>;

    /// Issue a descriptor valid for `ttl`; `NotFound` when the object is gone
    async fn presign(&self, key: &ObjectKey, ttl: Duration) -> Result<AccessDescriptor, SyncError>;

    /// Every stored key, for garbage collection
    async fn list_keys(&self) -> Result<Vec<ObjectKey>, SyncError>;
}

/// Reject pushes that would reference content not yet stored
pub fn ensure_uploaded(diff: &DiffResult) -> Result<(), SyncError> {
    let unconfirmed = diff
        .added
        .iter()
        .chain(diff.modified.iter().map(|m| &m.entry))
        .find(|entry| entry.remote_key.is_none());
    match unconfirmed {
        Some(entry) => Err(SyncError::NotFound(format!(
            "remote key for pushed entry {}",
            entry.path
        ))),
        None => Ok(()),
    }
}

/// Apply a push to an authoritative tree under optimistic concurrency
pub(crate) fn apply_push(
    tree: &mut Tree,
    diff: &DiffResult,
    expected_version: u64,
) -> Result<PushReceipt, SyncError> {
    if tree.version() != expected_version {
        return Err(SyncError::VersionConflict {
            expected: expected_version,
            actual: tree.version(),
        });
    }
    ensure_uploaded(diff)?;
    tree.apply_diff(&diff.for_remote())?;
    Ok(PushReceipt {
        version: tree.version(),
        root_hash: tree.root_hash(),
    })
}
