//! In-memory collaborators
//!
//! Process-local implementations of the store contracts. Used by tests and by
//! embedders that host the authoritative tree in the same process.

use super::{apply_push, AccessDescriptor, AuthoritativeService, ObjectStore, PushReceipt, TreeStore};
use crate::diff::DiffResult;
use crate::error::SyncError;
use crate::tree::Tree;
use crate::types::{ObjectKey, RequestContext};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};

/// Device id used for the authoritative tree
pub const AUTHORITATIVE_DEVICE: &str = "authoritative";

/// Authoritative tree held in memory
pub struct MemoryAuthority {
    tree: RwLock<Tree>,
    pushes: AtomicUsize,
}

impl MemoryAuthority {
    pub fn new() -> Self {
        Self::with_tree(Tree::new(AUTHORITATIVE_DEVICE))
    }

    pub fn with_tree(tree: Tree) -> Self {
        Self {
            tree: RwLock::new(tree),
            pushes: AtomicUsize::new(0),
        }
    }

    /// Current authoritative tree
    pub fn snapshot(&self) -> Tree {
        self.tree.read().clone()
    }

    /// Number of accepted pushes
    pub fn push_count(&self) -> usize {
        self.pushes.load(Ordering::SeqCst)
    }
}

impl Default for MemoryAuthority {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthoritativeService for MemoryAuthority {
    async fn get_remote_tree(&self, ctx: &RequestContext) -> Result<Tree, SyncError> {
        let tree = self.tree.read().clone();
        debug!(
            device_id = %ctx.device_id,
            version = tree.version(),
            "Serving authoritative tree"
        );
        Ok(tree)
    }

    async fn push_diff(
        &self,
        ctx: &RequestContext,
        diff: &DiffResult,
        expected_version: u64,
    ) -> Result<PushReceipt, SyncError> {
        let mut tree = self.tree.write();
        let receipt = apply_push(&mut tree, diff, expected_version)?;
        self.pushes.fetch_add(1, Ordering::SeqCst);
        info!(
            device_id = %ctx.device_id,
            changes = diff.len(),
            version = receipt.version,
            "Accepted push"
        );
        Ok(receipt)
    }
}

/// Object store held in memory, with fault injection for tests
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: RwLock<HashMap<ObjectKey, Vec<u8>>>,
    puts: AtomicUsize,
    failing_puts: AtomicUsize,
    failing_gets: AtomicUsize,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful physical uploads
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    pub fn contains(&self, key: &ObjectKey) -> bool {
        self.objects.read().contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }

    /// Make the next `count` puts fail
    pub fn fail_next_puts(&self, count: usize) {
        self.failing_puts.store(count, Ordering::SeqCst);
    }

    /// Make the next `count` gets fail
    pub fn fail_next_gets(&self, count: usize) {
        self.failing_gets.store(count, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(&self, key: &ObjectKey, bytes: Vec<u8>) -> Result<(), SyncError> {
        if Self::take_failure(&self.failing_puts) {
            return Err(SyncError::UploadFailed {
                path: key.to_string(),
                reason: "injected put failure".to_string(),
            });
        }
        self.objects.write().insert(key.clone(), bytes);
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, key: &ObjectKey) -> Result<Vec<u8>, SyncError> {
        if Self::take_failure(&self.failing_gets) {
            return Err(SyncError::DownloadFailed {
                path: key.to_string(),
                reason: "injected get failure".to_string(),
            });
        }
        self.objects
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("object {}", key)))
    }

    async fn delete(&self, key: &ObjectKey) -> Result<(), SyncError> {
        self.objects.write().remove(key);
        Ok(())
    }

    async fn presign(&self, key: &ObjectKey, ttl: Duration) -> Result<AccessDescriptor, SyncError> {
        if !self.contains(key) {
            return Err(SyncError::NotFound(format!("object {}", key)));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|e| SyncError::ConfigError(format!("invalid ttl: {}", e)))?;
        let expires_at = Utc::now() + ttl;
        Ok(AccessDescriptor {
            key: key.clone(),
            url: format!("memory://{}?expires={}", key, expires_at.timestamp()),
            expires_at,
        })
    }

    async fn list_keys(&self) -> Result<Vec<ObjectKey>, SyncError> {
        let mut keys: Vec<ObjectKey> = self.objects.read().keys().cloned().collect();
        keys.sort();
        Ok(keys)
    }
}

/// Tree persistence held in memory
#[derive(Default)]
pub struct MemoryTreeStore {
    trees: RwLock<HashMap<String, Tree>>,
}

impl MemoryTreeStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TreeStore for MemoryTreeStore {
    async fn load_tree(&self, key: &str) -> Result<Tree, SyncError> {
        self.trees
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| SyncError::NotFound(format!("tree {}", key)))
    }

    async fn save_tree(
        &self,
        key: &str,
        tree: &Tree,
        expected_version: u64,
    ) -> Result<(), SyncError> {
        let mut trees = self.trees.write();
        let actual = trees.get(key).map(Tree::version).unwrap_or(0);
        if actual != expected_version {
            return Err(SyncError::VersionConflict {
                expected: expected_version,
                actual,
            });
        }
        trees.insert(key.to_string(), tree.clone());
        Ok(())
    }
}
