//! Concurrent access safety for tree mutation and file transfers
//!
//! `SharedTree` gives readers cheap snapshots and serializes writers through
//! compare-and-swap on the tree version. `PathLockManager` serializes transfers
//! that touch the same path while letting disjoint paths proceed in parallel.

use crate::error::SyncError;
use crate::tree::Tree;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::debug;

/// Attempts before a contended update gives up
const MAX_CAS_ATTEMPTS: usize = 64;

/// Copy-on-write tree shared between the coordinator and the watch feed
pub struct SharedTree {
    current: RwLock<Arc<Tree>>,
}

impl SharedTree {
    pub fn new(tree: Tree) -> Self {
        Self {
            current: RwLock::new(Arc::new(tree)),
        }
    }

    /// Immutable view of the current tree
    pub fn snapshot(&self) -> Arc<Tree> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.current.read().version()
    }

    /// Apply `mutate` atomically
    ///
    /// The closure runs against a private copy; the copy is installed only if no
    /// other writer committed in between, otherwise the closure is re-run on the
    /// fresh tree. A closure that leaves the version unchanged installs nothing.
    pub fn update<F, R>(&self, mut mutate: F) -> Result<R, SyncError>
    where
        F: FnMut(&mut Tree) -> Result<R, SyncError>,
    {
        let mut attempted = self.version();
        for attempt in 1..=MAX_CAS_ATTEMPTS {
            let base = self.snapshot();
            attempted = base.version();
            let mut next = (*base).clone();
            let out = mutate(&mut next)?;
            if next.version() == base.version() {
                return Ok(out);
            }

            let mut current = self.current.write();
            if current.version() == base.version() {
                *current = Arc::new(next);
                return Ok(out);
            }
            debug!(attempt, expected = base.version(), actual = current.version(), "Tree CAS lost, retrying");
        }

        Err(SyncError::VersionConflict {
            expected: attempted,
            actual: self.version(),
        })
    }

    /// Install `tree` wholesale, keeping versions monotonic
    pub fn replace(&self, mut tree: Tree) {
        let mut current = self.current.write();
        if tree.version() <= current.version() {
            tree.set_version(current.version() + 1);
        }
        *current = Arc::new(tree);
    }
}

/// Per-path async lock manager
///
/// Locks are created lazily and shared; a guard held across an await point
/// blocks only other operations on the same path.
pub struct PathLockManager {
    locks: RwLock<HashMap<String, Arc<Mutex<()>>>>,
}

impl PathLockManager {
    pub fn new() -> Self {
        Self {
            locks: RwLock::new(HashMap::new()),
        }
    }

    fn get_path_lock(&self, path: &str) -> Arc<Mutex<()>> {
        {
            let map = self.locks.read();
            if let Some(lock) = map.get(path) {
                return lock.clone();
            }
        }

        // Double-check under the write lock
        let mut map = self.locks.write();
        map.entry(path.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Wait for exclusive access to `path`
    pub async fn lock(&self, path: &str) -> OwnedMutexGuard<()> {
        self.get_path_lock(path).lock_owned().await
    }

    /// Drop locks nobody holds or waits on
    pub fn prune(&self) {
        self.locks
            .write()
            .retain(|_, lock| Arc::strong_count(lock) > 1);
    }

    pub fn len(&self) -> usize {
        self.locks.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.read().is_empty()
    }
}

impl Default for PathLockManager {
    fn default() -> Self {
        Self::new()
    }
}
