//! Sled-backed tree persistence and authoritative tree
//!
//! Trees are stored in their JSON wire form, so every load re-verifies the root
//! hash. Version checks use sled's compare-and-swap on the stored bytes.

use super::{apply_push, AuthoritativeService, PushReceipt, TreeStore};
use crate::diff::DiffResult;
use crate::error::SyncError;
use crate::store::memory::AUTHORITATIVE_DEVICE;
use crate::tree::Tree;
use crate::types::RequestContext;
use async_trait::async_trait;
use serde::Deserialize;
use sled::IVec;
use std::path::Path;
use tracing::{debug, info};

const TREES: &str = "trees";
const AUTHORITY: &str = "authority";
const AUTHORITY_KEY: &[u8] = b"authoritative";

/// Version field only, for cheap version checks
#[derive(Deserialize)]
struct StoredVersion {
    version: u64,
}

fn stored_version(bytes: Option<&IVec>) -> Result<u64, SyncError> {
    match bytes {
        Some(bytes) => {
            let stored: StoredVersion = serde_json::from_slice(bytes)?;
            Ok(stored.version)
        }
        None => Ok(0),
    }
}

/// Device tree persistence in a sled tree
pub struct SledTreeStore {
    trees: sled::Tree,
}

impl SledTreeStore {
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    pub fn from_db(db: &sled::Db) -> Result<Self, SyncError> {
        Ok(Self {
            trees: db.open_tree(TREES)?,
        })
    }
}

#[async_trait]
impl TreeStore for SledTreeStore {
    async fn load_tree(&self, key: &str) -> Result<Tree, SyncError> {
        match self.trees.get(key.as_bytes())? {
            Some(bytes) => Tree::deserialize(&bytes),
            None => Err(SyncError::NotFound(format!("tree {}", key))),
        }
    }

    async fn save_tree(
        &self,
        key: &str,
        tree: &Tree,
        expected_version: u64,
    ) -> Result<(), SyncError> {
        let current = self.trees.get(key.as_bytes())?;
        let actual = stored_version(current.as_ref())?;
        if actual != expected_version {
            return Err(SyncError::VersionConflict {
                expected: expected_version,
                actual,
            });
        }

        let encoded = tree.serialize()?;
        match self
            .trees
            .compare_and_swap(key.as_bytes(), current, Some(encoded))?
        {
            Ok(()) => {
                self.trees.flush_async().await?;
                debug!(key, version = tree.version(), "Saved tree");
                Ok(())
            }
            Err(cas) => Err(SyncError::VersionConflict {
                expected: expected_version,
                actual: stored_version(cas.current.as_ref())?,
            }),
        }
    }
}

/// Authoritative tree persisted in sled
///
/// Lets several local processes (one per device) share one authoritative tree
/// through a common database directory.
pub struct SledAuthority {
    authority: sled::Tree,
}

impl SledAuthority {
    pub fn open(path: &Path) -> Result<Self, SyncError> {
        let db = sled::open(path)?;
        Self::from_db(&db)
    }

    pub fn from_db(db: &sled::Db) -> Result<Self, SyncError> {
        Ok(Self {
            authority: db.open_tree(AUTHORITY)?,
        })
    }

    fn load(&self) -> Result<(Option<IVec>, Tree), SyncError> {
        let current = self.authority.get(AUTHORITY_KEY)?;
        let tree = match &current {
            Some(bytes) => Tree::deserialize(bytes)?,
            None => Tree::new(AUTHORITATIVE_DEVICE),
        };
        Ok((current, tree))
    }
}

#[async_trait]
impl AuthoritativeService for SledAuthority {
    async fn get_remote_tree(&self, ctx: &RequestContext) -> Result<Tree, SyncError> {
        let (_, tree) = self.load()?;
        debug!(device_id = %ctx.device_id, version = tree.version(), "Serving authoritative tree");
        Ok(tree)
    }

    async fn push_diff(
        &self,
        ctx: &RequestContext,
        diff: &DiffResult,
        expected_version: u64,
    ) -> Result<PushReceipt, SyncError> {
        let (current, mut tree) = self.load()?;
        let receipt = apply_push(&mut tree, diff, expected_version)?;

        let encoded = tree.serialize()?;
        match self
            .authority
            .compare_and_swap(AUTHORITY_KEY, current, Some(encoded))?
        {
            Ok(()) => {
                self.authority.flush_async().await?;
                info!(
                    device_id = %ctx.device_id,
                    changes = diff.len(),
                    version = receipt.version,
                    "Accepted push"
                );
                Ok(receipt)
            }
            Err(cas) => Err(SyncError::VersionConflict {
                expected: expected_version,
                actual: stored_version(cas.current.as_ref())?,
            }),
        }
    }
}
