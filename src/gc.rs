//! Object garbage collection
//!
//! The sync engine never deletes stored objects: a key dropped from one tree may
//! still be referenced by another device, a base snapshot, or an upload that has
//! not been pushed yet. This sweep is run from outside the engine with every tree
//! that may hold a reference.

use crate::error::SyncError;
use crate::store::ObjectStore;
use crate::tree::Tree;
use crate::types::ObjectKey;
use serde::Serialize;
use std::collections::BTreeSet;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct GcReport {
    /// Distinct keys referenced by the supplied trees
    pub referenced: usize,
    /// Keys present in the store before the sweep
    pub stored: usize,
    /// Unreferenced keys (deleted unless this was a dry run)
    pub unreferenced: Vec<ObjectKey>,
    /// Referenced keys missing from the store
    pub missing: Vec<ObjectKey>,
    pub dry_run: bool,
}

/// Keys referenced by any of `trees`
pub fn referenced_keys<'a, I>(trees: I) -> BTreeSet<ObjectKey>
where
    I: IntoIterator<Item = &'a Tree>,
{
    trees
        .into_iter()
        .flat_map(|tree| tree.entries().values())
        .filter_map(|entry| entry.remote_key.clone())
        .collect()
}

/// Delete every stored object no tree in `trees` references
pub async fn collect_garbage<'a, I>(
    objects: &dyn ObjectStore,
    trees: I,
    dry_run: bool,
) -> Result<GcReport, SyncError>
where
    I: IntoIterator<Item = &'a Tree>,
{
    let referenced = referenced_keys(trees);
    let stored: BTreeSet<ObjectKey> = objects.list_keys().await?.into_iter().collect();

    let unreferenced: Vec<ObjectKey> = stored.difference(&referenced).cloned().collect();
    let missing: Vec<ObjectKey> = referenced.difference(&stored).cloned().collect();
    for key in &missing {
        warn!(key = %key, "Referenced object is missing from the store");
    }

    if !dry_run {
        for key in &unreferenced {
            objects.delete(key).await?;
            debug!(key = %key, "Deleted unreferenced object");
        }
    }

    info!(
        referenced = referenced.len(),
        stored = stored.len(),
        unreferenced = unreferenced.len(),
        dry_run,
        "Garbage collection finished"
    );
    Ok(GcReport {
        referenced: referenced.len(),
        stored: stored.len(),
        unreferenced,
        missing,
        dry_run,
    })
}
