//! Sync Coordinator
//!
//! Drives the reconciliation cycle for one device: fetch the authoritative
//! tree, diff both sides against the last synced base, apply inbound changes,
//! settle pending uploads, then push outbound changes under the authoritative
//! version. One cycle runs at a time; triggers that arrive mid-cycle are
//! folded into a single rerun.

use super::conflict::{reconcile, ReconcilePlan};
use super::pool::{Cancellation, TaskOutcome, TransferPool};
use super::report::{CycleOutcome, CycleReport, PathFailure};
use super::transfer::{InboundOp, InboundResult, Transfers};
use crate::concurrency::{PathLockManager, SharedTree};
use crate::config::SyncConfig;
use crate::diff::{diff, DiffResult};
use crate::error::SyncError;
use crate::keys::{ObjectKeyResolver, DEFAULT_MAX_TTL, DEFAULT_PREFIX};
use crate::pending::{FailureOutcome, PendingUpload, PendingUploadTracker, RetryPolicy};
use crate::store::{AccessDescriptor, AuthoritativeService, ObjectStore, TreeStore};
use crate::tree::hasher::content_hash;
use crate::tree::path::normalize_path;
use crate::tree::{EntryMetadata, Tree};
use crate::types::{DeviceId, Digest, ObjectKey, RequestContext};
use crate::workspace::fs::mime_type_for;
use crate::workspace::watch::{ChangeEvent, EventBatcher, WatchConfig};
use crate::workspace::LocalFiles;
use futures::{Stream, StreamExt};
use parking_lot::Mutex;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{watch, Notify};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Reruns one `sync_now` call may absorb before returning
const MAX_RERUNS: u32 = 8;

/// Observable coordinator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    Idle,
    Diffing,
    Applying,
    Settling,
    Stopped,
}

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub device_id: DeviceId,
    pub poll_interval: Duration,
    pub max_concurrency: usize,
    pub conflict_retry_budget: u32,
    pub retry: RetryPolicy,
    pub key_prefix: String,
    pub max_descriptor_ttl: Duration,
}

impl SyncOptions {
    pub fn new(device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            poll_interval: Duration::from_secs(30),
            max_concurrency: 4,
            conflict_retry_budget: 3,
            retry: RetryPolicy::default(),
            key_prefix: DEFAULT_PREFIX.to_string(),
            max_descriptor_ttl: DEFAULT_MAX_TTL,
        }
    }

    pub fn from_config(config: &SyncConfig, device_id: impl Into<DeviceId>) -> Self {
        Self {
            device_id: device_id.into(),
            poll_interval: config.poll_interval(),
            max_concurrency: config.max_concurrency,
            conflict_retry_budget: config.conflict_retry_budget,
            retry: config.retry_policy(),
            key_prefix: config.storage.key_prefix.clone(),
            max_descriptor_ttl: config.storage.descriptor_max_ttl(),
        }
    }
}

/// Backends the coordinator talks to
#[derive(Clone)]
pub struct Collaborators {
    pub authority: Arc<dyn AuthoritativeService>,
    pub objects: Arc<dyn ObjectStore>,
    pub tree_store: Arc<dyn TreeStore>,
    pub files: Arc<dyn LocalFiles>,
}

/// Result of ingesting one local change
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalChange {
    /// Entry created or changed; `reused` when the content was already stored
    Upserted {
        path: String,
        content_hash: Digest,
        reused: bool,
    },
    Removed(String),
    Unchanged(String),
}

pub struct SyncCoordinator {
    options: SyncOptions,
    ctx: RequestContext,
    authority: Arc<dyn AuthoritativeService>,
    tree_store: Arc<dyn TreeStore>,
    transfers: Transfers,
    /// Last authoritative state this device fully reconciled with
    base: Mutex<Tree>,
    pool: TransferPool,
    state: watch::Sender<SyncState>,
    cycle_lock: tokio::sync::Mutex<()>,
    rerun: AtomicBool,
    trigger: Notify,
    cancel: Cancellation,
    /// Stored version of each persisted tree key
    persisted: Mutex<HashMap<String, u64>>,
    /// Keys whose stored record was unreadable at load and may be replaced
    unreadable: Mutex<HashSet<String>>,
}

impl SyncCoordinator {
    pub fn new(options: SyncOptions, collaborators: Collaborators) -> Self {
        let keys = Arc::new(ObjectKeyResolver::new(
            options.key_prefix.clone(),
            options.max_descriptor_ttl,
            collaborators.objects.clone(),
        ));
        let transfers = Transfers {
            files: collaborators.files,
            objects: collaborators.objects,
            keys,
            local: Arc::new(SharedTree::new(Tree::new(options.device_id.clone()))),
            tracker: Arc::new(Mutex::new(PendingUploadTracker::new(options.retry.clone()))),
            locks: Arc::new(PathLockManager::new()),
        };
        let (state, _) = watch::channel(SyncState::Idle);

        Self {
            ctx: RequestContext::new(options.device_id.clone()),
            base: Mutex::new(Tree::new(options.device_id.clone())),
            pool: TransferPool::new(options.max_concurrency),
            authority: collaborators.authority,
            tree_store: collaborators.tree_store,
            transfers,
            state,
            cycle_lock: tokio::sync::Mutex::new(()),
            rerun: AtomicBool::new(false),
            trigger: Notify::new(),
            cancel: Cancellation::new(),
            persisted: Mutex::new(HashMap::new()),
            unreadable: Mutex::new(HashSet::new()),
            options,
        }
    }

    pub fn device_id(&self) -> &str {
        &self.options.device_id
    }

    pub fn options(&self) -> &SyncOptions {
        &self.options
    }

    pub fn keys(&self) -> &ObjectKeyResolver {
        &self.transfers.keys
    }

    pub fn local_tree(&self) -> Arc<Tree> {
        self.transfers.local.snapshot()
    }

    pub fn base_tree(&self) -> Tree {
        self.base.lock().clone()
    }

    /// Local changes not yet reflected in the base
    pub fn local_changes(&self) -> DiffResult {
        diff(&self.base.lock(), &self.local_tree())
    }

    pub fn pending_uploads(&self) -> Vec<PendingUpload> {
        self.transfers.tracker.lock().pending_entries().cloned().collect()
    }

    pub fn state(&self) -> SyncState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: SyncState) {
        self.state.send_if_modified(|current| {
            if *current == SyncState::Stopped || *current == next {
                return false;
            }
            debug!(device_id = %self.options.device_id, from = ?current, to = ?next, "Sync state");
            *current = next;
            true
        });
    }

    /// Ask for a cycle as soon as possible
    pub fn request_sync(&self) {
        self.rerun.store(true, Ordering::SeqCst);
        self.trigger.notify_one();
    }

    /// Stop between steps; running transfers finish, queued ones are abandoned
    pub fn shutdown(&self) {
        self.cancel.cancel();
        self.state.send_replace(SyncState::Stopped);
        info!(device_id = %self.options.device_id, "Sync coordinator stopped");
    }

    pub fn is_stopped(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn local_key(&self) -> String {
        format!("local/{}", self.options.device_id)
    }

    fn base_key(&self) -> String {
        format!("base/{}", self.options.device_id)
    }

    /// Restore persisted trees and the pending-upload queue
    ///
    /// A corrupt local tree is rebuilt from a scan; a corrupt base is dropped,
    /// which makes the next cycle compare everything from scratch.
    pub async fn load(&self) -> Result<(), SyncError> {
        let local_key = self.local_key();
        match self.tree_store.load_tree(&local_key).await {
            Ok(tree) => {
                self.persisted.lock().insert(local_key, tree.version());
                let tree = tree.with_device_id(self.options.device_id.clone());
                info!(entries = tree.len(), version = tree.version(), "Loaded local tree");
                self.transfers.local.replace(tree);
            }
            Err(e) if e.is_not_found() => debug!("No persisted local tree"),
            Err(SyncError::CorruptTree { reason, .. }) => {
                warn!(reason = %reason, "Persisted local tree is corrupt, rebuilding from scan");
                self.unreadable.lock().insert(local_key);
                self.rebuild_from_scan().await?;
            }
            Err(e) => return Err(e),
        }

        let base_key = self.base_key();
        match self.tree_store.load_tree(&base_key).await {
            Ok(tree) => {
                self.persisted.lock().insert(base_key, tree.version());
                *self.base.lock() = tree;
            }
            Err(e) if e.is_not_found() => {}
            Err(SyncError::CorruptTree { reason, .. }) => {
                warn!(reason = %reason, "Persisted base tree is corrupt, starting from empty");
                self.unreadable.lock().insert(base_key);
            }
            Err(e) => return Err(e),
        }

        self.resync_tracker()?;
        Ok(())
    }

    /// Save the local and base trees
    pub async fn persist(&self) -> Result<(), SyncError> {
        let local = self.local_tree();
        self.save(&self.local_key(), &local).await?;
        let base = self.base_tree();
        self.save(&self.base_key(), &base).await
    }

    /// Save `tree` under `key` if the stored record is the one this device last wrote
    ///
    /// A record that moved under another writer is reported as a conflict and left
    /// in place. Only a record that failed to load is replaced without a match.
    async fn save(&self, key: &str, tree: &Tree) -> Result<(), SyncError> {
        let expected = self.persisted.lock().get(key).copied().unwrap_or(0);
        match self.tree_store.save_tree(key, tree, expected).await {
            Ok(()) => {}
            Err(SyncError::VersionConflict { actual, .. }) if self.unreadable.lock().contains(key) => {
                warn!(key, actual, "Replacing unreadable persisted tree");
                self.tree_store.save_tree(key, tree, actual).await?;
            }
            Err(e) => {
                if e.is_version_conflict() {
                    error!(key, expected, error = %e, "Persisted tree changed under another writer");
                }
                return Err(e);
            }
        }
        self.unreadable.lock().remove(key);
        self.persisted.lock().insert(key.to_string(), tree.version());
        Ok(())
    }

    /// Rebuild the local tree from the files on disk
    ///
    /// Entries whose content is unchanged keep their timestamps and keys.
    /// Returns the number of paths that changed.
    pub async fn rebuild_from_scan(&self) -> Result<usize, SyncError> {
        let scanned = self.transfers.files.scan().await?;
        let previous = self.local_tree();
        let known: BTreeMap<Digest, ObjectKey> = {
            let tracker = self.transfers.tracker.lock();
            scanned
                .values()
                .filter_map(|e| tracker.known_key(&e.content_hash).map(|k| (e.content_hash, k.clone())))
                .collect()
        };
        let remote_keys = self.base_tree();

        let entries: BTreeMap<_, _> = scanned
            .into_iter()
            .map(|(path, mut entry)| {
                if let Some(prev) = previous.get(&path).filter(|p| p.content_hash == entry.content_hash) {
                    entry.modified_at = prev.modified_at;
                    entry.remote_key = prev.remote_key.clone();
                    entry.mime_type = entry.mime_type.or_else(|| prev.mime_type.clone());
                }
                if entry.remote_key.is_none() {
                    entry.remote_key = known
                        .get(&entry.content_hash)
                        .or_else(|| remote_keys.remote_key_for(&entry.content_hash))
                        .cloned();
                }
                (path, entry)
            })
            .collect();

        let mut rebuilt = (*previous).clone();
        rebuilt.replace_entries(entries.clone());
        let changed = diff(&previous, &rebuilt).len();
        if rebuilt.entries() != previous.entries() {
            self.transfers.local.update(|tree| {
                tree.replace_entries(entries.clone());
                Ok(())
            })?;
        }
        self.resync_tracker()?;
        info!(entries = entries.len(), changed, "Rebuilt local tree from scan");
        Ok(changed)
    }

    /// Align the tracker with the local tree
    fn resync_tracker(&self) -> Result<(), SyncError> {
        let tree = self.local_tree();
        let reused: Vec<(String, Digest, ObjectKey)> = {
            let mut tracker = self.transfers.tracker.lock();
            let stale: Vec<String> = tracker
                .pending_entries()
                .filter(|p| match tree.get(&p.path) {
                    Some(entry) => entry.content_hash != p.content_hash || entry.remote_key.is_some(),
                    None => true,
                })
                .map(|p| p.path.clone())
                .collect();
            for path in stale {
                tracker.forget(&path);
            }
            tracker.restore_from(&tree);
            tree.entries()
                .values()
                .filter(|e| e.remote_key.is_none() && !tracker.is_pending(&e.path))
                .filter_map(|e| {
                    tracker
                        .known_key(&e.content_hash)
                        .map(|k| (e.path.clone(), e.content_hash, k.clone()))
                })
                .collect()
        };
        for (path, hash, key) in reused {
            self.transfers.adopt_key(&path, hash, &key)?;
        }
        Ok(())
    }

    /// Record one file-system change in the local tree
    pub async fn apply_local_change(&self, event: ChangeEvent) -> Result<LocalChange, SyncError> {
        let path = normalize_path(event.path())?;
        let _guard = self.transfers.locks.lock(&path).await;
        let files = &self.transfers.files;

        if files.stat(&path).await?.is_none() {
            return self.forget_local(path);
        }
        let bytes = match files.read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.is_not_found() => return self.forget_local(path),
            Err(e) => return Err(e),
        };
        // Stat again after reading so the timestamp matches the hashed bytes
        let Some(stat) = files.stat(&path).await? else {
            return self.forget_local(path);
        };

        let hash = content_hash(&bytes);
        if self.local_tree().get(&path).is_some_and(|e| e.content_hash == hash) {
            return Ok(LocalChange::Unchanged(path));
        }

        let mut metadata = EntryMetadata::new(bytes.len() as u64, stat.modified_at)
            .with_local_ref(files.locate(&path));
        if let Some(mime) = mime_type_for(&path) {
            metadata = metadata.with_mime_type(mime);
        }
        self.transfers.local.update(|tree| {
            tree.upsert(&path, hash, metadata.clone())?;
            Ok(())
        })?;
        let reused = self.transfers.queue_upload(&path, hash)?;
        debug!(path = %path, hash = %hash.short(), reused, "Recorded local change");
        Ok(LocalChange::Upserted {
            path,
            content_hash: hash,
            reused,
        })
    }

    fn forget_local(&self, path: String) -> Result<LocalChange, SyncError> {
        let removed = self.transfers.local.update(|tree| Ok(tree.remove(&path)))?;
        self.transfers.tracker.lock().forget(&path);
        if removed {
            debug!(path = %path, "Recorded local removal");
            Ok(LocalChange::Removed(path))
        } else {
            Ok(LocalChange::Unchanged(path))
        }
    }

    async fn apply_batch(&self, events: Vec<ChangeEvent>) -> usize {
        let mut changed = 0;
        for event in events {
            let path = event.path().to_string();
            match self.apply_local_change(event).await {
                Ok(LocalChange::Unchanged(_)) => {}
                Ok(_) => changed += 1,
                Err(e) => warn!(path = %path, error = %e, "Failed to record local change"),
            }
        }
        if changed > 0 {
            self.request_sync();
        }
        changed
    }

    /// Feed debounced file-system events into the local tree until the stream
    /// ends or the coordinator stops
    pub async fn consume_feed<S>(&self, mut feed: S, config: &WatchConfig) -> Result<(), SyncError>
    where
        S: Stream<Item = ChangeEvent> + Unpin,
    {
        let mut batcher = EventBatcher::new(config.clone());
        let window = config.batch_window();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                next = tokio::time::timeout(window, feed.next()) => match next {
                    Ok(Some(event)) => {
                        if batcher.add_event(event) {
                            let batch = batcher.take_batch();
                            self.apply_batch(batch).await;
                        }
                    }
                    Ok(None) => {
                        let rest = batcher.take_batch();
                        self.apply_batch(rest).await;
                        break;
                    }
                    Err(_) => {}
                },
            }
            let settled = batcher.take_settled(Instant::now());
            if !settled.is_empty() {
                self.apply_batch(settled).await;
            }
        }
        debug!("Change feed closed");
        Ok(())
    }

    /// Poll, react to triggers and stop on shutdown
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<(), SyncError> {
        let mut ticker = tokio::time::interval(self.options.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(
            device_id = %self.options.device_id,
            poll_secs = self.options.poll_interval.as_secs(),
            "Sync coordinator started"
        );

        loop {
            if *shutdown.borrow() || self.is_stopped() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = self.trigger.notified() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
                _ = self.cancel.cancelled() => break,
            }

            match self.sync_now().await {
                Ok(report) if report.has_changes() || !report.is_clean() => info!("{}", report),
                Ok(report) => debug!("{}", report),
                Err(SyncError::CorruptTree { device_id, reason }) => {
                    error!(device_id = %device_id, reason = %reason, "Corrupt tree, rebuilding from scan");
                    if let Err(e) = self.rebuild_from_scan().await {
                        error!(error = %e, "Rebuild failed");
                    }
                }
                Err(e) => warn!(error = %e, "Sync cycle failed, will retry"),
            }
            self.transfers.locks.prune();
        }

        self.shutdown();
        Ok(())
    }

    /// Run a cycle now, or fold into the one already running
    pub async fn sync_now(&self) -> Result<CycleReport, SyncError> {
        let Ok(_cycle) = self.cycle_lock.try_lock() else {
            self.rerun.store(true, Ordering::SeqCst);
            debug!("Cycle in progress, coalescing trigger");
            return Ok(CycleReport::coalesced());
        };

        let mut combined: Option<CycleReport> = None;
        for _ in 0..MAX_RERUNS {
            self.rerun.store(false, Ordering::SeqCst);
            let result = self.run_cycle().await;
            self.set_state(SyncState::Idle);
            let persisted = self.persist().await;

            let report = match (result, persisted) {
                (Ok(report), Ok(())) => report,
                (Ok(_), Err(e)) => return Err(e),
                (Err(e), persisted) => {
                    if let Err(p) = persisted {
                        warn!(error = %p, "Failed to persist trees after a failed cycle");
                    }
                    return Err(e);
                }
            };
            let stop = report.outcome == CycleOutcome::Cancelled;
            match combined.as_mut() {
                Some(total) => total.absorb(report),
                None => combined = Some(report),
            }
            if stop || !self.rerun.load(Ordering::SeqCst) {
                break;
            }
        }
        Ok(combined.unwrap_or_else(|| CycleReport::new(CycleOutcome::Skipped)))
    }

    fn in_sync(&self, base: &Tree, remote: &Tree, local: &Tree) -> bool {
        remote.version() == base.version()
            && remote.root_hash() == base.root_hash()
            && local.root_hash() == base.root_hash()
            && self.transfers.tracker.lock().is_empty()
    }

    fn cancelled(&self, report: &mut CycleReport) -> bool {
        if self.cancel.is_cancelled() {
            report.outcome = CycleOutcome::Cancelled;
            return true;
        }
        false
    }

    /// One reconciliation pass, re-diffing after each lost push race
    async fn run_cycle(&self) -> Result<CycleReport, SyncError> {
        let started = Instant::now();
        let mut report = CycleReport::new(CycleOutcome::Synced);
        let mut lost_races = 0u32;

        loop {
            if self.cancelled(&mut report) {
                break;
            }
            self.set_state(SyncState::Diffing);
            let remote = self.authority.get_remote_tree(&self.ctx).await?;
            let base = self.base_tree();
            let local = self.local_tree();
            report.remote_version = remote.version();

            if self.in_sync(&base, &remote, &local) {
                if report.version_conflicts == 0 {
                    report.outcome = CycleOutcome::Skipped;
                }
                break;
            }

            let inbound = diff(&base, &remote);
            let outbound = diff(&base, &local);
            let plan = reconcile(&inbound, &outbound, &local);
            info!(
                device_id = %self.options.device_id,
                remote_version = remote.version(),
                inbound = inbound.len(),
                outbound = outbound.len(),
                conflicts = plan.conflicts.len(),
                "Reconciling"
            );
            self.learn_remote_keys(&remote);

            if self.cancelled(&mut report) {
                break;
            }
            self.set_state(SyncState::Applying);
            let failed = self.apply_inbound(&plan, &mut report).await;
            self.adopt_converged(&plan, &remote)?;
            self.set_base(&remote, &base, &failed);
            if plan.has_conflicts() {
                for conflict in &plan.conflicts {
                    info!(path = %conflict.path, winner = ?conflict.winner, copy = ?conflict.copy_path, "Resolved conflict");
                }
                report.conflicts.extend(plan.conflicts.iter().cloned());
                self.rerun.store(true, Ordering::SeqCst);
            }

            if self.cancelled(&mut report) {
                break;
            }
            self.set_state(SyncState::Settling);
            self.settle_uploads(&mut report).await;

            if self.cancelled(&mut report) {
                break;
            }
            match self.push(&remote, &plan, &mut report).await {
                Ok(Some(pushed)) => self.set_base(&pushed, &base, &failed),
                Ok(None) => {}
                Err(e) if e.is_version_conflict() => {
                    report.version_conflicts += 1;
                    lost_races += 1;
                    if lost_races > self.options.conflict_retry_budget {
                        warn!(attempts = lost_races, "Push retry budget exhausted");
                        return Err(e);
                    }
                    debug!(attempt = lost_races, error = %e, "Push lost a race, re-diffing");
                    continue;
                }
                Err(e) => return Err(e),
            }
            break;
        }

        report.elapsed = started.elapsed();
        Ok(report)
    }

    /// Base becomes `target`, except paths whose inbound change failed stay as before
    fn set_base(&self, target: &Tree, previous: &Tree, failed: &BTreeSet<String>) {
        let mut entries = target.entries().clone();
        for path in failed {
            match previous.get(path) {
                Some(entry) => entries.insert(path.clone(), entry.clone()),
                None => entries.remove(path),
            };
        }
        *self.base.lock() = Tree::from_parts(target.device_id().to_string(), entries, target.version());
    }

    fn learn_remote_keys(&self, remote: &Tree) {
        let mut tracker = self.transfers.tracker.lock();
        for entry in remote.entries().values() {
            if let Some(key) = &entry.remote_key {
                tracker.learn_key(entry.content_hash, key.clone());
            }
        }
    }

    fn adopt_converged(&self, plan: &ReconcilePlan, remote: &Tree) -> Result<(), SyncError> {
        for path in &plan.converged {
            if let Some(entry) = remote.get(path) {
                if let Some(key) = &entry.remote_key {
                    self.transfers.adopt_key(path, entry.content_hash, key)?;
                }
            }
        }
        Ok(())
    }

    /// Apply local copies, then downloads and deletions on the pool
    ///
    /// Returns the paths whose inbound change did not land.
    async fn apply_inbound(&self, plan: &ReconcilePlan, report: &mut CycleReport) -> BTreeSet<String> {
        let mut failed = BTreeSet::new();

        let mut blocked = HashSet::new();
        for copy in &plan.local_copies {
            if let Err(e) = self.transfers.copy_local(copy).await {
                warn!(path = %copy.from, error = %e, "Could not preserve local content, skipping download");
                report.failed.push(PathFailure::new(copy.from.clone(), &e));
                blocked.insert(copy.from.clone());
            }
        }

        let mut ops = Vec::new();
        for download in &plan.downloads {
            if blocked.contains(&download.entry.path) {
                failed.insert(download.entry.path.clone());
                continue;
            }
            ops.push(InboundOp::Download(download.clone()));
        }
        ops.extend(plan.deletions.iter().cloned().map(InboundOp::Delete));
        if ops.is_empty() {
            return failed;
        }

        let paths: Vec<String> = ops.iter().map(|op| op.path().to_string()).collect();
        let jobs: Vec<_> = ops
            .into_iter()
            .map(|op| self.transfers.clone().inbound(op))
            .collect();
        let outcomes = self.pool.run_all(jobs, &self.cancel).await;

        for (path, outcome) in paths.into_iter().zip(outcomes) {
            match outcome {
                TaskOutcome::Done(InboundResult::Downloaded) => report.downloaded.push(path),
                TaskOutcome::Done(InboundResult::Deleted) => report.deleted_locally.push(path),
                TaskOutcome::Done(InboundResult::AlreadyPresent) => {}
                TaskOutcome::Done(InboundResult::Deferred(reason)) => {
                    debug!(path = %path, reason, "Deferred inbound change");
                    failed.insert(path);
                }
                TaskOutcome::Done(InboundResult::Failed(e)) => {
                    warn!(path = %path, error = %e, "Inbound transfer failed");
                    report.failed.push(PathFailure::new(path.clone(), &e));
                    failed.insert(path);
                }
                TaskOutcome::Abandoned => {
                    report.abandoned += 1;
                    failed.insert(path);
                }
                TaskOutcome::Failed(reason) => {
                    let e = SyncError::DownloadFailed {
                        path: path.clone(),
                        reason,
                    };
                    report.failed.push(PathFailure::new(path.clone(), &e));
                    failed.insert(path);
                }
            }
        }
        failed
    }

    /// Upload every pending content, retrying with backoff inside the cycle
    async fn settle_uploads(&self, report: &mut CycleReport) {
        let mut attempted: HashSet<Digest> = HashSet::new();
        let mut exhausted: HashSet<Digest> = HashSet::new();

        loop {
            if self.cancel.is_cancelled() {
                return;
            }
            let now = Instant::now();
            let mut ready: Vec<(Digest, Vec<String>)> = Vec::new();
            let mut next_retry: Option<Instant> = None;
            let mut known: Vec<(Digest, ObjectKey)> = Vec::new();
            {
                let tracker = self.transfers.tracker.lock();
                for (hash, paths) in tracker.pending_by_hash() {
                    if exhausted.contains(&hash) {
                        continue;
                    }
                    if let Some(key) = tracker.known_key(&hash) {
                        known.push((hash, key.clone()));
                        continue;
                    }
                    let due = !attempted.contains(&hash) || paths.iter().any(|p| tracker.is_ready(p, now));
                    if due {
                        ready.push((hash, paths));
                    } else {
                        let at = paths
                            .iter()
                            .filter_map(|p| tracker.get(p).and_then(|u| u.retry_at))
                            .min();
                        next_retry = match (next_retry, at) {
                            (Some(a), Some(b)) => Some(a.min(b)),
                            (a, b) => a.or(b),
                        };
                    }
                }
            }

            for (hash, key) in known {
                self.confirm(hash, key, report);
            }

            if ready.is_empty() {
                let Some(at) = next_retry else {
                    return;
                };
                tokio::select! {
                    _ = tokio::time::sleep_until(at.into()) => {}
                    _ = self.cancel.cancelled() => return,
                }
                continue;
            }

            let groups: Vec<Vec<String>> = ready.iter().map(|(_, paths)| paths.clone()).collect();
            let jobs: Vec<_> = ready
                .into_iter()
                .map(|(hash, paths)| {
                    attempted.insert(hash);
                    self.transfers.clone().upload(hash, paths)
                })
                .collect();
            let outcomes = self.pool.run_all(jobs, &self.cancel).await;

            for (paths, outcome) in groups.into_iter().zip(outcomes) {
                match outcome {
                    TaskOutcome::Done(upload) => match upload.result {
                        Ok(key) => {
                            report.objects_put += 1;
                            self.confirm(upload.hash, key, report);
                        }
                        Err(e) => {
                            let mut tracker = self.transfers.tracker.lock();
                            let pending: Vec<String> =
                                paths.into_iter().filter(|p| tracker.is_pending(p)).collect();
                            for path in pending {
                                if let FailureOutcome::Exhausted(err) = tracker.record_failure(&path, e.to_string()) {
                                    report.failed.push(PathFailure::new(path, &err));
                                    exhausted.insert(upload.hash);
                                }
                            }
                        }
                    },
                    TaskOutcome::Abandoned => report.abandoned += paths.len(),
                    TaskOutcome::Failed(reason) => {
                        let mut tracker = self.transfers.tracker.lock();
                        for path in &paths {
                            let e = SyncError::UploadFailed {
                                path: path.clone(),
                                reason: reason.clone(),
                            };
                            report.failed.push(PathFailure::new(path.clone(), &e));
                            if let Some(upload) = tracker.get(path) {
                                exhausted.insert(upload.content_hash);
                            }
                        }
                    }
                }
            }
        }
    }

    /// Resolve every path waiting on `hash` and record the key in the tree
    fn confirm(&self, hash: Digest, key: ObjectKey, report: &mut CycleReport) {
        let paths = self.transfers.tracker.lock().resolve_hash(hash, key.clone(), None);
        for path in paths {
            let applied = self.transfers.local.update(|tree| match tree.get(&path) {
                Some(entry) if entry.content_hash == hash => {
                    if entry.remote_key.as_ref() != Some(&key) {
                        tree.set_remote_key(&path, key.clone())?;
                    }
                    Ok(true)
                }
                _ => Ok(false),
            });
            match applied {
                Ok(true) => report.uploaded.push(path),
                Ok(false) => {
                    let lost = SyncError::LostUpdate { path: path.clone() };
                    warn!(error = %lost, "Discarding upload confirmation");
                    report.lost_updates.push(path);
                }
                Err(e) => report.failed.push(PathFailure::new(path, &e)),
            }
        }
    }

    /// Publish outbound changes whose content is stored
    ///
    /// Returns the tree the authority now holds, or `None` when nothing was pushed.
    async fn push(
        &self,
        remote: &Tree,
        plan: &ReconcilePlan,
        report: &mut CycleReport,
    ) -> Result<Option<Tree>, SyncError> {
        let local = self.local_tree();
        let mut entries = remote.entries().clone();
        for path in &plan.push_paths {
            match local.get(path) {
                Some(entry) if entry.is_uploaded() => {
                    entries.insert(path.clone(), entry.for_remote());
                }
                Some(_) => debug!(path = %path, "Holding back entry until its upload settles"),
                None => debug!(path = %path, "Entry removed since planning"),
            }
        }
        for removal in &plan.push_removals {
            let still_removed = !local.contains(&removal.path);
            let unchanged_remotely = entries
                .get(&removal.path)
                .is_some_and(|e| e.content_hash == removal.content_hash);
            if still_removed && unchanged_remotely {
                entries.remove(&removal.path);
            }
        }

        let desired = Tree::from_parts(remote.device_id().to_string(), entries, remote.version());
        let change = diff(remote, &desired);
        if change.is_empty() {
            return Ok(None);
        }

        let receipt = self.authority.push_diff(&self.ctx, &change, remote.version()).await?;
        report.pushed += change.len();
        report.remote_version = receipt.version;
        info!(
            device_id = %self.options.device_id,
            entries = change.len(),
            version = receipt.version,
            "Pushed changes"
        );

        if receipt.root_hash != desired.root_hash() {
            warn!(version = receipt.version, "Authoritative root differs from the pushed tree");
            return Ok(None);
        }
        let mut pushed = desired;
        pushed.set_version(receipt.version);
        Ok(Some(pushed))
    }

    /// Time-limited access to the stored content of `path`
    pub async fn share(&self, path: &str, ttl: Duration) -> Result<AccessDescriptor, SyncError> {
        let path = normalize_path(path)?;
        let tree = self.local_tree();
        let entry = tree
            .get(&path)
            .ok_or_else(|| SyncError::NotFound(format!("entry {}", path)))?;
        let key = entry
            .remote_key
            .as_ref()
            .ok_or_else(|| SyncError::NotFound(format!("stored content for {} (upload pending)", path)))?;
        self.transfers.keys.access_descriptor_for(key, ttl).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::{MemoryAuthority, MemoryObjectStore, MemoryTreeStore};
    use crate::sync::report::Winner;
    use crate::tree::path::conflict_copy_path;
    use crate::workspace::MemoryFiles;
    use chrono::{TimeZone, Utc};

    struct Device {
        files: Arc<MemoryFiles>,
        sync: SyncCoordinator,
    }

    struct Cloud {
        authority: Arc<MemoryAuthority>,
        objects: Arc<MemoryObjectStore>,
    }

    impl Cloud {
        fn new() -> Self {
            Self {
                authority: Arc::new(MemoryAuthority::new()),
                objects: Arc::new(MemoryObjectStore::new()),
            }
        }

        fn device(&self, id: &str) -> Device {
            self.device_with(id, Arc::new(MemoryTreeStore::new()))
        }

        fn device_with(&self, id: &str, tree_store: Arc<MemoryTreeStore>) -> Device {
            let files = Arc::new(MemoryFiles::new());
            let mut options = SyncOptions::new(id);
            options.retry = RetryPolicy {
                max_attempts: 3,
                initial_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(5),
                multiplier: 2.0,
            };
            let sync = SyncCoordinator::new(
                options,
                Collaborators {
                    authority: self.authority.clone(),
                    objects: self.objects.clone(),
                    tree_store,
                    files: files.clone(),
                },
            );
            Device { files, sync }
        }
    }

    fn at(minute: u32) -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
    }

    impl Device {
        async fn write(&self, path: &str, bytes: &[u8], minute: u32) {
            self.files.put_at(path, bytes.to_vec(), at(minute)).unwrap();
            self.sync
                .apply_local_change(ChangeEvent::Modified(path.to_string()))
                .await
                .unwrap();
        }

        async fn delete(&self, path: &str) {
            self.files.delete(path);
            self.sync
                .apply_local_change(ChangeEvent::Deleted(path.to_string()))
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn test_empty_cycle_is_skipped() {
        let cloud = Cloud::new();
        let device = cloud.device("x");
        let report = device.sync.sync_now().await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::Skipped);
        assert_eq!(cloud.authority.push_count(), 0);
        assert_eq!(device.sync.state(), SyncState::Idle);
    }

    #[tokio::test]
    async fn test_local_file_is_uploaded_and_pushed() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        x.write("notes/a.txt", b"alpha", 1).await;

        let report = x.sync.sync_now().await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::Synced);
        assert_eq!(report.uploaded, vec!["notes/a.txt".to_string()]);
        assert_eq!(report.objects_put, 1);
        assert_eq!(report.pushed, 1);

        let remote = cloud.authority.snapshot();
        let entry = remote.get("notes/a.txt").unwrap();
        assert!(entry.remote_key.is_some());
        assert!(entry.local_ref.is_none());
        assert_eq!(x.sync.local_tree().root_hash(), remote.root_hash());
        assert!(x.sync.pending_uploads().is_empty());

        let again = x.sync.sync_now().await.unwrap();
        assert_eq!(again.outcome, CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_two_devices_converge() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        let y = cloud.device("y");
        x.write("a.txt", b"from x", 1).await;
        y.write("b.txt", b"from y", 2).await;

        x.sync.sync_now().await.unwrap();
        y.sync.sync_now().await.unwrap();
        x.sync.sync_now().await.unwrap();

        let remote = cloud.authority.snapshot();
        assert_eq!(x.sync.local_tree().root_hash(), remote.root_hash());
        assert_eq!(y.sync.local_tree().root_hash(), remote.root_hash());
        assert_eq!(x.files.contents("b.txt").unwrap(), b"from y");
        assert_eq!(y.files.contents("a.txt").unwrap(), b"from x");
    }

    #[tokio::test]
    async fn test_deletion_propagates() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        let y = cloud.device("y");
        x.write("doomed.txt", b"bye", 1).await;
        x.sync.sync_now().await.unwrap();
        y.sync.sync_now().await.unwrap();
        assert!(y.files.contents("doomed.txt").is_some());

        x.delete("doomed.txt").await;
        let report = x.sync.sync_now().await.unwrap();
        assert_eq!(report.pushed, 1);
        assert!(!cloud.authority.snapshot().contains("doomed.txt"));

        let report = y.sync.sync_now().await.unwrap();
        assert_eq!(report.deleted_locally, vec!["doomed.txt".to_string()]);
        assert!(y.files.contents("doomed.txt").is_none());
        assert!(!y.sync.local_tree().contains("doomed.txt"));
    }

    #[tokio::test]
    async fn test_identical_content_is_stored_once() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        let y = cloud.device("y");
        x.write("one.bin", b"same bytes", 1).await;
        x.write("two.bin", b"same bytes", 1).await;
        x.sync.sync_now().await.unwrap();
        assert_eq!(cloud.objects.put_count(), 1);

        y.sync.sync_now().await.unwrap();
        y.write("three.bin", b"same bytes", 3).await;
        let report = y.sync.sync_now().await.unwrap();
        assert_eq!(report.objects_put, 0);
        assert_eq!(cloud.objects.put_count(), 1);
        let remote = cloud.authority.snapshot();
        assert_eq!(
            remote.get("three.bin").unwrap().remote_key,
            remote.get("one.bin").unwrap().remote_key
        );
    }

    #[tokio::test]
    async fn test_newer_remote_edit_wins_and_local_is_kept_as_copy() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        let y = cloud.device("y");
        x.write("doc.txt", b"v0", 0).await;
        x.sync.sync_now().await.unwrap();
        y.sync.sync_now().await.unwrap();

        y.write("doc.txt", b"y edit", 5).await;
        x.write("doc.txt", b"x edit", 9).await;
        x.sync.sync_now().await.unwrap();
        let report = y.sync.sync_now().await.unwrap();

        assert_eq!(report.conflicts.len(), 1);
        let copy = conflict_copy_path("doc.txt", &content_hash(b"y edit").short());
        assert_eq!(report.conflicts[0].copy_path.as_deref(), Some(copy.as_str()));
        assert_eq!(y.files.contents("doc.txt").unwrap(), b"x edit");
        assert_eq!(y.files.contents(&copy).unwrap(), b"y edit");

        let remote = cloud.authority.snapshot();
        assert!(remote.contains(&copy));
        x.sync.sync_now().await.unwrap();
        assert_eq!(x.files.contents(&copy).unwrap(), b"y edit");
        assert_eq!(x.sync.local_tree().root_hash(), cloud.authority.snapshot().root_hash());
    }

    #[tokio::test]
    async fn test_newer_local_edit_wins_and_remote_is_kept_as_copy() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        let y = cloud.device("y");
        x.write("doc.txt", b"v0", 0).await;
        x.sync.sync_now().await.unwrap();
        y.sync.sync_now().await.unwrap();

        x.write("doc.txt", b"x edit", 5).await;
        y.write("doc.txt", b"y edit", 9).await;
        x.sync.sync_now().await.unwrap();
        let report = y.sync.sync_now().await.unwrap();

        let copy = conflict_copy_path("doc.txt", &content_hash(b"x edit").short());
        assert_eq!(report.conflicts[0].winner, Winner::Local);
        assert_eq!(y.files.contents("doc.txt").unwrap(), b"y edit");
        assert_eq!(y.files.contents(&copy).unwrap(), b"x edit");
        let remote = cloud.authority.snapshot();
        assert_eq!(remote.get("doc.txt").unwrap().content_hash, content_hash(b"y edit"));
        assert!(remote.contains(&copy));
    }

    #[tokio::test]
    async fn test_failed_upload_retries_within_cycle() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        x.write("flaky.txt", b"eventually", 1).await;
        cloud.objects.fail_next_puts(2);

        let report = x.sync.sync_now().await.unwrap();
        assert!(report.is_clean());
        assert_eq!(report.uploaded, vec!["flaky.txt".to_string()]);
        assert!(cloud.authority.snapshot().contains("flaky.txt"));
    }

    #[tokio::test]
    async fn test_exhausted_upload_is_reported_and_not_pushed() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        x.write("stuck.txt", b"never", 1).await;
        cloud.objects.fail_next_puts(10);

        let report = x.sync.sync_now().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].path, "stuck.txt");
        assert!(!cloud.authority.snapshot().contains("stuck.txt"));
        assert_eq!(x.sync.pending_uploads().len(), 1);

        cloud.objects.fail_next_puts(0);
        let report = x.sync.sync_now().await.unwrap();
        assert!(report.is_clean());
        assert!(cloud.authority.snapshot().contains("stuck.txt"));
    }

    #[tokio::test]
    async fn test_failed_download_is_retried_next_cycle() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        let y = cloud.device("y");
        x.write("big.bin", b"payload", 1).await;
        x.sync.sync_now().await.unwrap();

        cloud.objects.fail_next_gets(1);
        let report = y.sync.sync_now().await.unwrap();
        assert_eq!(report.failed.len(), 1);
        assert!(y.files.contents("big.bin").is_none());

        let report = y.sync.sync_now().await.unwrap();
        assert_eq!(report.downloaded, vec!["big.bin".to_string()]);
        assert_eq!(y.files.contents("big.bin").unwrap(), b"payload");
    }

    #[tokio::test]
    async fn test_remote_deletion_spares_local_edit() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        let y = cloud.device("y");
        x.write("shared.txt", b"v0", 0).await;
        x.sync.sync_now().await.unwrap();
        y.sync.sync_now().await.unwrap();

        x.delete("shared.txt").await;
        x.sync.sync_now().await.unwrap();
        y.write("shared.txt", b"kept", 4).await;
        let report = y.sync.sync_now().await.unwrap();

        assert_eq!(report.conflicts.len(), 1);
        assert_eq!(y.files.contents("shared.txt").unwrap(), b"kept");
        assert_eq!(
            cloud.authority.snapshot().get("shared.txt").unwrap().content_hash,
            content_hash(b"kept")
        );
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let cloud = Cloud::new();
        let store = Arc::new(MemoryTreeStore::new());
        {
            let x = cloud.device_with("x", store.clone());
            x.write("keep.txt", b"persisted", 1).await;
            x.sync.sync_now().await.unwrap();
        }

        let x = cloud.device_with("x", store);
        x.files.put_at("keep.txt", b"persisted".to_vec(), at(1)).unwrap();
        x.sync.load().await.unwrap();
        assert!(x.sync.local_tree().get("keep.txt").unwrap().is_uploaded());
        assert!(x.sync.pending_uploads().is_empty());
        let report = x.sync.sync_now().await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::Skipped);
    }

    #[tokio::test]
    async fn test_moved_persisted_tree_is_not_overwritten() {
        let cloud = Cloud::new();
        let store = Arc::new(MemoryTreeStore::new());
        let x = cloud.device_with("x", store.clone());
        x.write("a.txt", b"one", 1).await;
        x.sync.sync_now().await.unwrap();

        let saved = store.load_tree("local/x").await.unwrap();
        let mut other = Tree::new("elsewhere");
        other
            .upsert("theirs.txt", content_hash(b"theirs"), EntryMetadata::new(6, at(2)))
            .unwrap();
        other.set_version(saved.version() + 50);
        store.save_tree("local/x", &other, saved.version()).await.unwrap();

        x.write("b.txt", b"two", 3).await;
        let err = x.sync.sync_now().await.unwrap_err();
        assert!(err.is_version_conflict());
        let stored = store.load_tree("local/x").await.unwrap();
        assert!(stored.contains("theirs.txt"));
        assert_eq!(stored.version(), saved.version() + 50);
    }

    #[tokio::test]
    async fn test_rebuild_from_scan_keeps_known_keys() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        x.write("a.txt", b"one", 1).await;
        x.sync.sync_now().await.unwrap();

        x.files.put("b.txt", b"two".to_vec()).unwrap();
        let changed = x.sync.rebuild_from_scan().await.unwrap();
        assert_eq!(changed, 1);
        let local = x.sync.local_tree();
        assert!(local.get("a.txt").unwrap().is_uploaded());
        assert!(!local.get("b.txt").unwrap().is_uploaded());
        assert_eq!(x.sync.pending_uploads().len(), 1);
    }

    #[tokio::test]
    async fn test_unchanged_write_is_ignored() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        x.write("a.txt", b"same", 1).await;
        let version = x.sync.local_tree().version();
        x.files.put_at("a.txt", b"same".to_vec(), at(2)).unwrap();
        let change = x
            .sync
            .apply_local_change(ChangeEvent::Modified("a.txt".into()))
            .await
            .unwrap();
        assert_eq!(change, LocalChange::Unchanged("a.txt".into()));
        assert_eq!(x.sync.local_tree().version(), version);
    }

    #[tokio::test]
    async fn test_share_requires_stored_content() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        x.write("pic.png", b"png", 1).await;
        assert!(x.sync.share("pic.png", Duration::from_secs(60)).await.unwrap_err().is_not_found());

        x.sync.sync_now().await.unwrap();
        let descriptor = x.sync.share("pic.png", Duration::from_secs(60)).await.unwrap();
        assert!(!descriptor.is_expired(Utc::now()));
        assert!(x.sync.local_tree().get("pic.png").unwrap().mime_type.is_some());
    }

    /// Holds the first remote read until released
    struct GatedAuthority {
        inner: MemoryAuthority,
        entered: Notify,
        release: Notify,
        reads: std::sync::atomic::AtomicUsize,
    }

    #[async_trait::async_trait]
    impl AuthoritativeService for GatedAuthority {
        async fn get_remote_tree(&self, ctx: &RequestContext) -> Result<Tree, SyncError> {
            if self.reads.fetch_add(1, Ordering::SeqCst) == 0 {
                self.entered.notify_one();
                self.release.notified().await;
            }
            self.inner.get_remote_tree(ctx).await
        }

        async fn push_diff(
            &self,
            ctx: &RequestContext,
            diff: &DiffResult,
            expected_version: u64,
        ) -> Result<crate::store::PushReceipt, SyncError> {
            self.inner.push_diff(ctx, diff, expected_version).await
        }
    }

    #[tokio::test]
    async fn test_trigger_during_cycle_is_coalesced_into_one_rerun() {
        let authority = Arc::new(GatedAuthority {
            inner: MemoryAuthority::new(),
            entered: Notify::new(),
            release: Notify::new(),
            reads: Default::default(),
        });
        let files = Arc::new(MemoryFiles::new());
        let sync = SyncCoordinator::new(
            SyncOptions::new("x"),
            Collaborators {
                authority: authority.clone(),
                objects: Arc::new(MemoryObjectStore::new()),
                tree_store: Arc::new(MemoryTreeStore::new()),
                files: files.clone(),
            },
        );
        files.put_at("a.txt", b"alpha".to_vec(), at(1)).unwrap();
        sync.apply_local_change(ChangeEvent::Modified("a.txt".into()))
            .await
            .unwrap();

        let (first, second) = tokio::join!(sync.sync_now(), async {
            authority.entered.notified().await;
            let second = sync.sync_now().await;
            authority.release.notify_one();
            second
        });

        let second = second.unwrap();
        assert_eq!(second.outcome, CycleOutcome::Coalesced);
        assert_eq!(second.cycles, 0);

        let first = first.unwrap();
        assert_eq!(first.outcome, CycleOutcome::Synced);
        assert_eq!(first.cycles, 2);
        assert_eq!(authority.reads.load(Ordering::SeqCst), 2);
        assert_eq!(authority.inner.push_count(), 1);
    }

    #[tokio::test]
    async fn test_shutdown_stops_cycles() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        x.write("a.txt", b"queued", 1).await;
        x.sync.shutdown();
        let report = x.sync.sync_now().await.unwrap();
        assert_eq!(report.outcome, CycleOutcome::Cancelled);
        assert_eq!(x.sync.state(), SyncState::Stopped);
        assert_eq!(cloud.authority.push_count(), 0);
    }

    #[tokio::test]
    async fn test_run_loop_exits_on_shutdown_signal() {
        let cloud = Cloud::new();
        let x = Arc::new(cloud.device("x"));
        let (tx, rx) = watch::channel(false);
        let runner = {
            let x = x.clone();
            tokio::spawn(async move { x.sync.run(rx).await })
        };
        x.write("a.txt", b"loop", 1).await;
        x.sync.request_sync();
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), runner)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(x.sync.state(), SyncState::Stopped);
        assert!(cloud.authority.snapshot().contains("a.txt"));
    }

    #[tokio::test]
    async fn test_feed_events_are_batched_into_the_tree() {
        let cloud = Cloud::new();
        let x = cloud.device("x");
        x.files.put("a.txt", b"1".to_vec()).unwrap();
        x.files.put("b.txt", b"2".to_vec()).unwrap();
        let events = futures::stream::iter(vec![
            ChangeEvent::Created("a.txt".into()),
            ChangeEvent::Modified("a.txt".into()),
            ChangeEvent::Created("b.txt".into()),
        ]);
        let config = WatchConfig {
            debounce_ms: 0,
            batch_window_ms: 10,
            ..WatchConfig::default()
        };
        x.sync.consume_feed(events, &config).await.unwrap();
        let local = x.sync.local_tree();
        assert!(local.contains("a.txt") && local.contains("b.txt"));
        assert_eq!(x.sync.pending_uploads().len(), 2);
    }
}
