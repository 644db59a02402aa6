//! Pending Upload Tracking
//!
//! Tracks entries whose content is committed locally but not yet confirmed in
//! the object store. Uploads are keyed by content: one stored object serves any
//! number of paths, and content already stored is never uploaded again.

use crate::error::SyncError;
use crate::tree::Tree;
use crate::types::{Digest, ObjectKey};
use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Exponential backoff policy for upload retries
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Attempts per round before the entry is reported as failed
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt following failure number `attempt` (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let scaled = self.initial_delay.as_millis() as f64 * self.multiplier.powi(exponent);
        let capped = scaled.min(self.max_delay.as_millis() as f64).max(0.0);
        Duration::from_millis(capped.round() as u64)
    }
}

/// One entry awaiting upload confirmation
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpload {
    pub path: String,
    pub content_hash: Digest,
    /// Failed attempts in the current round
    pub attempts: u32,
    /// Rounds that ended in `UploadFailed`
    pub failed_rounds: u32,
    pub last_error: Option<String>,
    pub retry_at: Option<Instant>,
}

/// Result of marking an entry pending
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    /// Needs an upload
    Queued,
    /// Identical content is already stored under this key
    Reused(ObjectKey),
}

/// Result of recording a failed upload attempt
#[derive(Debug)]
pub enum FailureOutcome {
    /// Try again after the given delay
    RetryAfter(Duration),
    /// Attempt budget spent; surfaced to the caller, entry stays pending
    Exhausted(SyncError),
}

/// Tracker for entries whose remote key is still unknown
pub struct PendingUploadTracker {
    pending: BTreeMap<String, PendingUpload>,
    /// Content already confirmed in the object store
    known_keys: HashMap<Digest, ObjectKey>,
    policy: RetryPolicy,
}

impl PendingUploadTracker {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            pending: BTreeMap::new(),
            known_keys: HashMap::new(),
            policy,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Rebuild state from a tree: confirmed keys are learned, the rest is pending
    pub fn restore_from(&mut self, tree: &Tree) {
        for entry in tree.entries().values() {
            if let Some(key) = &entry.remote_key {
                self.learn_key(entry.content_hash, key.clone());
            }
        }
        for entry in tree.entries().values() {
            if entry.remote_key.is_none() {
                self.mark_pending(&entry.path, entry.content_hash);
            }
        }
    }

    /// Record that `hash` is stored under `key`
    pub fn learn_key(&mut self, hash: Digest, key: ObjectKey) {
        self.known_keys.entry(hash).or_insert(key);
    }

    pub fn known_key(&self, hash: &Digest) -> Option<&ObjectKey> {
        self.known_keys.get(hash)
    }

    /// Mark `path` as awaiting upload of `hash`
    ///
    /// Content that is already stored resolves immediately and is not queued.
    pub fn mark_pending(&mut self, path: &str, hash: Digest) -> MarkOutcome {
        if let Some(key) = self.known_keys.get(&hash) {
            self.pending.remove(path);
            debug!(path, hash = %hash.short(), key = %key, "Reusing stored content");
            return MarkOutcome::Reused(key.clone());
        }

        match self.pending.get_mut(path) {
            Some(existing) if existing.content_hash == hash => {}
            _ => {
                self.pending.insert(
                    path.to_string(),
                    PendingUpload {
                        path: path.to_string(),
                        content_hash: hash,
                        attempts: 0,
                        failed_rounds: 0,
                        last_error: None,
                        retry_at: None,
                    },
                );
            }
        }
        MarkOutcome::Queued
    }

    /// Confirm the upload for `path`
    ///
    /// Every other pending path with the same content resolves with the same key.
    /// Returns all resolved paths; empty when `path` was not pending.
    pub fn resolve(&mut self, path: &str, key: ObjectKey) -> Vec<String> {
        let Some(upload) = self.pending.remove(path) else {
            return Vec::new();
        };
        self.resolve_hash(upload.content_hash, key, Some(upload.path))
    }

    /// Confirm that `hash` is stored, resolving every path waiting on it
    pub fn resolve_hash(
        &mut self,
        hash: Digest,
        key: ObjectKey,
        first: Option<String>,
    ) -> Vec<String> {
        self.known_keys.insert(hash, key);
        let mut resolved: Vec<String> = first.into_iter().collect();
        let siblings: Vec<String> = self
            .pending
            .values()
            .filter(|p| p.content_hash == hash)
            .map(|p| p.path.clone())
            .collect();
        for path in siblings {
            self.pending.remove(&path);
            resolved.push(path);
        }
        resolved
    }

    /// Stop tracking `path` (deleted locally, or content changed)
    pub fn forget(&mut self, path: &str) -> Option<PendingUpload> {
        self.pending.remove(path)
    }

    pub fn is_pending(&self, path: &str) -> bool {
        self.pending.contains_key(path)
    }

    pub fn get(&self, path: &str) -> Option<&PendingUpload> {
        self.pending.get(path)
    }

    pub fn pending_entries(&self) -> impl Iterator<Item = &PendingUpload> {
        self.pending.values()
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Pending paths grouped by content, so each hash is uploaded once
    pub fn pending_by_hash(&self) -> BTreeMap<Digest, Vec<String>> {
        let mut groups: BTreeMap<Digest, Vec<String>> = BTreeMap::new();
        for upload in self.pending.values() {
            groups
                .entry(upload.content_hash)
                .or_default()
                .push(upload.path.clone());
        }
        groups
    }

    /// Whether `path` may be attempted now
    pub fn is_ready(&self, path: &str, now: Instant) -> bool {
        match self.pending.get(path) {
            Some(upload) => upload.retry_at.map(|at| at <= now).unwrap_or(true),
            None => false,
        }
    }

    /// Record a failed attempt for `path`
    pub fn record_failure(&mut self, path: &str, reason: impl Into<String>) -> FailureOutcome {
        let reason = reason.into();
        let Some(upload) = self.pending.get_mut(path) else {
            return FailureOutcome::Exhausted(SyncError::NotFound(format!(
                "pending upload {}",
                path
            )));
        };

        upload.attempts += 1;
        upload.last_error = Some(reason.clone());

        if upload.attempts >= self.policy.max_attempts {
            upload.failed_rounds += 1;
            upload.attempts = 0;
            upload.retry_at = None;
            warn!(
                path,
                failed_rounds = upload.failed_rounds,
                error = %reason,
                "Upload attempts exhausted"
            );
            return FailureOutcome::Exhausted(SyncError::UploadFailed {
                path: path.to_string(),
                reason,
            });
        }

        let delay = self.policy.delay_for(upload.attempts);
        upload.retry_at = Some(Instant::now() + delay);
        debug!(
            path,
            attempt = upload.attempts,
            delay_ms = delay.as_millis() as u64,
            "Upload attempt failed, backing off"
        );
        FailureOutcome::RetryAfter(delay)
    }
}

impl Default for PendingUploadTracker {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}
