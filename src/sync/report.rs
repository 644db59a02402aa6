//! Cycle reports.

use crate::error::SyncError;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// How a cycle ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleOutcome {
    /// Nothing changed on either side
    Skipped,
    /// Differences were exchanged (possibly with per-file failures)
    Synced,
    /// Another cycle was running; this trigger was folded into it
    Coalesced,
    /// Shutdown interrupted the cycle between steps
    Cancelled,
}

/// Which side of a conflict prevailed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Winner {
    Local,
    Remote,
}

/// A concurrent change resolved by last-writer-wins
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConflictRecord {
    pub path: String,
    pub winner: Winner,
    /// Where the losing content was preserved; `None` when the loser was a deletion
    pub copy_path: Option<String>,
}

/// A per-file failure; the path is retried by a later cycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PathFailure {
    pub path: String,
    pub error: String,
    pub retryable: bool,
}

impl PathFailure {
    pub fn new(path: impl Into<String>, error: &SyncError) -> Self {
        Self {
            path: path.into(),
            error: error.to_string(),
            retryable: error.is_retryable(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CycleReport {
    pub outcome: CycleOutcome,
    /// Cycles folded into this report (coalesced reruns included)
    pub cycles: u32,
    /// Authoritative version after the cycle
    pub remote_version: u64,
    pub downloaded: Vec<String>,
    pub deleted_locally: Vec<String>,
    /// Paths whose content was confirmed stored this cycle
    pub uploaded: Vec<String>,
    /// Physical uploads performed (one per distinct content)
    pub objects_put: usize,
    /// Entries in the accepted push
    pub pushed: usize,
    pub conflicts: Vec<ConflictRecord>,
    pub lost_updates: Vec<String>,
    pub failed: Vec<PathFailure>,
    /// Queued transfers skipped because of shutdown
    pub abandoned: usize,
    /// Pushes lost to a concurrent writer and retried
    pub version_conflicts: u32,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl CycleReport {
    pub fn new(outcome: CycleOutcome) -> Self {
        Self {
            outcome,
            cycles: 1,
            remote_version: 0,
            downloaded: Vec::new(),
            deleted_locally: Vec::new(),
            uploaded: Vec::new(),
            objects_put: 0,
            pushed: 0,
            conflicts: Vec::new(),
            lost_updates: Vec::new(),
            failed: Vec::new(),
            abandoned: 0,
            version_conflicts: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn coalesced() -> Self {
        Self {
            cycles: 0,
            ..Self::new(CycleOutcome::Coalesced)
        }
    }

    /// No per-file failures and nothing abandoned
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty() && self.abandoned == 0
    }

    /// Whether anything moved in either direction
    pub fn has_changes(&self) -> bool {
        !self.downloaded.is_empty()
            || !self.deleted_locally.is_empty()
            || !self.uploaded.is_empty()
            || self.pushed > 0
    }

    /// Fold a follow-up cycle into this report; the later outcome wins unless it skipped
    pub fn absorb(&mut self, next: CycleReport) {
        if next.outcome != CycleOutcome::Skipped || self.outcome == CycleOutcome::Coalesced {
            self.outcome = next.outcome;
        }
        self.cycles += next.cycles;
        self.remote_version = next.remote_version;
        self.downloaded.extend(next.downloaded);
        self.deleted_locally.extend(next.deleted_locally);
        self.uploaded.extend(next.uploaded);
        self.objects_put += next.objects_put;
        self.pushed += next.pushed;
        self.conflicts.extend(next.conflicts);
        self.lost_updates.extend(next.lost_updates);
        self.failed = next.failed;
        self.abandoned = next.abandoned;
        self.version_conflicts += next.version_conflicts;
        self.elapsed += next.elapsed;
    }
}

impl fmt::Display for CycleReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?}: {} down, {} deleted, {} up ({} objects), {} pushed, {} conflicts, {} failed (remote v{})",
            self.outcome,
            self.downloaded.len(),
            self.deleted_locally.len(),
            self.uploaded.len(),
            self.objects_put,
            self.pushed,
            self.conflicts.len(),
            self.failed.len(),
            self.remote_version
        )
    }
}
