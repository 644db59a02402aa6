//! Sync engine: the coordinator and the pieces each cycle is built from.

mod conflict;
mod coordinator;
mod pool;
mod report;
mod transfer;

pub use conflict::{local_wins, reconcile, Download, LocalCopy, LocalDeletion, ReconcilePlan};
pub use coordinator::{Collaborators, LocalChange, SyncCoordinator, SyncOptions, SyncState};
pub use pool::{Cancellation, TaskOutcome, TransferPool};
pub use report::{ConflictRecord, CycleOutcome, CycleReport, PathFailure, Winner};
