//! hashsync: Hash-Tree Reconciliation Engine
//!
//! Multi-device file-state reconciliation over content-addressed hash trees.
//! Each device keeps a tree of the files it knows about; the sync coordinator
//! compares it against a shared authoritative tree and moves only what changed,
//! staying correct while uploads are in flight, devices are offline, or two
//! devices edit the same file.

pub mod concurrency;
pub mod config;
pub mod diff;
pub mod error;
pub mod gc;
pub mod keys;
pub mod logging;
pub mod pending;
pub mod store;
pub mod sync;
pub mod tooling;
pub mod tree;
pub mod types;
pub mod workspace;

pub use diff::{diff, DiffResult};
pub use error::{StorageError, SyncError};
pub use sync::{Collaborators, CycleReport, SyncCoordinator, SyncOptions};
pub use tree::{FileEntry, Tree};
