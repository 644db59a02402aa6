//! End-to-end reconciliation scenarios across several devices.

mod common;
mod conflicts;
mod content_reuse;
mod convergence;
mod deletion;
mod fs_backends;
mod properties;
mod version_conflict;
