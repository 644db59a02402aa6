use chrono::{DateTime, TimeZone, Utc};
use hashsync::pending::RetryPolicy;
use hashsync::store::memory::{MemoryAuthority, MemoryObjectStore, MemoryTreeStore};
use hashsync::store::AuthoritativeService;
use hashsync::sync::{Collaborators, CycleReport, SyncCoordinator, SyncOptions};
use hashsync::workspace::{ChangeEvent, MemoryFiles};
use std::sync::Arc;
use std::time::Duration;

/// Shared authoritative tree and object store
pub struct Cloud {
    pub authority: Arc<MemoryAuthority>,
    pub objects: Arc<MemoryObjectStore>,
}

pub struct Device {
    pub files: Arc<MemoryFiles>,
    pub sync: SyncCoordinator,
}

pub fn fast_options(id: &str) -> SyncOptions {
    let mut options = SyncOptions::new(id);
    options.retry = RetryPolicy {
        max_attempts: 3,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        multiplier: 2.0,
    };
    options
}

impl Cloud {
    pub fn new() -> Self {
        Self {
            authority: Arc::new(MemoryAuthority::new()),
            objects: Arc::new(MemoryObjectStore::new()),
        }
    }

    pub fn device(&self, id: &str) -> Device {
        self.device_via(id, self.authority.clone(), fast_options(id))
    }

    /// A device whose pushes go through `authority` instead of the shared one
    pub fn device_via(
        &self,
        id: &str,
        authority: Arc<dyn AuthoritativeService>,
        options: SyncOptions,
    ) -> Device {
        let files = Arc::new(MemoryFiles::new());
        let sync = SyncCoordinator::new(
            options,
            Collaborators {
                authority,
                objects: self.objects.clone(),
                tree_store: Arc::new(MemoryTreeStore::new()),
                files: files.clone(),
            },
        );
        Device { files, sync }
    }

    pub fn root(&self) -> hashsync::types::Digest {
        self.authority.snapshot().root_hash()
    }
}

pub fn at(minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 5, 1, 12, minute, 0).unwrap()
}

impl Device {
    pub async fn write(&self, path: &str, bytes: &[u8], minute: u32) {
        self.files.put_at(path, bytes.to_vec(), at(minute)).unwrap();
        self.sync
            .apply_local_change(ChangeEvent::Modified(path.to_string()))
            .await
            .unwrap();
    }

    pub async fn delete(&self, path: &str) {
        self.files.delete(path);
        self.sync
            .apply_local_change(ChangeEvent::Deleted(path.to_string()))
            .await
            .unwrap();
    }

    pub async fn sync(&self) -> CycleReport {
        self.sync.sync_now().await.unwrap()
    }

    pub fn root(&self) -> hashsync::types::Digest {
        self.sync.local_tree().root_hash()
    }
}
