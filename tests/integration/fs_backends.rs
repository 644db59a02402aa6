use hashsync::gc::collect_garbage;
use hashsync::store::objects::FsObjectStore;
use hashsync::store::persistence::{SledAuthority, SledTreeStore};
use hashsync::store::{AuthoritativeService, ObjectStore};
use hashsync::sync::{Collaborators, CycleOutcome, SyncCoordinator};
use hashsync::types::RequestContext;
use hashsync::workspace::{IgnoreRules, WorkspaceFs};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;

struct Shared {
    _dir: TempDir,
    authority: Arc<SledAuthority>,
    objects: Arc<FsObjectStore>,
}

struct DiskDevice {
    root: PathBuf,
    sync: SyncCoordinator,
}

impl Shared {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let authority = Arc::new(SledAuthority::open(&dir.path().join("authority")).unwrap());
        let objects = Arc::new(FsObjectStore::new(dir.path().join("objects"), b"test secret"));
        Self {
            _dir: dir,
            authority,
            objects,
        }
    }

    fn device(&self, parent: &Path, id: &str) -> DiskDevice {
        let root = parent.join(id).join("workspace");
        std::fs::create_dir_all(&root).unwrap();
        let tree_store = SledTreeStore::open(&parent.join(id).join("state")).unwrap();
        let sync = SyncCoordinator::new(
            crate::common::fast_options(id),
            Collaborators {
                authority: self.authority.clone(),
                objects: self.objects.clone(),
                tree_store: Arc::new(tree_store),
                files: Arc::new(WorkspaceFs::new(&root, IgnoreRules::default())),
            },
        );
        DiskDevice { root, sync }
    }
}

impl DiskDevice {
    fn write(&self, path: &str, bytes: &[u8]) {
        let full = self.root.join(path);
        std::fs::create_dir_all(full.parent().unwrap()).unwrap();
        std::fs::write(full, bytes).unwrap();
    }

    fn read(&self, path: &str) -> Option<Vec<u8>> {
        std::fs::read(self.root.join(path)).ok()
    }

    async fn scan_and_sync(&self) -> hashsync::CycleReport {
        self.sync.rebuild_from_scan().await.unwrap();
        self.sync.sync_now().await.unwrap()
    }
}

#[tokio::test]
async fn test_files_flow_between_workspaces_on_disk() {
    let shared = Shared::new();
    let devices = TempDir::new().unwrap();
    let x = shared.device(devices.path(), "x");
    let y = shared.device(devices.path(), "y");

    x.write("docs/guide.md", b"# Guide");
    x.write("data/nested/table.csv", b"a,b\n1,2\n");
    let report = x.scan_and_sync().await;
    assert_eq!(report.objects_put, 2);

    let report = y.scan_and_sync().await;
    assert_eq!(report.downloaded.len(), 2);
    assert_eq!(y.read("docs/guide.md").unwrap(), b"# Guide");
    assert_eq!(y.read("data/nested/table.csv").unwrap(), b"a,b\n1,2\n");

    let ctx = RequestContext::new("check");
    let remote = shared.authority.get_remote_tree(&ctx).await.unwrap();
    assert_eq!(x.sync.local_tree().root_hash(), remote.root_hash());
    assert_eq!(y.sync.local_tree().root_hash(), remote.root_hash());
}

#[tokio::test]
async fn test_disk_deletion_propagates_and_gc_sweeps_the_object() {
    let shared = Shared::new();
    let devices = TempDir::new().unwrap();
    let x = shared.device(devices.path(), "x");
    let y = shared.device(devices.path(), "y");

    x.write("keep.txt", b"keep");
    x.write("drop.txt", b"drop");
    x.scan_and_sync().await;
    y.scan_and_sync().await;
    assert!(y.read("drop.txt").is_some());

    std::fs::remove_file(x.root.join("drop.txt")).unwrap();
    x.scan_and_sync().await;
    let report = y.scan_and_sync().await;
    assert_eq!(report.deleted_locally, vec!["drop.txt".to_string()]);
    assert!(y.read("drop.txt").is_none());
    assert_eq!(shared.objects.list_keys().await.unwrap().len(), 2);

    let remote = shared
        .authority
        .get_remote_tree(&RequestContext::new("gc"))
        .await
        .unwrap();
    let x_local = x.sync.local_tree();
    let y_local = y.sync.local_tree();
    let gc = collect_garbage(shared.objects.as_ref(), [&remote, &*x_local, &*y_local], false)
        .await
        .unwrap();
    assert_eq!(gc.unreferenced.len(), 1);
    assert_eq!(shared.objects.list_keys().await.unwrap().len(), 1);
    assert_eq!(y.read("keep.txt").unwrap(), b"keep");
}

#[tokio::test]
async fn test_unchanged_workspace_skips_after_rescan() {
    let shared = Shared::new();
    let devices = TempDir::new().unwrap();
    let x = shared.device(devices.path(), "x");
    x.write("a.txt", b"a");
    x.scan_and_sync().await;

    let report = x.scan_and_sync().await;
    assert_eq!(report.outcome, CycleOutcome::Skipped);
}

#[tokio::test]
async fn test_sled_authority_rejects_stale_push() {
    let shared = Shared::new();
    let devices = TempDir::new().unwrap();
    let x = shared.device(devices.path(), "x");
    x.write("a.txt", b"a");
    x.scan_and_sync().await;

    let ctx = RequestContext::new("stale");
    let before = shared.authority.get_remote_tree(&ctx).await.unwrap();
    assert_eq!(before.version(), 1);
    let change = hashsync::diff(&hashsync::Tree::new("empty"), &before);
    let err = shared.authority.push_diff(&ctx, &change, 0).await.unwrap_err();
    assert!(err.is_version_conflict());

    let after = shared.authority.get_remote_tree(&ctx).await.unwrap();
    assert_eq!(after.version(), before.version());
    assert_eq!(after.root_hash(), before.root_hash());
}
