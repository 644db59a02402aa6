use crate::common::{fast_options, Cloud};
use async_trait::async_trait;
use chrono::Utc;
use hashsync::diff::{diff, DiffResult};
use hashsync::store::memory::{MemoryAuthority, AUTHORITATIVE_DEVICE};
use hashsync::store::{AuthoritativeService, ObjectStore, PushReceipt};
use hashsync::tree::hasher::content_hash;
use hashsync::tree::{EntryMetadata, Tree};
use hashsync::types::{ObjectKey, RequestContext};
use hashsync::SyncError;
use parking_lot::Mutex;
use std::sync::Arc;

/// Authority where another writer lands just before our first push
struct RacingAuthority {
    inner: Arc<MemoryAuthority>,
    interloper: Mutex<Option<DiffResult>>,
}

#[async_trait]
impl AuthoritativeService for RacingAuthority {
    async fn get_remote_tree(&self, ctx: &RequestContext) -> Result<Tree, SyncError> {
        self.inner.get_remote_tree(ctx).await
    }

    async fn push_diff(
        &self,
        ctx: &RequestContext,
        diff: &DiffResult,
        expected_version: u64,
    ) -> Result<PushReceipt, SyncError> {
        let interloper = self.interloper.lock().take();
        if let Some(change) = interloper {
            let version = self.inner.snapshot().version();
            self.inner
                .push_diff(&RequestContext::new("interloper"), &change, version)
                .await?;
        }
        self.inner.push_diff(ctx, diff, expected_version).await
    }
}

/// Authority that loses every push race
struct AlwaysStale {
    inner: Arc<MemoryAuthority>,
}

#[async_trait]
impl AuthoritativeService for AlwaysStale {
    async fn get_remote_tree(&self, ctx: &RequestContext) -> Result<Tree, SyncError> {
        self.inner.get_remote_tree(ctx).await
    }

    async fn push_diff(
        &self,
        _ctx: &RequestContext,
        _diff: &DiffResult,
        expected_version: u64,
    ) -> Result<PushReceipt, SyncError> {
        Err(SyncError::VersionConflict {
            expected: expected_version,
            actual: expected_version + 1,
        })
    }
}

fn stored_entry(path: &str, content: &[u8], key: &ObjectKey) -> Tree {
    let mut tree = Tree::new("other");
    tree.upsert(path, content_hash(content), EntryMetadata::new(content.len() as u64, Utc::now()))
        .unwrap();
    tree.set_remote_key(path, key.clone()).unwrap();
    tree
}

#[tokio::test]
async fn test_stale_push_is_rejected_and_leaves_tree_unchanged() {
    let authority = MemoryAuthority::new();
    let ctx = RequestContext::new("x");
    let empty = Tree::new(AUTHORITATIVE_DEVICE);
    let key = ObjectKey::new("objects/sha256/first");

    let first = diff(&empty, &stored_entry("a.txt", b"a", &key));
    let receipt = authority.push_diff(&ctx, &first, 0).await.unwrap();
    assert_eq!(receipt.version, 1);
    let before = authority.snapshot();

    let second = diff(&empty, &stored_entry("b.txt", b"b", &key));
    let err = authority.push_diff(&ctx, &second, 0).await.unwrap_err();
    assert!(err.is_version_conflict());
    let after = authority.snapshot();
    assert_eq!(after.version(), before.version());
    assert_eq!(after.root_hash(), before.root_hash());
    assert!(!after.contains("b.txt"));
}

#[tokio::test]
async fn test_lost_race_is_rediffed_and_pushed() {
    let cloud = Cloud::new();
    let bytes = b"landed first".to_vec();
    let key = ObjectKey::new(format!("objects/sha256/{}", content_hash(&bytes).to_hex()));
    cloud.objects.put(&key, bytes.clone()).await.unwrap();
    let interloper = diff(&Tree::new("other"), &stored_entry("race.txt", &bytes, &key));

    let racing = Arc::new(RacingAuthority {
        inner: cloud.authority.clone(),
        interloper: Mutex::new(Some(interloper)),
    });
    let x = cloud.device_via("x", racing, fast_options("x"));
    x.write("mine.txt", b"pushed second", 1).await;

    let report = x.sync().await;
    assert_eq!(report.version_conflicts, 1);
    assert_eq!(report.downloaded, vec!["race.txt".to_string()]);

    let remote = cloud.authority.snapshot();
    assert_eq!(remote.version(), 2);
    assert!(remote.contains("race.txt"));
    assert!(remote.contains("mine.txt"));
    assert_eq!(x.files.contents("race.txt").unwrap(), bytes);
    assert_eq!(x.root(), remote.root_hash());
}

#[tokio::test]
async fn test_exhausted_conflict_budget_fails_the_cycle() {
    let cloud = Cloud::new();
    let stale = Arc::new(AlwaysStale {
        inner: cloud.authority.clone(),
    });
    let mut options = fast_options("x");
    options.conflict_retry_budget = 2;
    let x = cloud.device_via("x", stale, options);
    x.write("never.txt", b"blocked", 1).await;

    let err = x.sync.sync_now().await.unwrap_err();
    assert!(err.is_version_conflict());
    assert_eq!(cloud.authority.push_count(), 0);
    assert!(cloud.authority.snapshot().is_empty());
    assert!(x.sync.local_tree().contains("never.txt"));
}
