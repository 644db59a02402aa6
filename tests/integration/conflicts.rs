use crate::common::Cloud;
use hashsync::tree::hasher::content_hash;
use hashsync::tree::path::conflict_copy_path;
use hashsync::sync::Winner;

#[tokio::test]
async fn test_concurrent_edits_keep_both_contents_everywhere() {
    let cloud = Cloud::new();
    let x = cloud.device("x");
    let y = cloud.device("y");
    x.write("plan.md", b"v0", 0).await;
    x.sync().await;
    y.sync().await;

    x.write("plan.md", b"x version", 10).await;
    y.write("plan.md", b"y version", 20).await;
    x.sync().await;
    let report = y.sync().await;

    assert_eq!(report.conflicts.len(), 1);
    assert_eq!(report.conflicts[0].winner, Winner::Local);
    let copy = conflict_copy_path("plan.md", &content_hash(b"x version").short());
    x.sync().await;

    for device in [&x, &y] {
        assert_eq!(device.files.contents("plan.md").unwrap(), b"y version");
        assert_eq!(device.files.contents(&copy).unwrap(), b"x version");
        assert_eq!(device.root(), cloud.root());
    }
}

#[tokio::test]
async fn test_equal_timestamps_resolve_the_same_way_on_every_device() {
    let cloud = Cloud::new();
    let x = cloud.device("x");
    let y = cloud.device("y");
    x.write("tie.txt", b"v0", 0).await;
    x.sync().await;
    y.sync().await;

    x.write("tie.txt", b"left", 30).await;
    y.write("tie.txt", b"right", 30).await;
    x.sync().await;
    let report = y.sync().await;
    x.sync().await;

    assert_eq!(report.conflicts.len(), 1);
    let (winner, loser): (&[u8], &[u8]) = if content_hash(b"left") > content_hash(b"right") {
        (b"left", b"right")
    } else {
        (b"right", b"left")
    };
    let copy = conflict_copy_path("tie.txt", &content_hash(loser).short());
    for device in [&x, &y] {
        assert_eq!(device.files.contents("tie.txt").unwrap(), winner);
        assert_eq!(device.files.contents(&copy).unwrap(), loser);
    }
    assert_eq!(x.root(), y.root());
    assert_eq!(x.root(), cloud.root());
}

#[tokio::test]
async fn test_identical_concurrent_edits_are_not_conflicts() {
    let cloud = Cloud::new();
    let x = cloud.device("x");
    let y = cloud.device("y");
    x.write("same.txt", b"v0", 0).await;
    x.sync().await;
    y.sync().await;

    x.write("same.txt", b"agreed", 7).await;
    y.write("same.txt", b"agreed", 8).await;
    x.sync().await;
    let report = y.sync().await;

    assert!(report.conflicts.is_empty());
    assert!(y.sync.pending_uploads().is_empty());
    assert_eq!(cloud.objects.put_count(), 2);
    assert_eq!(y.files.contents("same.txt").unwrap(), b"agreed");
}
