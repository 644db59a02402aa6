use crate::common::Cloud;
use hashsync::sync::{CycleOutcome, Winner};

#[tokio::test]
async fn test_three_parties_reach_one_root() {
    let cloud = Cloud::new();
    let x = cloud.device("x");
    let y = cloud.device("y");
    x.write("a.txt", b"written on x", 1).await;
    y.write("b.txt", b"written on y", 2).await;

    x.sync().await;
    y.sync().await;
    x.sync().await;

    assert_eq!(x.root(), cloud.root());
    assert_eq!(y.root(), cloud.root());
    let remote = cloud.authority.snapshot();
    assert!(remote.contains("a.txt"));
    assert!(remote.contains("b.txt"));
}

#[tokio::test]
async fn test_root_ignores_device_local_fields() {
    let cloud = Cloud::new();
    let x = cloud.device("x");
    let y = cloud.device("y");
    x.write("docs/readme.md", b"# hello", 3).await;
    x.sync().await;
    y.sync().await;

    let on_x = x.sync.local_tree();
    let on_y = y.sync.local_tree();
    let entry_x = on_x.get("docs/readme.md").unwrap();
    let entry_y = on_y.get("docs/readme.md").unwrap();
    assert!(entry_x.local_ref.is_some());
    assert!(entry_y.local_ref.is_some());
    assert_eq!(on_x.root_hash(), on_y.root_hash());
    assert!(cloud.authority.snapshot().get("docs/readme.md").unwrap().local_ref.is_none());
}

#[tokio::test]
async fn test_settled_devices_skip_cycles() {
    let cloud = Cloud::new();
    let x = cloud.device("x");
    let y = cloud.device("y");
    x.write("a.txt", b"one", 1).await;
    x.sync().await;
    y.sync().await;

    let pushes = cloud.authority.push_count();
    assert_eq!(x.sync().await.outcome, CycleOutcome::Skipped);
    assert_eq!(y.sync().await.outcome, CycleOutcome::Skipped);
    assert_eq!(cloud.authority.push_count(), pushes);
}

#[tokio::test]
async fn test_edit_propagates_as_modification() {
    let cloud = Cloud::new();
    let x = cloud.device("x");
    let y = cloud.device("y");
    x.write("notes.txt", b"draft", 1).await;
    x.sync().await;
    y.sync().await;

    x.write("notes.txt", b"final", 5).await;
    let report = x.sync().await;
    assert_eq!(report.pushed, 1);

    let report = y.sync().await;
    assert_eq!(report.downloaded, vec!["notes.txt".to_string()]);
    assert_eq!(y.files.contents("notes.txt").unwrap(), b"final");
    assert_eq!(y.root(), cloud.root());
}

#[tokio::test]
async fn test_devices_without_a_base_converge_on_a_seeded_authority() {
    let cloud = Cloud::new();
    let seed = cloud.device("seed");
    seed.write("a.txt", b"first a", 1).await;
    seed.write("b.txt", b"shared b", 1).await;
    seed.sync().await;

    let x = cloud.device("x");
    let y = cloud.device("y");
    x.write("a.txt", b"first a", 2).await;
    y.write("a.txt", b"second a", 5).await;
    y.write("b.txt", b"shared b", 3).await;

    let report = x.sync().await;
    assert_eq!(report.downloaded, vec!["b.txt".to_string()]);
    assert!(report.conflicts.is_empty());

    let report = y.sync().await;
    assert_eq!(report.conflicts.len(), 1);
    let conflict = &report.conflicts[0];
    assert_eq!(conflict.path, "a.txt");
    assert_eq!(conflict.winner, Winner::Local);
    let copy = conflict.copy_path.clone().unwrap();
    assert_eq!(y.files.contents(&copy).unwrap(), b"first a");
    assert_eq!(y.files.contents("a.txt").unwrap(), b"second a");

    x.sync().await;
    seed.sync().await;
    assert_eq!(x.root(), cloud.root());
    assert_eq!(y.root(), cloud.root());
    assert_eq!(seed.root(), cloud.root());
    assert_eq!(x.files.contents("a.txt").unwrap(), b"second a");
    assert_eq!(x.files.contents(&copy).unwrap(), b"first a");
}
