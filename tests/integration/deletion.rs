use crate::common::Cloud;

#[tokio::test]
async fn test_removal_reaches_authority_and_third_device() {
    let cloud = Cloud::new();
    let x = cloud.device("x");
    let z = cloud.device("z");
    x.write("a.txt", b"a", 1).await;
    x.write("c.txt", b"c", 1).await;
    x.sync().await;
    z.sync().await;
    assert!(z.files.contents("c.txt").is_some());

    x.delete("c.txt").await;
    x.sync().await;
    assert!(!cloud.authority.snapshot().contains("c.txt"));
    assert!(cloud.authority.snapshot().contains("a.txt"));

    let report = z.sync().await;
    assert_eq!(report.deleted_locally, vec!["c.txt".to_string()]);
    assert!(z.files.contents("c.txt").is_none());
    assert!(z.files.contents("a.txt").is_some());
    assert_eq!(z.root(), cloud.root());
    assert_eq!(x.root(), cloud.root());
}

#[tokio::test]
async fn test_removed_content_stays_in_object_store() {
    let cloud = Cloud::new();
    let x = cloud.device("x");
    x.write("gone.txt", b"bytes", 1).await;
    x.sync().await;
    assert_eq!(cloud.objects.len(), 1);

    x.delete("gone.txt").await;
    x.sync().await;
    assert!(cloud.authority.snapshot().is_empty());
    assert_eq!(cloud.objects.len(), 1);
}

#[tokio::test]
async fn test_delete_then_recreate_reuses_stored_object() {
    let cloud = Cloud::new();
    let x = cloud.device("x");
    x.write("a.txt", b"same bytes", 1).await;
    x.sync().await;
    x.delete("a.txt").await;
    x.sync().await;

    x.write("a.txt", b"same bytes", 9).await;
    let report = x.sync().await;
    assert_eq!(report.objects_put, 0);
    assert!(cloud.authority.snapshot().contains("a.txt"));
    assert_eq!(cloud.objects.put_count(), 1);
}
