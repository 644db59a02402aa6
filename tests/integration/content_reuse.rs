use crate::common::Cloud;

#[tokio::test]
async fn test_same_content_at_two_paths_is_put_once() {
    let cloud = Cloud::new();
    let x = cloud.device("x");
    x.write("one/copy.bin", b"identical payload", 1).await;
    x.write("two/copy.bin", b"identical payload", 1).await;

    let report = x.sync().await;
    assert_eq!(report.objects_put, 1);
    assert_eq!(cloud.objects.put_count(), 1);

    let remote = cloud.authority.snapshot();
    let first = remote.get("one/copy.bin").unwrap().remote_key.clone();
    let second = remote.get("two/copy.bin").unwrap().remote_key.clone();
    assert!(first.is_some());
    assert_eq!(first, second);
}

#[tokio::test]
async fn test_content_stored_by_another_device_is_not_uploaded_again() {
    let cloud = Cloud::new();
    let x = cloud.device("x");
    let y = cloud.device("y");
    x.write("shared.txt", b"common content", 1).await;
    x.sync().await;
    y.sync().await;

    y.write("elsewhere/shared.txt", b"common content", 4).await;
    assert!(y.sync.pending_uploads().is_empty());

    let report = y.sync().await;
    assert_eq!(report.objects_put, 0);
    assert_eq!(cloud.objects.put_count(), 1);
    assert!(cloud.authority.snapshot().contains("elsewhere/shared.txt"));
}
