mod common;

use common::{pattern, Harness, GB};
use distributed_chunk_storage::error::StorageError;
use distributed_chunk_storage::models::SharePermission;
use distributed_chunk_storage::services::DeleteOutcome;

#[tokio::test]
async fn permanent_delete_frees_quota_and_chunks() {
    let h = Harness::new(2, 2);
    h.add_node("a", 2 * GB).await;
    h.add_node("b", GB).await;
    let user = h.user_with_quota(GB).await;

    let receipt = h.upload(user, "gone.bin", &pattern(3000)).await.unwrap();
    assert_eq!(h.client.total_chunks().await, 4);

    match h.service.delete_file(receipt.file_id, user, true).await.unwrap() {
        DeleteOutcome::Purged(outcome) => {
            assert_eq!(outcome.files_removed, 1);
            assert_eq!(outcome.bytes_freed, 3000);
            assert_eq!(outcome.locations.len(), 2);
        }
        DeleteOutcome::Trashed(_) => panic!("expected a purge"),
    }
    assert_eq!(h.used(user).await, 0);
    assert_eq!(h.client.total_chunks().await, 0);
    assert!(h.service.download(receipt.file_id, user).await.err().unwrap().is_not_found());
}

#[tokio::test]
async fn unreachable_node_does_not_block_permanent_delete() {
    let h = Harness::new(1, 1);
    h.add_node("a", GB).await;
    let user = h.user_with_quota(GB).await;
    let receipt = h.upload(user, "f", b"abc").await.unwrap();

    h.client.fail_node("a").await;
    h.service.delete_file(receipt.file_id, user, true).await.unwrap();
    assert_eq!(h.used(user).await, 0);
    // 物理块留作孤儿
    assert_eq!(h.client.total_chunks().await, 1);
}

#[tokio::test]
async fn trash_restore_and_empty() {
    let h = Harness::new(2, 1);
    h.add_node("a", GB).await;
    let user = h.user_with_quota(GB).await;
    let kept = h.upload(user, "kept.txt", b"keep me").await.unwrap();
    let dropped = h.upload(user, "dropped.txt", b"drop me!").await.unwrap();

    assert!(matches!(
        h.service.delete_file(kept.file_id, user, false).await.unwrap(),
        DeleteOutcome::Trashed(_)
    ));
    h.service.delete_file(dropped.file_id, user, false).await.unwrap();
    // trashed files still count against quota
    assert_eq!(h.used(user).await, 15);
    assert!(h.service.download(kept.file_id, user).await.err().unwrap().is_not_found());

    let err = h.service.delete_file(kept.file_id, user, false).await.unwrap_err();
    assert!(matches!(err, StorageError::FailedPrecondition(_)));

    h.service.files().restore_file(kept.file_id, user).await.unwrap();
    assert_eq!(h.service.download_bytes(kept.file_id, user).await.unwrap().1, b"keep me");

    let outcome = h.service.empty_trash(user).await.unwrap();
    assert_eq!(outcome.files_removed, 1);
    assert_eq!(outcome.bytes_freed, 8);
    assert_eq!(h.used(user).await, 7);
    assert_eq!(h.client.stored_on("a").await.len(), 2);

    let again = h.service.empty_trash(user).await.unwrap();
    assert_eq!(again.files_removed, 0);
}

#[tokio::test]
async fn only_the_owner_deletes() {
    let h = Harness::new(1, 1);
    h.add_node("a", GB).await;
    let owner = h.user_with_quota(GB).await;
    let other = h.user_with_quota(GB).await;
    let receipt = h.upload(owner, "mine", b"x").await.unwrap();

    let err = h.service.delete_file(receipt.file_id, other, true).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(h.used(owner).await, 1);
}

#[tokio::test]
async fn sharing_grants_download_access() {
    let h = Harness::new(2, 1);
    h.add_node("a", GB).await;
    let owner = h.user_with_quota(GB).await;
    let friend = h.user_with_quota(GB).await;
    let receipt = h.upload(owner, "notes.md", b"# shared notes").await.unwrap();

    let err = h.service.download(receipt.file_id, friend).await.err().unwrap();
    assert!(matches!(err, StorageError::PermissionDenied(_)));

    h.service
        .files()
        .share_file(receipt.file_id, owner, friend, SharePermission::Read)
        .await
        .unwrap();
    let (info, bytes) = h.service.download_bytes(receipt.file_id, friend).await.unwrap();
    assert_eq!(info.filename, "notes.md");
    assert_eq!(bytes, b"# shared notes");

    let shared = h.service.files().shared_with(friend).await.unwrap();
    assert_eq!(shared.len(), 1);
    assert!(shared[0].is_shared);

    // 分享记录随文件一起删除
    h.service.delete_file(receipt.file_id, owner, true).await.unwrap();
    assert!(h.service.files().shared_with(friend).await.unwrap().is_empty());
}

#[tokio::test]
async fn uploads_land_in_folders() {
    let h = Harness::new(1, 1);
    h.add_node("a", GB).await;
    let user = h.user_with_quota(GB).await;
    let folder = h.service.files().create_folder(user, "docs", None).await.unwrap();

    let mut req = common::request(user, "a.txt", 3);
    req.parent_folder_id = Some(folder.folder_id);
    h.service.upload(req, common::frames(b"abc")).await.unwrap();
    h.upload(user, "root.txt", b"r").await.unwrap();

    let root = h.service.files().list_files(user, None, false).await.unwrap();
    assert_eq!(root.files.len(), 1);
    assert_eq!(root.folders.len(), 1);
    assert_eq!(root.folders[0].file_count, 1);

    let inside = h.service.files().list_files(user, Some(folder.folder_id), false).await.unwrap();
    assert_eq!(inside.files[0].filename, "a.txt");

    let stranger = h.user_with_quota(GB).await;
    let mut req = common::request(stranger, "b.txt", 1);
    req.parent_folder_id = Some(folder.folder_id);
    let err = h.service.upload(req, common::frames(b"b")).await.unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(h.used(stranger).await, 0);
}
