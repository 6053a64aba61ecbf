mod common;

use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::time::Duration;

use common::{frames, pattern, registration, request, Harness, GB, MB};
use distributed_chunk_storage::db::MetadataStore;
use distributed_chunk_storage::error::StorageError;
use distributed_chunk_storage::utils::chunking::chunk_id;

#[tokio::test]
async fn twelve_megabytes_spread_round_robin() {
    let h = Harness::new(4, 1);
    h.add_node("large", 4 * GB).await;
    h.add_node("medium", 3 * GB).await;
    h.add_node("small", 2 * GB).await;
    h.add_node("tiny", GB).await;
    let user = h.user_with_quota(GB).await;

    let data = pattern(12 * MB as usize);
    let receipt = h.upload(user, "video.bin", &data).await.unwrap();
    assert_eq!(receipt.chunks_stored, 4);
    assert_eq!(receipt.chunks_total, 4);
    assert_eq!(h.used(user).await, 12 * MB);

    let chunks = h.service.files().chunks(receipt.file_id).await.unwrap();
    let primaries: Vec<&str> = chunks.iter().map(|c| c.primary_node_id.as_str()).collect();
    assert_eq!(primaries, ["large", "medium", "small", "tiny"]);
    assert!(chunks.iter().all(|c| c.size == 3 * MB && c.replica_node_ids.is_empty()));
    assert_eq!(h.client.stored_on("large").await, vec![chunk_id(&receipt.file_id, 0)]);

    let (info, bytes) = h.service.download_bytes(receipt.file_id, user).await.unwrap();
    assert_eq!(info.chunk_count, 4);
    assert_eq!(info.total_size, 12 * MB);
    assert_eq!(info.mime_type, "application/octet-stream");
    assert!(bytes == data);
}

#[tokio::test]
async fn uneven_sizes_put_the_remainder_last() {
    let h = Harness::new(4, 1);
    h.add_node("a", GB).await;
    let user = h.user_with_quota(GB).await;

    let data = pattern(10_003);
    let receipt = h.upload(user, "odd.bin", &data).await.unwrap();
    let sizes: Vec<i64> = h
        .service
        .files()
        .chunks(receipt.file_id)
        .await
        .unwrap()
        .iter()
        .map(|c| c.size)
        .collect();
    assert_eq!(sizes, [2500, 2500, 2500, 2503]);
    assert_eq!(h.service.download_bytes(receipt.file_id, user).await.unwrap().1, data);
}

#[tokio::test]
async fn tiny_and_empty_files_are_one_chunk() {
    let h = Harness::new(4, 1);
    h.add_node("a", GB).await;
    let user = h.user_with_quota(GB).await;

    let receipt = h.upload(user, "two.txt", b"hi").await.unwrap();
    assert_eq!((receipt.chunks_stored, receipt.chunks_total), (1, 1));

    let empty = h.upload(user, "empty.txt", b"").await.unwrap();
    assert_eq!(empty.chunks_total, 1);
    let (info, bytes) = h.service.download_bytes(empty.file_id, user).await.unwrap();
    assert_eq!(info.total_size, 0);
    assert!(bytes.is_empty());
}

#[tokio::test]
async fn quota_exceeded_before_any_bytes_move() {
    let h = Harness::new(4, 1);
    h.add_node("a", 10 * GB).await;
    let user = h.user_with_quota(1_000_000_000).await;
    h.store.reserve_quota(user, 990_000_000).await.unwrap();

    let err = h
        .service
        .upload(request(user, "big.bin", 20_000_000), stream::empty::<Result<Bytes, std::io::Error>>())
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::ResourceExhausted(_)));
    assert_eq!(h.used(user).await, 990_000_000);
    assert_eq!(h.client.total_chunks().await, 0);
    assert!(h.service.files().list_files(user, None, true).await.unwrap().files.is_empty());
}

#[tokio::test]
async fn concurrent_uploads_cannot_overcommit() {
    let h = Harness::new(2, 1);
    h.add_node("a", GB).await;
    let user = h.user_with_quota(10).await;

    let (first, second) = tokio::join!(h.upload(user, "one", b"abcdef"), h.upload(user, "two", b"ghijkl"));
    let outcomes = [first.is_ok(), second.is_ok()];
    assert_eq!(outcomes.iter().filter(|ok| **ok).count(), 1);
    let failure = if first.is_err() { first.unwrap_err() } else { second.unwrap_err() };
    assert!(matches!(failure, StorageError::ResourceExhausted(_)));
    assert_eq!(h.used(user).await, 6);
}

#[tokio::test]
async fn no_nodes_releases_the_reservation() {
    let h = Harness::new(4, 1);
    let user = h.user_with_quota(GB).await;

    let err = h.upload(user, "orphan", b"data").await.unwrap_err();
    assert!(matches!(err, StorageError::Unavailable(_)));
    assert_eq!(h.used(user).await, 0);
    assert!(h.service.files().list_files(user, None, true).await.unwrap().files.is_empty());
}

#[tokio::test]
async fn failed_primary_skips_the_chunk_and_download_reports_loss() {
    let h = Harness::new(4, 1);
    for (id, cap) in [("a", 4 * GB), ("b", 3 * GB), ("c", 2 * GB), ("d", GB)] {
        h.add_node(id, cap).await;
    }
    h.client.fail_node("b").await;
    let user = h.user_with_quota(GB).await;

    let data = pattern(4000);
    let receipt = h.upload(user, "partial.bin", &data).await.unwrap();
    assert_eq!(receipt.chunks_stored, 3);
    assert_eq!(receipt.chunks_total, 4);
    // 按声明大小计费
    assert_eq!(h.used(user).await, 4000);

    let err = h.service.download(receipt.file_id, user).await.err().unwrap();
    assert!(matches!(err, StorageError::DataLoss(_)));
}

#[tokio::test]
async fn download_falls_over_to_a_replica() {
    let h = Harness::new(2, 2);
    h.add_node("a", 2 * GB).await;
    h.add_node("b", GB).await;
    let user = h.user_with_quota(GB).await;

    let data = pattern(5000);
    let receipt = h.upload(user, "mirrored.bin", &data).await.unwrap();
    let chunks = h.service.files().chunks(receipt.file_id).await.unwrap();
    assert_eq!(chunks[0].primary_node_id, "a");
    assert_eq!(chunks[0].replica_node_ids, vec!["b".to_string()]);
    assert_eq!(chunks[1].primary_node_id, "b");
    assert_eq!(chunks[1].replica_node_ids, vec!["a".to_string()]);

    h.client.corrupt("a", &chunks[0].chunk_id).await;
    h.client.fail_node("b").await;
    // chunk 0: a is corrupt, b is down
    assert!(matches!(
        h.service.download_bytes(receipt.file_id, user).await,
        Err(StorageError::DataLoss(_))
    ));

    h.client.heal_node("b").await;
    let (_, bytes) = h.service.download_bytes(receipt.file_id, user).await.unwrap();
    assert_eq!(bytes, data);
}

#[tokio::test]
async fn replicas_that_fail_are_not_recorded() {
    let h = Harness::new(1, 3);
    h.add_node("a", 3 * GB).await;
    h.add_node("b", 2 * GB).await;
    h.add_node("c", GB).await;
    h.client.fail_node("c").await;
    let user = h.user_with_quota(GB).await;

    let receipt = h.upload(user, "r.bin", b"replicated").await.unwrap();
    let chunk = &h.service.files().chunks(receipt.file_id).await.unwrap()[0];
    assert_eq!(chunk.primary_node_id, "a");
    assert_eq!(chunk.replica_node_ids, vec!["b".to_string()]);
}

#[tokio::test]
async fn offline_holders_fail_the_download_up_front() {
    let h = Harness::new(1, 1);
    h.add_node("a", GB).await;
    let user = h.user_with_quota(GB).await;
    let receipt = h.upload(user, "f", b"payload").await.unwrap();

    h.registry
        .register_node_at(registration("a", GB), Utc::now() - chrono::Duration::seconds(300))
        .await
        .unwrap();
    let err = h.service.download(receipt.file_id, user).await.err().unwrap();
    assert!(matches!(err, StorageError::DataLoss(_)));

    h.registry.heartbeat("a", 7, 1).await.unwrap();
    assert_eq!(h.service.download_bytes(receipt.file_id, user).await.unwrap().1, b"payload");
}

#[tokio::test]
async fn short_stream_rolls_everything_back() {
    let h = Harness::new(4, 1);
    h.add_node("a", GB).await;
    let user = h.user_with_quota(GB).await;

    let data = pattern(500);
    let err = h
        .service
        .upload(request(user, "cut.bin", 1000), frames(&data))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument(_)));
    assert_eq!(h.used(user).await, 0);
    assert_eq!(h.client.total_chunks().await, 0);
    assert!(h.service.files().list_files(user, None, true).await.unwrap().files.is_empty());
}

#[tokio::test]
async fn overlong_stream_is_rejected() {
    let h = Harness::new(2, 1);
    h.add_node("a", GB).await;
    let user = h.user_with_quota(GB).await;

    let err = h
        .service
        .upload(request(user, "long.bin", 10), frames(&pattern(11)))
        .await
        .unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument(_)));
    assert_eq!(h.used(user).await, 0);
    assert_eq!(h.client.total_chunks().await, 0);
}

#[tokio::test]
async fn empty_filename_is_invalid() {
    let h = Harness::new(2, 1);
    h.add_node("a", GB).await;
    let user = h.user_with_quota(GB).await;
    let err = h.upload(user, "  ", b"x").await.unwrap_err();
    assert!(matches!(err, StorageError::InvalidArgument(_)));
    assert_eq!(h.used(user).await, 0);
}

#[tokio::test]
async fn user_without_quota_record_is_not_found() {
    let h = Harness::new(2, 1);
    h.add_node("a", GB).await;
    let err = h.upload(uuid::Uuid::new_v4(), "f", b"x").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn upload_dropped_mid_stream_is_rolled_back() {
    let h = Harness::new(4, 1);
    h.add_node("a", GB).await;
    let user = h.user_with_quota(GB).await;

    // 声明 1000 字节，只送来 400 字节后连接挂起
    let body = frames(&pattern(400))
        .chain(stream::pending::<Result<Bytes, std::io::Error>>())
        .boxed();
    let cut = tokio::time::timeout(
        Duration::from_millis(200),
        h.service.upload(request(user, "hung.bin", 1000), body),
    )
    .await;
    assert!(cut.is_err());

    for _ in 0..100 {
        if h.used(user).await == 0 && h.client.total_chunks().await == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(h.used(user).await, 0);
    assert_eq!(h.client.total_chunks().await, 0);
    assert!(h.service.files().list_files(user, None, true).await.unwrap().files.is_empty());

    // the user can upload again with the full allocation
    h.upload(user, "retry.bin", &pattern(1000)).await.unwrap();
    assert_eq!(h.used(user).await, 1000);
}

#[tokio::test]
async fn aborted_download_is_not_counted() {
    let h = Harness::new(2, 1);
    h.add_node("a", 2 * GB).await;
    h.add_node("b", GB).await;
    let user = h.user_with_quota(GB).await;
    let data = pattern(3000);
    let receipt = h.upload(user, "split.bin", &data).await.unwrap();

    let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();

    // chunk 1 lives on b; the registry still lists b, so the transfer starts and then fails
    h.client.fail_node("b").await;
    let pieces = metrics::with_local_recorder(&recorder, || {
        futures::executor::block_on(tokio::task::unconstrained(async {
            let download = h.service.download(receipt.file_id, user).await.unwrap();
            download.body.collect::<Vec<_>>().await
        }))
    });
    assert_eq!(pieces.len(), 2);
    assert!(pieces[0].is_ok());
    assert!(matches!(pieces[1], Err(StorageError::DataLoss(_))));
    assert!(!handle.render().contains("dfs_files_downloaded_total"));

    h.client.heal_node("b").await;
    let bytes = metrics::with_local_recorder(&recorder, || {
        futures::executor::block_on(tokio::task::unconstrained(h.service.download_bytes(receipt.file_id, user)))
    })
    .unwrap()
    .1;
    assert_eq!(bytes, data);
    assert!(handle.render().contains("dfs_files_downloaded_total 1"));
}
