use std::convert::Infallible;
use std::sync::Arc;

use bytes::Bytes;
use log::{error, warn};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::error::StorageError;
use crate::node::chunk_store::ChunkStore;
use crate::protocol::{AckResponse, CHECKSUM_HEADER};

pub fn chunk_routes(store: Arc<ChunkStore>) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let store_filter = warp::any().map(move || store.clone());

    let put_chunk = warp::path!("chunks" / String)
        .and(warp::put())
        .and(warp::header::optional::<String>(CHECKSUM_HEADER))
        .and(warp::body::bytes())
        .and(store_filter.clone())
        .and_then(store_chunk);

    let get_chunk = warp::path!("chunks" / String)
        .and(warp::get())
        .and(store_filter.clone())
        .and_then(retrieve_chunk);

    let delete_chunk = warp::path!("chunks" / String)
        .and(warp::delete())
        .and(store_filter.clone())
        .and_then(remove_chunk);

    put_chunk.or(get_chunk).or(delete_chunk)
}

fn ack(status: StatusCode, body: AckResponse) -> warp::reply::Response {
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

fn status_for(err: &StorageError) -> StatusCode {
    match err {
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

async fn store_chunk(chunk_id: String, checksum: Option<String>, body: Bytes, store: Arc<ChunkStore>) -> Result<warp::reply::Response, Infallible> {
    let checksum = checksum.unwrap_or_default();
    match store.store(&chunk_id, &body, &checksum).await {
        Ok(()) => Ok(ack(StatusCode::OK, AckResponse::ok(format!("stored {} ({} bytes)", chunk_id, body.len())))),
        Err(e) => {
            warn!("Rejected chunk {}: {}", chunk_id, e);
            Ok(ack(status_for(&e), AckResponse::failed(e.to_string())))
        }
    }
}

async fn retrieve_chunk(chunk_id: String, store: Arc<ChunkStore>) -> Result<warp::reply::Response, Infallible> {
    match store.retrieve(&chunk_id).await {
        Ok(data) => {
            let mut resp = warp::reply::Response::new(data.into());
            resp.headers_mut().insert(
                warp::http::header::CONTENT_TYPE,
                warp::http::HeaderValue::from_static("application/octet-stream"),
            );
            Ok(resp)
        }
        Err(e) => {
            if !e.is_not_found() {
                error!("Failed to read chunk {}: {}", chunk_id, e);
            }
            Ok(ack(status_for(&e), AckResponse::failed(e.to_string())))
        }
    }
}

async fn remove_chunk(chunk_id: String, store: Arc<ChunkStore>) -> Result<warp::reply::Response, Infallible> {
    match store.delete(&chunk_id).await {
        Ok(true) => Ok(ack(StatusCode::OK, AckResponse::ok(format!("deleted {}", chunk_id)))),
        Ok(false) => Ok(ack(StatusCode::OK, AckResponse::ok(format!("{} was not stored", chunk_id)))),
        // 非法的块 ID 不可能被存过，删除照样算成功
        Err(StorageError::InvalidArgument(reason)) => {
            warn!("Delete of invalid chunk id {}: {}", chunk_id, reason);
            Ok(ack(StatusCode::OK, AckResponse::ok(format!("{} was not stored", chunk_id))))
        }
        Err(e) => {
            error!("Failed to delete chunk {}: {}", chunk_id, e);
            Ok(ack(status_for(&e), AckResponse::failed(e.to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::chunking::checksum;

    #[tokio::test]
    async fn put_get_delete_over_http() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ChunkStore::open(dir.path()).await.unwrap());
        let routes = chunk_routes(store);

        let resp = warp::test::request()
            .method("PUT")
            .path("/chunks/abc_chunk_0")
            .header(CHECKSUM_HEADER, checksum(b"payload"))
            .body("payload")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = warp::test::request().path("/chunks/abc_chunk_0").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(resp.body().as_ref(), b"payload");

        let resp = warp::test::request().method("DELETE").path("/chunks/abc_chunk_0").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = warp::test::request().path("/chunks/abc_chunk_0").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body: AckResponse = serde_json::from_slice(resp.body()).unwrap();
        assert!(!body.success);
    }

    #[tokio::test]
    async fn deleting_unknown_or_invalid_ids_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ChunkStore::open(dir.path()).await.unwrap());
        let routes = chunk_routes(store);

        for path in ["/chunks/never_stored", "/chunks/bad..id"] {
            let resp = warp::test::request().method("DELETE").path(path).reply(&routes).await;
            assert_eq!(resp.status(), StatusCode::OK, "{}", path);
            let body: AckResponse = serde_json::from_slice(resp.body()).unwrap();
            assert!(body.success);
        }

        // reads of the same id are still refused
        let resp = warp::test::request().path("/chunks/bad..id").reply(&routes).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn corrupted_upload_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ChunkStore::open(dir.path()).await.unwrap());
        let routes = chunk_routes(store);

        let resp = warp::test::request()
            .method("PUT")
            .path("/chunks/c1")
            .header(CHECKSUM_HEADER, checksum(b"original"))
            .body("tampered")
            .reply(&routes)
            .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }
}
