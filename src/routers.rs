use std::convert::Infallible;
use std::sync::Arc;

use bytes::Buf;
use futures::{Stream, StreamExt};
use log::{error, info};
use uuid::Uuid;
use warp::http::header::{HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use warp::http::StatusCode;
use warp::{Filter, Rejection, Reply};

use crate::error::StorageError;
use crate::protocol::{
    AckResponse, CreateFolderRequest, DeleteQuery, EmptyTrashResponse, ErrorResponse, HeartbeatRequest,
    ListFilesQuery, MessageResponse, RegisterNodeRequest, SetQuotaRequest, ShareFileRequest, UploadQuery, CHUNK_COUNT_HEADER,
    FILE_NAME_HEADER,
};
use crate::registry::NodeRegistration;
use crate::services::{DeleteOutcome, FileService, UploadRequest};
use crate::utils::jwt::{claims_from_header, Claims};

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<FileService>,
    pub jwt_secret: Arc<String>,
}

impl AppState {
    pub fn new(service: Arc<FileService>, jwt_secret: impl Into<String>) -> Self {
        Self { service, jwt_secret: Arc::new(jwt_secret.into()) }
    }
}

#[derive(Debug)]
pub struct ApiError(pub StorageError);

impl warp::reject::Reject for ApiError {}

fn reject(e: StorageError) -> Rejection {
    warp::reject::custom(ApiError(e))
}

fn with_state(state: AppState) -> impl Filter<Extract = (AppState,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

// 鉴权：解析 Authorization 头里的 JWT
fn with_auth(secret: Arc<String>) -> impl Filter<Extract = (Claims,), Error = Rejection> + Clone {
    warp::header::optional::<String>("authorization").and_then(move |header: Option<String>| {
        let secret = secret.clone();
        async move { claims_from_header(header.as_deref(), &secret).map_err(reject) }
    })
}

pub fn status_for(err: &StorageError) -> StatusCode {
    match err {
        StorageError::NotFound(_) => StatusCode::NOT_FOUND,
        StorageError::PermissionDenied(_) => StatusCode::FORBIDDEN,
        StorageError::Unauthenticated(_) => StatusCode::UNAUTHORIZED,
        StorageError::ResourceExhausted(_) => StatusCode::INSUFFICIENT_STORAGE,
        StorageError::Unavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        StorageError::DataLoss(_) => StatusCode::BAD_GATEWAY,
        StorageError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
        StorageError::FailedPrecondition(_) => StatusCode::CONFLICT,
        StorageError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn error_reply(status: StatusCode, error: &str, message: String) -> warp::reply::Response {
    let body = ErrorResponse { error: error.to_string(), message };
    warp::reply::with_status(warp::reply::json(&body), status).into_response()
}

pub async fn handle_rejection(err: Rejection) -> Result<warp::reply::Response, Infallible> {
    if let Some(ApiError(e)) = err.find::<ApiError>() {
        let status = status_for(e);
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!("Request failed: {}", e);
        }
        return Ok(error_reply(status, e.kind(), e.to_string()));
    }
    if err.is_not_found() {
        return Ok(error_reply(StatusCode::NOT_FOUND, "not_found", "no such route".to_string()));
    }
    if let Some(e) = err.find::<warp::filters::body::BodyDeserializeError>() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "invalid_argument", e.to_string()));
    }
    if let Some(e) = err.find::<warp::reject::InvalidQuery>() {
        return Ok(error_reply(StatusCode::BAD_REQUEST, "invalid_argument", e.to_string()));
    }
    if err.find::<warp::reject::MethodNotAllowed>().is_some() {
        return Ok(error_reply(StatusCode::METHOD_NOT_ALLOWED, "method_not_allowed", "method not allowed".to_string()));
    }
    error!("Unhandled rejection: {:?}", err);
    Ok(error_reply(StatusCode::INTERNAL_SERVER_ERROR, "internal", format!("{:?}", err)))
}

pub fn make_routes(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let auth = with_auth(state.jwt_secret.clone());

    // 节点注册与心跳不需要鉴权
    let register_node_route = warp::path!("nodes" / "register")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(|body: RegisterNodeRequest, state: AppState| async move { register_node(state, body).await });

    let heartbeat_route = warp::path!("nodes" / "heartbeat")
        .and(warp::post())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(|body: HeartbeatRequest, state: AppState| async move { heartbeat_node(state, body).await });

    let list_nodes_route = warp::path!("nodes")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(|state: AppState| async move {
            Ok::<_, Rejection>(warp::reply::json(&state.service.registry().list_nodes().await))
        });

    let stats_route = warp::path!("stats")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(|state: AppState| async move {
            Ok::<_, Rejection>(warp::reply::json(&state.service.registry().global_stats().await))
        });

    let remove_node_route = warp::path!("nodes" / String)
        .and(warp::delete())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and_then(|node_id: String, claims: Claims, state: AppState| async move {
            remove_node(state, claims, node_id).await
        });

    // 无数据库时只能靠这个路由给用户分配配额
    let set_quota_route = warp::path!("users" / Uuid / "quota")
        .and(warp::put())
        .and(auth.clone())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(|user_id: Uuid, claims: Claims, body: SetQuotaRequest, state: AppState| async move {
            set_quota(state, claims, user_id, body).await
        });

    let upload_route = warp::path!("files")
        .and(warp::post())
        .and(auth.clone())
        .and(warp::query::<UploadQuery>())
        .and(warp::body::stream())
        .and(with_state(state.clone()))
        .and_then(upload_file);

    let list_files_route = warp::path!("files")
        .and(warp::get())
        .and(auth.clone())
        .and(warp::query::<ListFilesQuery>())
        .and(with_state(state.clone()))
        .and_then(|claims: Claims, query: ListFilesQuery, state: AppState| async move {
            state
                .service
                .files()
                .list_files(claims.sub, query.folder_id, query.include_deleted)
                .await
                .map(|listing| warp::reply::json(&listing))
                .map_err(reject)
        });

    let download_route = warp::path!("files" / Uuid)
        .and(warp::get())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and_then(|file_id: Uuid, claims: Claims, state: AppState| async move {
            download_file(state, claims, file_id).await
        });

    let delete_route = warp::path!("files" / Uuid)
        .and(warp::delete())
        .and(auth.clone())
        .and(warp::query::<DeleteQuery>())
        .and(with_state(state.clone()))
        .and_then(|file_id: Uuid, claims: Claims, query: DeleteQuery, state: AppState| async move {
            delete_file(state, claims, file_id, query.permanent).await
        });

    let restore_route = warp::path!("files" / Uuid / "restore")
        .and(warp::post())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and_then(|file_id: Uuid, claims: Claims, state: AppState| async move {
            let file = state.service.files().restore_file(file_id, claims.sub).await.map_err(reject)?;
            info!("File restored: {} by {}", file.file_id, claims.sub);
            Ok::<_, Rejection>(warp::reply::json(&file))
        });

    let empty_trash_route = warp::path!("trash" / "empty")
        .and(warp::post())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and_then(|claims: Claims, state: AppState| async move {
            let outcome = state.service.empty_trash(claims.sub).await.map_err(reject)?;
            info!("Trash emptied for {}: {} files, {} bytes", claims.sub, outcome.files_removed, outcome.bytes_freed);
            Ok::<_, Rejection>(warp::reply::json(&EmptyTrashResponse {
                files_removed: outcome.files_removed,
                bytes_freed: outcome.bytes_freed,
            }))
        });

    let create_folder_route = warp::path!("folders")
        .and(warp::post())
        .and(auth.clone())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(|claims: Claims, body: CreateFolderRequest, state: AppState| async move {
            state
                .service
                .files()
                .create_folder(claims.sub, &body.folder_name, body.parent_folder_id)
                .await
                .map(|folder| warp::reply::with_status(warp::reply::json(&folder), StatusCode::CREATED))
                .map_err(reject)
        });

    let share_route = warp::path!("files" / Uuid / "shares")
        .and(warp::post())
        .and(auth.clone())
        .and(warp::body::json())
        .and(with_state(state.clone()))
        .and_then(|file_id: Uuid, claims: Claims, body: ShareFileRequest, state: AppState| async move {
            state
                .service
                .files()
                .share_file(file_id, claims.sub, body.shared_with, body.permission)
                .await
                .map(|share| warp::reply::with_status(warp::reply::json(&share), StatusCode::CREATED))
                .map_err(reject)
        });

    let shared_route = warp::path!("shared")
        .and(warp::get())
        .and(auth.clone())
        .and(with_state(state.clone()))
        .and_then(|claims: Claims, state: AppState| async move {
            state
                .service
                .files()
                .shared_with(claims.sub)
                .await
                .map(|files| warp::reply::json(&files))
                .map_err(reject)
        });

    let storage_route = warp::path!("storage")
        .and(warp::get())
        .and(auth)
        .and(with_state(state))
        .and_then(|claims: Claims, state: AppState| async move {
            state
                .service
                .files()
                .storage_info(claims.sub)
                .await
                .map(|info| warp::reply::json(&info))
                .map_err(reject)
        });

    register_node_route
        .or(heartbeat_route)
        .or(list_nodes_route)
        .or(stats_route)
        .or(remove_node_route)
        .or(set_quota_route)
        .or(upload_route)
        .or(list_files_route)
        .or(download_route)
        .or(delete_route)
        .or(restore_route)
        .or(empty_trash_route)
        .or(create_folder_route)
        .or(share_route)
        .or(shared_route)
        .or(storage_route)
}

/// Routes plus JSON error bodies.
pub fn api(state: AppState) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    make_routes(state).recover(handle_rejection)
}

async fn register_node(state: AppState, body: RegisterNodeRequest) -> Result<impl Reply, Rejection> {
    let outcome = state
        .service
        .registry()
        .register_node(NodeRegistration {
            node_id: body.node_id.clone(),
            host: body.host,
            port: i32::from(body.port),
            capacity: body.capacity_bytes,
            cpu_cores: body.cpu_cores,
        })
        .await
        .map_err(reject)?;
    let message = if outcome.newly_registered {
        format!("node {} registered", body.node_id)
    } else {
        format!("node {} re-registered (capacity delta {})", body.node_id, outcome.capacity_delta)
    };
    Ok(warp::reply::json(&AckResponse::ok(message)))
}

async fn heartbeat_node(state: AppState, body: HeartbeatRequest) -> Result<impl Reply, Rejection> {
    state
        .service
        .registry()
        .heartbeat(&body.node_id, body.used_bytes, body.chunk_count)
        .await
        .map_err(reject)?;
    Ok(warp::reply::json(&AckResponse::ok("heartbeat accepted")))
}

async fn remove_node(state: AppState, claims: Claims, node_id: String) -> Result<impl Reply, Rejection> {
    if !claims.is_admin() {
        return Err(reject(StorageError::PermissionDenied("removing nodes requires the admin role".to_string())));
    }
    let node = state.service.registry().remove_node(&node_id).await.map_err(reject)?;
    Ok(warp::reply::json(&node))
}

async fn set_quota(state: AppState, claims: Claims, user_id: Uuid, body: SetQuotaRequest) -> Result<impl Reply, Rejection> {
    if !claims.is_admin() {
        return Err(reject(StorageError::PermissionDenied("setting quotas requires the admin role".to_string())));
    }
    let quota = state
        .service
        .files()
        .set_allocation(user_id, body.allocated_bytes)
        .await
        .map_err(reject)?;
    info!("Quota of {} set to {} bytes by {}", user_id, quota.storage_allocated, claims.sub);
    Ok(warp::reply::json(&quota))
}

async fn upload_file<S, B>(claims: Claims, query: UploadQuery, body: S, state: AppState) -> Result<impl Reply, Rejection>
where
    S: Stream<Item = Result<B, warp::Error>> + Send + 'static,
    B: Buf + Send,
{
    let body = Box::pin(body.map(|frame| frame.map(|mut buf| buf.copy_to_bytes(buf.remaining()))));
    let req = UploadRequest {
        user_id: claims.sub,
        filename: query.filename,
        declared_size: query.size,
        mime_type: query.mime_type,
        parent_folder_id: query.parent_folder_id,
    };
    let receipt = state.service.upload(req, body).await.map_err(reject)?;
    Ok(warp::reply::with_status(warp::reply::json(&receipt), StatusCode::CREATED))
}

async fn download_file(state: AppState, claims: Claims, file_id: Uuid) -> Result<warp::reply::Response, Rejection> {
    let download = state.service.download(file_id, claims.sub).await.map_err(reject)?;
    let info = download.info;
    let mut resp = warp::reply::Response::new(warp::hyper::Body::wrap_stream(download.body));
    let headers = resp.headers_mut();
    headers.insert(CONTENT_LENGTH, HeaderValue::from(info.total_size));
    headers.insert(CHUNK_COUNT_HEADER, HeaderValue::from(info.chunk_count));
    if let Ok(v) = HeaderValue::from_str(&info.mime_type) {
        headers.insert(CONTENT_TYPE, v);
    }
    // 非 ASCII 文件名无法放进头部，直接省略
    if let Ok(v) = HeaderValue::from_str(&info.filename) {
        headers.insert(FILE_NAME_HEADER, v);
    }
    Ok(resp)
}

async fn delete_file(state: AppState, claims: Claims, file_id: Uuid, permanent: bool) -> Result<impl Reply, Rejection> {
    let message = match state.service.delete_file(file_id, claims.sub, permanent).await.map_err(reject)? {
        DeleteOutcome::Trashed(file) => {
            info!("File moved to trash: {} by {}", file.file_id, claims.sub);
            format!("file {} moved to trash", file.file_id)
        }
        DeleteOutcome::Purged(outcome) => {
            info!("File permanently deleted: {} ({} bytes freed)", file_id, outcome.bytes_freed);
            format!("file {} permanently deleted", file_id)
        }
    };
    Ok(warp::reply::json(&MessageResponse { message }))
}
