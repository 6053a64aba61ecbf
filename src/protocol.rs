//! JSON bodies exchanged between nodes, the gateway and clients.

use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::models::share::SharePermission;

pub const CHECKSUM_HEADER: &str = "x-chunk-checksum";
pub const FILE_NAME_HEADER: &str = "x-file-name";
pub const CHUNK_COUNT_HEADER: &str = "x-chunk-count";

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct RegisterNodeRequest {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    pub capacity_bytes: i64,
    pub cpu_cores: i32,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct HeartbeatRequest {
    pub node_id: String,
    pub used_bytes: i64,
    pub chunk_count: i64,
}

/// Reply to store/delete/register/heartbeat calls.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AckResponse {
    pub success: bool,
    pub message: String,
}

impl AckResponse {
    pub fn ok(message: impl Into<String>) -> Self {
        Self { success: true, message: message.into() }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self { success: false, message: message.into() }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct UploadQuery {
    pub filename: String,
    pub size: u64,
    pub mime_type: Option<String>,
    pub parent_folder_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct ListFilesQuery {
    pub folder_id: Option<Uuid>,
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct DeleteQuery {
    #[serde(default)]
    pub permanent: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct CreateFolderRequest {
    pub folder_name: String,
    pub parent_folder_id: Option<Uuid>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ShareFileRequest {
    pub shared_with: Uuid,
    #[serde(default)]
    pub permission: SharePermission,
}

/// Admin request body for `PUT /users/{id}/quota`.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct SetQuotaRequest {
    pub allocated_bytes: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct MessageResponse {
    pub message: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct EmptyTrashResponse {
    pub files_removed: u64,
    pub bytes_freed: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}
