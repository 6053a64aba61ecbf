use serde::{Serialize, Deserialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct FileRecord {
    pub file_id: Uuid,
    pub user_id: Uuid,
    pub filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub parent_folder_id: Option<Uuid>,
    pub is_shared: bool,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl FileRecord {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub user_id: Uuid,
    pub filename: String,
    pub file_size: i64,
    pub mime_type: String,
    pub parent_folder_id: Option<Uuid>,
}
