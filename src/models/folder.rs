use serde::{Serialize, Deserialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::models::file::FileRecord;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct Folder {
    pub folder_id: Uuid,
    pub user_id: Uuid,
    pub folder_name: String,
    pub parent_folder_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A folder plus the number of live files directly inside it.
#[derive(Serialize, Deserialize, Debug, Clone, sqlx::FromRow)]
pub struct FolderEntry {
    #[serde(flatten)]
    #[sqlx(flatten)]
    pub folder: Folder,
    pub file_count: i64,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct FolderListing {
    pub files: Vec<FileRecord>,
    pub folders: Vec<FolderEntry>,
}
