use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::db::{self, locate_chunks, MetadataStore, PurgeOutcome, PurgeScope};
use crate::error::{Result, StorageError};
use crate::models::{
    ChunkRecord, FileRecord, FileShare, Folder, FolderListing, NewChunk, NewFile, SharePermission,
    StorageNode, UserQuota,
};

#[derive(Clone)]
pub struct PgMetadataStore {
    pool: Pool<Postgres>,
}

impl PgMetadataStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    async fn quota_or_not_found(&self, user_id: Uuid) -> Result<UserQuota> {
        db::users::get_quota(&self.pool, user_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("user {}", user_id)))
    }
}

#[async_trait]
impl MetadataStore for PgMetadataStore {
    async fn upsert_node(&self, node: &StorageNode) -> Result<()> {
        db::nodes::upsert_node(&self.pool, node).await?;
        Ok(())
    }

    async fn update_node_usage(&self, node_id: &str, used: i64, chunk_count: i64, at: DateTime<Utc>) -> Result<bool> {
        Ok(db::nodes::update_node_usage(&self.pool, node_id, used, chunk_count, at).await?)
    }

    async fn load_nodes(&self) -> Result<Vec<StorageNode>> {
        Ok(db::nodes::get_all_nodes(&self.pool).await?)
    }

    async fn count_chunks_on_node(&self, node_id: &str) -> Result<i64> {
        Ok(db::nodes::count_chunks_on_node(&self.pool, node_id).await?)
    }

    async fn delete_node(&self, node_id: &str) -> Result<bool> {
        Ok(db::nodes::delete_node(&self.pool, node_id).await?)
    }

    async fn get_quota(&self, user_id: Uuid) -> Result<UserQuota> {
        self.quota_or_not_found(user_id).await
    }

    async fn set_allocation(&self, user_id: Uuid, allocated: i64) -> Result<UserQuota> {
        match db::users::set_allocation(&self.pool, user_id, allocated).await? {
            Some(quota) => Ok(quota),
            None => {
                let current = self.quota_or_not_found(user_id).await?;
                Err(StorageError::FailedPrecondition(format!(
                    "user {} already uses {} bytes, more than the requested {}",
                    user_id, current.storage_used, allocated
                )))
            }
        }
    }

    async fn reserve_quota(&self, user_id: Uuid, bytes: i64) -> Result<UserQuota> {
        match db::users::reserve_quota(&self.pool, user_id, bytes).await? {
            Some(quota) => Ok(quota),
            None => {
                let current = self.quota_or_not_found(user_id).await?;
                Err(StorageError::ResourceExhausted(format!(
                    "storage quota exceeded: {} of {} bytes used, {} more requested",
                    current.storage_used, current.storage_allocated, bytes
                )))
            }
        }
    }

    async fn release_quota(&self, user_id: Uuid, bytes: i64) -> Result<UserQuota> {
        db::users::release_quota(&self.pool, user_id, bytes)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("user {}", user_id)))
    }

    async fn insert_file(&self, file: NewFile) -> Result<FileRecord> {
        Ok(db::files::create_file(&self.pool, Uuid::new_v4(), &file).await?)
    }

    async fn get_file(&self, file_id: Uuid) -> Result<FileRecord> {
        db::files::get_file_by_id(&self.pool, file_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("file {}", file_id)))
    }

    async fn set_deleted_at(&self, file_id: Uuid, deleted_at: Option<DateTime<Utc>>) -> Result<FileRecord> {
        db::files::set_deleted_at(&self.pool, file_id, deleted_at)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("file {}", file_id)))
    }

    async fn insert_chunk(&self, chunk: NewChunk) -> Result<ChunkRecord> {
        Ok(db::file_chunks::create_file_chunk(&self.pool, &chunk).await?)
    }

    async fn list_chunks(&self, file_id: Uuid) -> Result<Vec<ChunkRecord>> {
        Ok(db::file_chunks::get_chunks_by_file_id(&self.pool, file_id).await?)
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<ChunkRecord> {
        db::file_chunks::get_chunk(&self.pool, chunk_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("chunk {}", chunk_id)))
    }

    async fn purge_files(&self, user_id: Uuid, scope: PurgeScope) -> Result<PurgeOutcome> {
        let mut tx = self.pool.begin().await?;

        let files = match scope {
            PurgeScope::File(file_id) => {
                let file = db::files::lock_owned_file(&mut *tx, file_id, user_id)
                    .await?
                    .ok_or_else(|| StorageError::NotFound(format!("file {}", file_id)))?;
                vec![file]
            }
            PurgeScope::Trash => db::files::lock_trashed_files(&mut *tx, user_id).await?,
        };
        if files.is_empty() {
            tx.commit().await?;
            return Ok(PurgeOutcome::default());
        }

        let file_ids: Vec<Uuid> = files.iter().map(|f| f.file_id).collect();
        let chunks = db::file_chunks::get_chunks_for_files(&mut *tx, &file_ids).await?;

        let node_ids: Vec<String> = chunks
            .iter()
            .flat_map(|c| std::iter::once(&c.primary_node_id).chain(c.replica_node_ids.iter()))
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let nodes: HashMap<_, _> = db::nodes::get_nodes_by_ids(&mut *tx, &node_ids)
            .await?
            .into_iter()
            .map(|n| (n.node_id.clone(), n.address()))
            .collect();
        let locations = locate_chunks(&chunks, &nodes);

        db::shares::delete_shares_for_files(&mut *tx, &file_ids).await?;
        db::file_chunks::delete_chunks_for_files(&mut *tx, &file_ids).await?;
        let files_removed = db::files::delete_files(&mut *tx, &file_ids).await?;

        let bytes_freed: i64 = files.iter().map(|f| f.file_size).sum();
        db::users::release_quota(&mut *tx, user_id, bytes_freed).await?;

        tx.commit().await?;

        Ok(PurgeOutcome { files_removed, bytes_freed, locations })
    }

    async fn insert_folder(&self, user_id: Uuid, folder_name: &str, parent_folder_id: Option<Uuid>) -> Result<Folder> {
        Ok(db::folders::create_folder(&self.pool, user_id, folder_name, parent_folder_id).await?)
    }

    async fn get_folder(&self, folder_id: Uuid) -> Result<Folder> {
        db::folders::get_folder(&self.pool, folder_id)
            .await?
            .ok_or_else(|| StorageError::NotFound(format!("folder {}", folder_id)))
    }

    async fn list_folder(&self, user_id: Uuid, folder_id: Option<Uuid>, include_deleted: bool) -> Result<FolderListing> {
        let mut tx = self.pool.begin().await?;
        let files = db::files::list_folder_files(&mut *tx, user_id, folder_id, include_deleted).await?;
        let folders = db::folders::list_child_folders(&mut *tx, user_id, folder_id).await?;
        tx.commit().await?;
        Ok(FolderListing { files, folders })
    }

    async fn insert_share(&self, file_id: Uuid, shared_by: Uuid, shared_with: Uuid, permission: SharePermission) -> Result<FileShare> {
        let mut tx = self.pool.begin().await?;
        let share = db::shares::upsert_share(&mut *tx, file_id, shared_by, shared_with, permission).await?;
        db::files::mark_shared(&mut *tx, file_id).await?;
        tx.commit().await?;
        Ok(share)
    }

    async fn find_share(&self, file_id: Uuid, user_id: Uuid) -> Result<Option<FileShare>> {
        Ok(db::shares::find_share(&self.pool, file_id, user_id).await?)
    }

    async fn shared_with(&self, user_id: Uuid) -> Result<Vec<FileRecord>> {
        Ok(db::files::list_shared_with(&self.pool, user_id).await?)
    }
}
