use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::error::Result;
use crate::models::{
    ChunkLocation, ChunkRecord, FileRecord, FileShare, Folder, FolderListing, NewChunk, NewFile,
    NodeAddress, SharePermission, StorageNode, UserQuota,
};

pub mod users;
pub mod files;
pub mod file_chunks;
pub mod folders;
pub mod nodes;
pub mod shares;
pub mod memory;
pub mod postgres;

pub use memory::MemoryMetadataStore;
pub use postgres::PgMetadataStore;

const SCHEMA: &str = include_str!("schema.sql");

pub async fn init_db(database_url: &str) -> std::result::Result<Pool<Postgres>, sqlx::Error> {
    let pool = Pool::<Postgres>::connect(database_url).await?;
    sqlx::raw_sql(SCHEMA).execute(&pool).await?;
    Ok(pool)
}

/// Which files a purge removes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PurgeScope {
    /// One file, trashed or not.
    File(Uuid),
    /// Every trashed file of the user.
    Trash,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct PurgeOutcome {
    pub files_removed: u64,
    pub bytes_freed: i64,
    pub locations: Vec<ChunkLocation>,
}

/// Durable record of nodes, files, chunks, folders, shares and quota.
///
/// Multi-row mutations (`purge_files`, `insert_share`) and quota changes are
/// atomic per call; callers never see half of one applied.
#[async_trait]
pub trait MetadataStore: Send + Sync {
    async fn upsert_node(&self, node: &StorageNode) -> Result<()>;
    /// Returns false when the node is unknown.
    async fn update_node_usage(&self, node_id: &str, used: i64, chunk_count: i64, at: DateTime<Utc>) -> Result<bool>;
    async fn load_nodes(&self) -> Result<Vec<StorageNode>>;
    async fn count_chunks_on_node(&self, node_id: &str) -> Result<i64>;
    async fn delete_node(&self, node_id: &str) -> Result<bool>;

    async fn get_quota(&self, user_id: Uuid) -> Result<UserQuota>;
    async fn set_allocation(&self, user_id: Uuid, allocated: i64) -> Result<UserQuota>;
    /// Adds `bytes` to `storage_used` only if the result stays within the allocation.
    async fn reserve_quota(&self, user_id: Uuid, bytes: i64) -> Result<UserQuota>;
    /// Subtracts `bytes` from `storage_used`, floored at zero.
    async fn release_quota(&self, user_id: Uuid, bytes: i64) -> Result<UserQuota>;

    async fn insert_file(&self, file: NewFile) -> Result<FileRecord>;
    async fn get_file(&self, file_id: Uuid) -> Result<FileRecord>;
    async fn set_deleted_at(&self, file_id: Uuid, deleted_at: Option<DateTime<Utc>>) -> Result<FileRecord>;

    async fn insert_chunk(&self, chunk: NewChunk) -> Result<ChunkRecord>;
    /// Chunks of a file in ascending index order.
    async fn list_chunks(&self, file_id: Uuid) -> Result<Vec<ChunkRecord>>;
    async fn get_chunk(&self, chunk_id: &str) -> Result<ChunkRecord>;

    /// Removes files with their chunk and share rows and releases their size from
    /// the owner's quota, returning where the chunks lived.
    async fn purge_files(&self, user_id: Uuid, scope: PurgeScope) -> Result<PurgeOutcome>;

    async fn insert_folder(&self, user_id: Uuid, folder_name: &str, parent_folder_id: Option<Uuid>) -> Result<Folder>;
    async fn get_folder(&self, folder_id: Uuid) -> Result<Folder>;
    async fn list_folder(&self, user_id: Uuid, folder_id: Option<Uuid>, include_deleted: bool) -> Result<FolderListing>;

    /// Records the share and flags the file as shared.
    async fn insert_share(&self, file_id: Uuid, shared_by: Uuid, shared_with: Uuid, permission: SharePermission) -> Result<FileShare>;
    async fn find_share(&self, file_id: Uuid, user_id: Uuid) -> Result<Option<FileShare>>;
    async fn shared_with(&self, user_id: Uuid) -> Result<Vec<FileRecord>>;
}

pub(crate) fn locate_chunks(chunks: &[ChunkRecord], nodes: &HashMap<String, NodeAddress>) -> Vec<ChunkLocation> {
    chunks
        .iter()
        .map(|c| ChunkLocation {
            chunk_id: c.chunk_id.clone(),
            primary: nodes.get(&c.primary_node_id).cloned(),
            replicas: c.replica_node_ids.iter().filter_map(|id| nodes.get(id).cloned()).collect(),
        })
        .collect()
}
