use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::{locate_chunks, MetadataStore, PurgeOutcome, PurgeScope};
use crate::error::{Result, StorageError};
use crate::models::{
    ChunkRecord, FileRecord, FileShare, Folder, FolderEntry, FolderListing, NewChunk, NewFile,
    NodeAddress, SharePermission, StorageNode, UserQuota,
};
use crate::utils::chunking::chunk_id;

#[derive(Default)]
struct Tables {
    nodes: HashMap<String, StorageNode>,
    users: HashMap<Uuid, UserQuota>,
    files: HashMap<Uuid, FileRecord>,
    chunks: HashMap<String, ChunkRecord>,
    folders: HashMap<Uuid, Folder>,
    shares: Vec<FileShare>,
}

/// Process-local store for tests and database-less runs. One mutex over all
/// tables gives every call the same atomicity the Postgres store gets from
/// transactions.
#[derive(Default)]
pub struct MemoryMetadataStore {
    tables: Mutex<Tables>,
}

impl MemoryMetadataStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn not_found_user(user_id: Uuid) -> StorageError {
    StorageError::NotFound(format!("user {}", user_id))
}

#[async_trait]
impl MetadataStore for MemoryMetadataStore {
    async fn upsert_node(&self, node: &StorageNode) -> Result<()> {
        let mut t = self.tables.lock().await;
        match t.nodes.get_mut(&node.node_id) {
            Some(existing) => {
                existing.host = node.host.clone();
                existing.port = node.port;
                existing.capacity = node.capacity;
                existing.cpu_cores = node.cpu_cores;
                existing.last_heartbeat = node.last_heartbeat;
            }
            None => {
                t.nodes.insert(node.node_id.clone(), node.clone());
            }
        }
        Ok(())
    }

    async fn update_node_usage(&self, node_id: &str, used: i64, chunk_count: i64, at: DateTime<Utc>) -> Result<bool> {
        let mut t = self.tables.lock().await;
        Ok(match t.nodes.get_mut(node_id) {
            Some(node) => {
                node.used = used;
                node.chunk_count = chunk_count;
                node.last_heartbeat = Some(at);
                true
            }
            None => false,
        })
    }

    async fn load_nodes(&self) -> Result<Vec<StorageNode>> {
        let t = self.tables.lock().await;
        let mut nodes: Vec<StorageNode> = t.nodes.values().cloned().collect();
        nodes.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.node_id.cmp(&b.node_id)));
        Ok(nodes)
    }

    async fn count_chunks_on_node(&self, node_id: &str) -> Result<i64> {
        let t = self.tables.lock().await;
        Ok(t.chunks.values().filter(|c| c.references_node(node_id)).count() as i64)
    }

    async fn delete_node(&self, node_id: &str) -> Result<bool> {
        let mut t = self.tables.lock().await;
        Ok(t.nodes.remove(node_id).is_some())
    }

    async fn get_quota(&self, user_id: Uuid) -> Result<UserQuota> {
        let t = self.tables.lock().await;
        t.users.get(&user_id).cloned().ok_or_else(|| not_found_user(user_id))
    }

    async fn set_allocation(&self, user_id: Uuid, allocated: i64) -> Result<UserQuota> {
        let mut t = self.tables.lock().await;
        let quota = t.users.entry(user_id).or_insert_with(|| UserQuota {
            user_id,
            storage_allocated: 0,
            storage_used: 0,
        });
        if quota.storage_used > allocated {
            return Err(StorageError::FailedPrecondition(format!(
                "user {} already uses {} bytes, more than the requested {}",
                user_id, quota.storage_used, allocated
            )));
        }
        quota.storage_allocated = allocated;
        Ok(quota.clone())
    }

    async fn reserve_quota(&self, user_id: Uuid, bytes: i64) -> Result<UserQuota> {
        let mut t = self.tables.lock().await;
        let quota = t.users.get_mut(&user_id).ok_or_else(|| not_found_user(user_id))?;
        if quota.storage_used + bytes > quota.storage_allocated {
            return Err(StorageError::ResourceExhausted(format!(
                "storage quota exceeded: {} of {} bytes used, {} more requested",
                quota.storage_used, quota.storage_allocated, bytes
            )));
        }
        quota.storage_used += bytes;
        Ok(quota.clone())
    }

    async fn release_quota(&self, user_id: Uuid, bytes: i64) -> Result<UserQuota> {
        let mut t = self.tables.lock().await;
        let quota = t.users.get_mut(&user_id).ok_or_else(|| not_found_user(user_id))?;
        quota.storage_used = (quota.storage_used - bytes).max(0);
        Ok(quota.clone())
    }

    async fn insert_file(&self, file: NewFile) -> Result<FileRecord> {
        let mut t = self.tables.lock().await;
        let now = Utc::now();
        let record = FileRecord {
            file_id: Uuid::new_v4(),
            user_id: file.user_id,
            filename: file.filename,
            file_size: file.file_size,
            mime_type: file.mime_type,
            parent_folder_id: file.parent_folder_id,
            is_shared: false,
            created_at: now,
            modified_at: now,
            deleted_at: None,
        };
        t.files.insert(record.file_id, record.clone());
        Ok(record)
    }

    async fn get_file(&self, file_id: Uuid) -> Result<FileRecord> {
        let t = self.tables.lock().await;
        t.files
            .get(&file_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("file {}", file_id)))
    }

    async fn set_deleted_at(&self, file_id: Uuid, deleted_at: Option<DateTime<Utc>>) -> Result<FileRecord> {
        let mut t = self.tables.lock().await;
        let file = t
            .files
            .get_mut(&file_id)
            .ok_or_else(|| StorageError::NotFound(format!("file {}", file_id)))?;
        file.deleted_at = deleted_at;
        file.modified_at = Utc::now();
        Ok(file.clone())
    }

    async fn insert_chunk(&self, chunk: NewChunk) -> Result<ChunkRecord> {
        let mut t = self.tables.lock().await;
        if !t.files.contains_key(&chunk.file_id) {
            return Err(StorageError::NotFound(format!("file {}", chunk.file_id)));
        }
        let id = chunk_id(&chunk.file_id, chunk.chunk_index as usize);
        if t.chunks.contains_key(&id) {
            return Err(StorageError::Internal(format!("chunk {} already recorded", id)));
        }
        let record = ChunkRecord {
            chunk_id: id.clone(),
            file_id: chunk.file_id,
            chunk_index: chunk.chunk_index,
            size: chunk.size,
            checksum: chunk.checksum,
            primary_node_id: chunk.primary_node_id,
            replica_node_ids: chunk.replica_node_ids,
            created_at: Utc::now(),
        };
        t.chunks.insert(id, record.clone());
        Ok(record)
    }

    async fn list_chunks(&self, file_id: Uuid) -> Result<Vec<ChunkRecord>> {
        let t = self.tables.lock().await;
        let mut chunks: Vec<ChunkRecord> = t.chunks.values().filter(|c| c.file_id == file_id).cloned().collect();
        chunks.sort_by_key(|c| c.chunk_index);
        Ok(chunks)
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<ChunkRecord> {
        let t = self.tables.lock().await;
        t.chunks
            .get(chunk_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("chunk {}", chunk_id)))
    }

    async fn purge_files(&self, user_id: Uuid, scope: PurgeScope) -> Result<PurgeOutcome> {
        let mut t = self.tables.lock().await;

        let mut doomed: Vec<FileRecord> = match scope {
            PurgeScope::File(file_id) => match t.files.get(&file_id) {
                Some(f) if f.user_id == user_id => vec![f.clone()],
                _ => return Err(StorageError::NotFound(format!("file {}", file_id))),
            },
            PurgeScope::Trash => t
                .files
                .values()
                .filter(|f| f.user_id == user_id && f.is_deleted())
                .cloned()
                .collect(),
        };
        if doomed.is_empty() {
            return Ok(PurgeOutcome::default());
        }
        doomed.sort_by_key(|f| f.deleted_at);

        let mut chunks: Vec<ChunkRecord> = t
            .chunks
            .values()
            .filter(|c| doomed.iter().any(|f| f.file_id == c.file_id))
            .cloned()
            .collect();
        chunks.sort_by(|a, b| a.file_id.cmp(&b.file_id).then(a.chunk_index.cmp(&b.chunk_index)));

        let nodes: HashMap<String, NodeAddress> = t.nodes.iter().map(|(id, n)| (id.clone(), n.address())).collect();
        let locations = locate_chunks(&chunks, &nodes);

        for chunk in &chunks {
            t.chunks.remove(&chunk.chunk_id);
        }
        t.shares.retain(|s| !doomed.iter().any(|f| f.file_id == s.file_id));
        for file in &doomed {
            t.files.remove(&file.file_id);
        }

        let bytes_freed: i64 = doomed.iter().map(|f| f.file_size).sum();
        if let Some(quota) = t.users.get_mut(&user_id) {
            quota.storage_used = (quota.storage_used - bytes_freed).max(0);
        }

        Ok(PurgeOutcome {
            files_removed: doomed.len() as u64,
            bytes_freed,
            locations,
        })
    }

    async fn insert_folder(&self, user_id: Uuid, folder_name: &str, parent_folder_id: Option<Uuid>) -> Result<Folder> {
        let mut t = self.tables.lock().await;
        let folder = Folder {
            folder_id: Uuid::new_v4(),
            user_id,
            folder_name: folder_name.to_string(),
            parent_folder_id,
            created_at: Utc::now(),
        };
        t.folders.insert(folder.folder_id, folder.clone());
        Ok(folder)
    }

    async fn get_folder(&self, folder_id: Uuid) -> Result<Folder> {
        let t = self.tables.lock().await;
        t.folders
            .get(&folder_id)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("folder {}", folder_id)))
    }

    async fn list_folder(&self, user_id: Uuid, folder_id: Option<Uuid>, include_deleted: bool) -> Result<FolderListing> {
        let t = self.tables.lock().await;

        let mut files: Vec<FileRecord> = t
            .files
            .values()
            .filter(|f| f.user_id == user_id && f.parent_folder_id == folder_id)
            .filter(|f| include_deleted || !f.is_deleted())
            .cloned()
            .collect();
        files.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let mut folders: Vec<FolderEntry> = t
            .folders
            .values()
            .filter(|d| d.user_id == user_id && d.parent_folder_id == folder_id)
            .map(|d| FolderEntry {
                folder: d.clone(),
                file_count: t
                    .files
                    .values()
                    .filter(|f| f.parent_folder_id == Some(d.folder_id) && !f.is_deleted())
                    .count() as i64,
            })
            .collect();
        folders.sort_by(|a, b| a.folder.folder_name.cmp(&b.folder.folder_name));

        Ok(FolderListing { files, folders })
    }

    async fn insert_share(&self, file_id: Uuid, shared_by: Uuid, shared_with: Uuid, permission: SharePermission) -> Result<FileShare> {
        let mut t = self.tables.lock().await;
        let file = t
            .files
            .get_mut(&file_id)
            .ok_or_else(|| StorageError::NotFound(format!("file {}", file_id)))?;
        file.is_shared = true;
        file.modified_at = Utc::now();

        if let Some(existing) = t
            .shares
            .iter_mut()
            .find(|s| s.file_id == file_id && s.shared_with == shared_with)
        {
            existing.permission = permission.as_str().to_string();
            return Ok(existing.clone());
        }
        let share = FileShare {
            share_id: Uuid::new_v4(),
            file_id,
            shared_by,
            shared_with,
            permission: permission.as_str().to_string(),
            created_at: Utc::now(),
        };
        t.shares.push(share.clone());
        Ok(share)
    }

    async fn find_share(&self, file_id: Uuid, user_id: Uuid) -> Result<Option<FileShare>> {
        let t = self.tables.lock().await;
        Ok(t.shares
            .iter()
            .find(|s| s.file_id == file_id && s.shared_with == user_id)
            .cloned())
    }

    async fn shared_with(&self, user_id: Uuid) -> Result<Vec<FileRecord>> {
        let t = self.tables.lock().await;
        let mut shares: Vec<&FileShare> = t.shares.iter().filter(|s| s.shared_with == user_id).collect();
        shares.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(shares
            .into_iter()
            .filter_map(|s| t.files.get(&s.file_id))
            .filter(|f| !f.is_deleted())
            .cloned()
            .collect())
    }
}
