use std::sync::Arc;

use chrono::Utc;
use log::info;
use uuid::Uuid;

use crate::db::{MetadataStore, PurgeOutcome, PurgeScope};
use crate::error::{Result, StorageError};
use crate::models::file::DEFAULT_MIME_TYPE;
use crate::models::{
    ChunkRecord, FileRecord, FileShare, Folder, FolderListing, NewChunk, NewFile, SharePermission,
    StorageInfo, UserQuota,
};

#[derive(Debug, Clone, PartialEq)]
pub enum DeleteOutcome {
    /// Soft delete: recoverable, quota untouched.
    Trashed(FileRecord),
    Purged(PurgeOutcome),
}

/// File, folder, share and quota bookkeeping on top of a [`MetadataStore`].
#[derive(Clone)]
pub struct FileManager {
    store: Arc<dyn MetadataStore>,
}

impl FileManager {
    pub fn new(store: Arc<dyn MetadataStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn MetadataStore> {
        &self.store
    }

    pub async fn create_file(
        &self,
        user_id: Uuid,
        filename: &str,
        size: i64,
        mime_type: Option<&str>,
        parent_folder_id: Option<Uuid>,
    ) -> Result<FileRecord> {
        let filename = filename.trim();
        if filename.is_empty() {
            return Err(StorageError::InvalidArgument("filename must not be empty".to_string()));
        }
        if size < 0 {
            return Err(StorageError::InvalidArgument("file size must not be negative".to_string()));
        }
        if let Some(folder_id) = parent_folder_id {
            self.owned_folder(folder_id, user_id).await?;
        }
        let mime_type = mime_type
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .unwrap_or(DEFAULT_MIME_TYPE)
            .to_string();
        self.store
            .insert_file(NewFile {
                user_id,
                filename: filename.to_string(),
                file_size: size,
                mime_type,
                parent_folder_id,
            })
            .await
    }

    pub async fn add_chunk(&self, chunk: NewChunk) -> Result<ChunkRecord> {
        self.store.insert_chunk(chunk).await
    }

    pub async fn chunks(&self, file_id: Uuid) -> Result<Vec<ChunkRecord>> {
        self.store.list_chunks(file_id).await
    }

    /// Files that don't exist and files owned by someone else look the same.
    pub async fn owned_file(&self, file_id: Uuid, user_id: Uuid) -> Result<FileRecord> {
        match self.store.get_file(file_id).await {
            Ok(file) if file.user_id == user_id => Ok(file),
            Ok(_) => Err(StorageError::NotFound(format!("file {}", file_id))),
            Err(e) => Err(e),
        }
    }

    /// Owner or share holder, and not in the trash.
    pub async fn readable_file(&self, file_id: Uuid, user_id: Uuid) -> Result<FileRecord> {
        let file = self.store.get_file(file_id).await?;
        if file.is_deleted() {
            return Err(StorageError::NotFound(format!("file {}", file_id)));
        }
        if file.user_id == user_id || self.store.find_share(file_id, user_id).await?.is_some() {
            return Ok(file);
        }
        Err(StorageError::PermissionDenied(format!("no access to file {}", file_id)))
    }

    pub async fn delete_file(&self, file_id: Uuid, user_id: Uuid, permanent: bool) -> Result<DeleteOutcome> {
        if permanent {
            let outcome = self.store.purge_files(user_id, PurgeScope::File(file_id)).await?;
            info!("File {} permanently deleted, {} bytes released", file_id, outcome.bytes_freed);
            return Ok(DeleteOutcome::Purged(outcome));
        }

        let file = self.owned_file(file_id, user_id).await?;
        if file.is_deleted() {
            return Err(StorageError::FailedPrecondition(format!("file {} already deleted", file_id)));
        }
        let file = self.store.set_deleted_at(file_id, Some(Utc::now())).await?;
        info!("File {} moved to trash", file_id);
        Ok(DeleteOutcome::Trashed(file))
    }

    pub async fn restore_file(&self, file_id: Uuid, user_id: Uuid) -> Result<FileRecord> {
        let file = self.owned_file(file_id, user_id).await?;
        if !file.is_deleted() {
            return Err(StorageError::FailedPrecondition(format!("file {} is not deleted", file_id)));
        }
        let file = self.store.set_deleted_at(file_id, None).await?;
        info!("File {} restored", file_id);
        Ok(file)
    }

    pub async fn empty_trash(&self, user_id: Uuid) -> Result<PurgeOutcome> {
        let outcome = self.store.purge_files(user_id, PurgeScope::Trash).await?;
        info!(
            "Trash emptied for {}: {} files, {} bytes",
            user_id, outcome.files_removed, outcome.bytes_freed
        );
        Ok(outcome)
    }

    pub async fn list_files(&self, user_id: Uuid, folder_id: Option<Uuid>, include_deleted: bool) -> Result<FolderListing> {
        if let Some(folder_id) = folder_id {
            self.owned_folder(folder_id, user_id).await?;
        }
        self.store.list_folder(user_id, folder_id, include_deleted).await
    }

    pub async fn create_folder(&self, user_id: Uuid, folder_name: &str, parent_folder_id: Option<Uuid>) -> Result<Folder> {
        let folder_name = folder_name.trim();
        if folder_name.is_empty() {
            return Err(StorageError::InvalidArgument("folder name must not be empty".to_string()));
        }
        if let Some(parent) = parent_folder_id {
            self.owned_folder(parent, user_id).await?;
        }
        self.store.insert_folder(user_id, folder_name, parent_folder_id).await
    }

    async fn owned_folder(&self, folder_id: Uuid, user_id: Uuid) -> Result<Folder> {
        match self.store.get_folder(folder_id).await {
            Ok(folder) if folder.user_id == user_id => Ok(folder),
            Ok(_) => Err(StorageError::NotFound(format!("folder {}", folder_id))),
            Err(e) => Err(e),
        }
    }

    pub async fn share_file(
        &self,
        file_id: Uuid,
        owner_id: Uuid,
        shared_with: Uuid,
        permission: SharePermission,
    ) -> Result<FileShare> {
        let file = self.owned_file(file_id, owner_id).await?;
        if file.is_deleted() {
            return Err(StorageError::FailedPrecondition(format!("file {} is in the trash", file_id)));
        }
        if shared_with == owner_id {
            return Err(StorageError::InvalidArgument("cannot share a file with its owner".to_string()));
        }
        self.store.get_quota(shared_with).await?;
        let share = self.store.insert_share(file_id, owner_id, shared_with, permission).await?;
        info!("File {} shared with {} ({})", file_id, shared_with, permission);
        Ok(share)
    }

    pub async fn shared_with(&self, user_id: Uuid) -> Result<Vec<FileRecord>> {
        self.store.shared_with(user_id).await
    }

    pub async fn storage_info(&self, user_id: Uuid) -> Result<StorageInfo> {
        let quota = self.store.get_quota(user_id).await?;
        Ok(StorageInfo::from(&quota))
    }

    pub async fn set_allocation(&self, user_id: Uuid, allocated: i64) -> Result<UserQuota> {
        if allocated < 0 {
            return Err(StorageError::InvalidArgument("allocation must not be negative".to_string()));
        }
        self.store.set_allocation(user_id, allocated).await
    }

    pub async fn reserve_quota(&self, user_id: Uuid, bytes: i64) -> Result<UserQuota> {
        self.store.reserve_quota(user_id, bytes).await
    }

    pub async fn release_quota(&self, user_id: Uuid, bytes: i64) -> Result<UserQuota> {
        self.store.release_quota(user_id, bytes).await
    }
}
