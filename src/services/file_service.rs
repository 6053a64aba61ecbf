use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use futures::Stream;
use log::{error, info, warn};
use metrics::{counter, histogram};
use serde::Serialize;
use uuid::Uuid;

use crate::db::{MetadataStore, PurgeOutcome};
use crate::distribution::{ChunkPlacement, Distributor};
use crate::error::{Result, StorageError};
use crate::models::{ChunkLocation, ChunkRecord, FileRecord, NewChunk};
use crate::node::client::ChunkClient;
use crate::registry::NodeRegistry;
use crate::services::metadata::{DeleteOutcome, FileManager};
use crate::utils::chunking::{checksum, chunk_id, chunk_plan, ChunkReader, DEFAULT_CHUNK_COUNT};

#[derive(Debug, Clone, Copy)]
pub struct UploadSettings {
    pub chunk_count: usize,
    pub replication_factor: usize,
}

impl Default for UploadSettings {
    fn default() -> Self {
        Self { chunk_count: DEFAULT_CHUNK_COUNT, replication_factor: 1 }
    }
}

/// Metadata frame sent ahead of the payload.
#[derive(Debug, Clone)]
pub struct UploadRequest {
    pub user_id: Uuid,
    pub filename: String,
    pub declared_size: u64,
    pub mime_type: Option<String>,
    pub parent_folder_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UploadReceipt {
    pub file_id: Uuid,
    pub chunks_stored: usize,
    pub chunks_total: usize,
}

/// File-info frame sent ahead of the bytes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FileInfo {
    pub file_id: Uuid,
    pub filename: String,
    pub total_size: i64,
    pub mime_type: String,
    pub chunk_count: usize,
}

pub struct Download {
    pub info: FileInfo,
    pub body: BoxStream<'static, Result<Bytes>>,
}

/// Drives uploads and downloads across the metadata store, the distributor and the nodes.
pub struct FileService {
    files: FileManager,
    distributor: Distributor,
    registry: Arc<NodeRegistry>,
    chunks: Arc<dyn ChunkClient>,
    settings: UploadSettings,
}

impl FileService {
    pub fn new(
        store: Arc<dyn MetadataStore>,
        registry: Arc<NodeRegistry>,
        chunks: Arc<dyn ChunkClient>,
        settings: UploadSettings,
    ) -> Self {
        Self {
            files: FileManager::new(store.clone()),
            distributor: Distributor::new(registry.clone(), store),
            registry,
            chunks,
            settings,
        }
    }

    pub fn files(&self) -> &FileManager {
        &self.files
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn distributor(&self) -> &Distributor {
        &self.distributor
    }

    /// Quota is reserved before the stream is touched and stays charged with the
    /// declared size even when some chunks could not be pushed.
    pub async fn upload<S, E>(&self, req: UploadRequest, stream: S) -> Result<UploadReceipt>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send,
        E: Display,
    {
        let start_time = Instant::now();
        if req.filename.trim().is_empty() {
            return Err(StorageError::InvalidArgument("filename must not be empty".to_string()));
        }
        let size = i64::try_from(req.declared_size)
            .map_err(|_| StorageError::InvalidArgument(format!("declared size {} is too large", req.declared_size)))?;

        self.files.reserve_quota(req.user_id, size).await?;
        // 从这里起，上传 future 被丢弃也要回滚
        let mut guard = UploadGuard::new(self.files.clone(), self.chunks.clone(), req.user_id, size);

        let plan = chunk_plan(req.declared_size, self.settings.chunk_count);
        let placements = match self
            .distributor
            .select_nodes_for_chunks(plan.len(), self.settings.replication_factor)
            .await
        {
            Ok(p) => p,
            Err(e) => {
                guard.rollback().await;
                return Err(e);
            }
        };

        let file = match self
            .files
            .create_file(req.user_id, &req.filename, size, req.mime_type.as_deref(), req.parent_folder_id)
            .await
        {
            Ok(f) => f,
            Err(e) => {
                guard.rollback().await;
                return Err(e);
            }
        };
        guard.file = Some(file.clone());

        let chunks_stored = match self.stream_chunks(&file, &plan, placements, stream).await {
            Ok(n) => n,
            Err(e) => {
                error!("Upload of {} aborted: {}", file.file_id, e);
                guard.rollback().await;
                return Err(e);
            }
        };
        guard.disarm();

        let receipt = UploadReceipt {
            file_id: file.file_id,
            chunks_stored,
            chunks_total: plan.len(),
        };
        if chunks_stored < plan.len() {
            warn!(
                "File {} uploaded incomplete: {}/{} chunks stored",
                file.file_id, chunks_stored, receipt.chunks_total
            );
        }
        info!(
            "File uploaded: {} ({}, {} bytes, {}/{} chunks)",
            file.file_id, file.filename, file.file_size, chunks_stored, receipt.chunks_total
        );
        counter!("dfs_files_uploaded_total").increment(1);
        histogram!("dfs_upload_duration_seconds").record(start_time.elapsed().as_secs_f64());
        Ok(receipt)
    }

    async fn stream_chunks<S, E>(
        &self,
        file: &FileRecord,
        plan: &[u64],
        placements: Vec<ChunkPlacement>,
        stream: S,
    ) -> Result<usize>
    where
        S: Stream<Item = std::result::Result<Bytes, E>> + Unpin + Send,
        E: Display,
    {
        let mut reader = ChunkReader::new(stream);
        let mut stored = 0;
        for (index, (size, placement)) in plan.iter().zip(placements).enumerate() {
            let data = reader.read_exact(*size as usize).await?;
            if self.push_chunk(file, index, data, &placement).await? {
                stored += 1;
            }
        }
        reader.finish().await?;
        Ok(stored)
    }

    /// `Ok(false)` when the primary refused the chunk; the chunk is skipped.
    async fn push_chunk(&self, file: &FileRecord, index: usize, data: Bytes, placement: &ChunkPlacement) -> Result<bool> {
        let id = chunk_id(&file.file_id, index);
        let sum = checksum(&data);
        let size = data.len() as i64;

        if let Err(e) = self.chunks.store_chunk(&placement.primary, &id, data.clone(), &sum).await {
            warn!("Skipping chunk {}: primary {} failed: {}", id, placement.primary.node_id, e);
            counter!("dfs_chunk_push_failures_total").increment(1);
            return Ok(false);
        }

        let mut replica_ids = Vec::with_capacity(placement.replicas.len());
        for replica in &placement.replicas {
            match self.chunks.store_chunk(replica, &id, data.clone(), &sum).await {
                Ok(()) => replica_ids.push(replica.node_id.clone()),
                Err(e) => {
                    warn!("Replica {} of chunk {} not stored: {}", replica.node_id, id, e);
                    counter!("dfs_chunk_push_failures_total").increment(1);
                }
            }
        }

        self.files
            .add_chunk(NewChunk {
                file_id: file.file_id,
                chunk_index: index as i32,
                size,
                checksum: sum,
                primary_node_id: placement.primary.node_id.clone(),
                replica_node_ids: replica_ids,
            })
            .await?;
        Ok(true)
    }

    pub async fn download(&self, file_id: Uuid, user_id: Uuid) -> Result<Download> {
        let file = self.files.readable_file(file_id, user_id).await?;
        let chunks = self.files.chunks(file_id).await?;
        verify_complete(&file, &chunks)?;

        // 先确认每个块都有在线节点，避免传到一半才失败
        for chunk in &chunks {
            if self.distributor.candidate_nodes_for_chunk(chunk).await.is_empty() {
                return Err(StorageError::DataLoss(format!("no online node holds chunk {}", chunk.chunk_id)));
            }
        }

        let info = FileInfo {
            file_id,
            filename: file.filename.clone(),
            total_size: file.file_size,
            mime_type: file.mime_type.clone(),
            chunk_count: chunks.len(),
        };
        let fetcher = ChunkFetcher {
            distributor: self.distributor.clone(),
            chunks: self.chunks.clone(),
        };
        let body = stream::try_unfold((chunks.into_iter(), fetcher), move |(mut pending, fetcher)| async move {
            match pending.next() {
                Some(chunk) => {
                    let data = fetcher.fetch(&chunk).await?;
                    Ok::<_, StorageError>(Some((data, (pending, fetcher))))
                }
                None => {
                    // 只有最后一块送出后才算一次下载
                    info!("File downloaded: {} by {}", file_id, user_id);
                    counter!("dfs_files_downloaded_total").increment(1);
                    Ok(None)
                }
            }
        })
        .boxed();

        Ok(Download { info, body })
    }

    /// Reads the whole file into memory.
    pub async fn download_bytes(&self, file_id: Uuid, user_id: Uuid) -> Result<(FileInfo, Vec<u8>)> {
        let Download { info, mut body } = self.download(file_id, user_id).await?;
        let mut out = Vec::with_capacity(info.total_size.max(0) as usize);
        while let Some(piece) = body.next().await {
            out.extend_from_slice(&piece?);
        }
        Ok((info, out))
    }

    pub async fn delete_file(&self, file_id: Uuid, user_id: Uuid, permanent: bool) -> Result<DeleteOutcome> {
        let outcome = self.files.delete_file(file_id, user_id, permanent).await?;
        if let DeleteOutcome::Purged(purged) = &outcome {
            self.delete_physical(&purged.locations).await;
        }
        counter!("dfs_files_deleted_total").increment(1);
        Ok(outcome)
    }

    pub async fn empty_trash(&self, user_id: Uuid) -> Result<PurgeOutcome> {
        let outcome = self.files.empty_trash(user_id).await?;
        self.delete_physical(&outcome.locations).await;
        counter!("dfs_files_deleted_total").increment(outcome.files_removed);
        Ok(outcome)
    }

    async fn delete_physical(&self, locations: &[ChunkLocation]) {
        delete_locations(self.chunks.as_ref(), locations).await;
    }
}

/// Best effort: failures are logged and left as orphans on the node.
async fn delete_locations(chunks: &dyn ChunkClient, locations: &[ChunkLocation]) {
    let deletions = locations.iter().flat_map(|loc| {
        loc.addresses().map(move |addr| async move {
            if let Err(e) = chunks.delete_chunk(addr, &loc.chunk_id).await {
                warn!("Failed to delete chunk {} from {}: {}", loc.chunk_id, addr.node_id, e);
            }
        })
    });
    futures::future::join_all(deletions).await;
}

/// Undoes an upload in progress unless disarmed.
///
/// Before the file row exists only the quota reservation is released; afterwards the
/// row is purged, which releases the quota and yields the chunk locations to delete.
/// When the upload future is dropped (the client hung up) the rollback is spawned
/// onto the runtime from `Drop`.
struct UploadGuard {
    files: FileManager,
    chunks: Arc<dyn ChunkClient>,
    user_id: Uuid,
    reserved: i64,
    file: Option<FileRecord>,
    armed: bool,
}

impl UploadGuard {
    fn new(files: FileManager, chunks: Arc<dyn ChunkClient>, user_id: Uuid, reserved: i64) -> Self {
        Self { files, chunks, user_id, reserved, file: None, armed: true }
    }

    fn disarm(mut self) {
        self.armed = false;
    }

    async fn rollback(mut self) {
        rollback_upload(&self.files, self.chunks.as_ref(), self.user_id, self.reserved, self.file.as_ref()).await;
        self.armed = false;
    }
}

impl Drop for UploadGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let files = self.files.clone();
        let chunks = self.chunks.clone();
        let (user_id, reserved, file) = (self.user_id, self.reserved, self.file.take());
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                warn!("Upload by {} was cancelled, rolling back", user_id);
                handle.spawn(async move {
                    rollback_upload(&files, chunks.as_ref(), user_id, reserved, file.as_ref()).await;
                });
            }
            Err(_) => error!(
                "Upload by {} dropped outside a runtime, {} bytes stay reserved",
                user_id, reserved
            ),
        }
    }
}

async fn rollback_upload(
    files: &FileManager,
    chunks: &dyn ChunkClient,
    user_id: Uuid,
    reserved: i64,
    file: Option<&FileRecord>,
) {
    match file {
        Some(file) => match files.delete_file(file.file_id, file.user_id, true).await {
            Ok(DeleteOutcome::Purged(outcome)) => delete_locations(chunks, &outcome.locations).await,
            Ok(DeleteOutcome::Trashed(_)) => {}
            Err(e) => error!("Failed to roll back upload {}: {}", file.file_id, e),
        },
        None => {
            if let Err(e) = files.release_quota(user_id, reserved).await {
                error!("Failed to release {} bytes reserved by {}: {}", reserved, user_id, e);
            }
        }
    }
}

/// Chunk rows must be `0..n` and add up to the file size.
fn verify_complete(file: &FileRecord, chunks: &[ChunkRecord]) -> Result<()> {
    for (expected, chunk) in chunks.iter().enumerate() {
        if chunk.chunk_index as usize != expected {
            return Err(StorageError::DataLoss(format!(
                "file {} is missing chunk {}",
                file.file_id, expected
            )));
        }
    }
    let total: i64 = chunks.iter().map(|c| c.size).sum();
    if chunks.is_empty() || total != file.file_size {
        return Err(StorageError::DataLoss(format!(
            "file {} has {} of {} bytes recorded",
            file.file_id, total, file.file_size
        )));
    }
    Ok(())
}

#[derive(Clone)]
struct ChunkFetcher {
    distributor: Distributor,
    chunks: Arc<dyn ChunkClient>,
}

impl ChunkFetcher {
    /// Tries each online holder in resolution order; bytes must match the recorded checksum.
    async fn fetch(&self, chunk: &ChunkRecord) -> Result<Bytes> {
        for node in self.distributor.candidate_nodes_for_chunk(chunk).await {
            match self.chunks.retrieve_chunk(&node, &chunk.chunk_id).await {
                Ok(data) if checksum(&data) == chunk.checksum => return Ok(data),
                Ok(_) => warn!("Chunk {} from {} failed checksum", chunk.chunk_id, node.node_id),
                Err(e) => warn!("Chunk {} unavailable on {}: {}", chunk.chunk_id, node.node_id, e),
            }
        }
        Err(StorageError::DataLoss(format!(
            "chunk {} could not be retrieved from any node",
            chunk.chunk_id
        )))
    }
}
