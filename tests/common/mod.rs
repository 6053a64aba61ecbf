#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use tokio::sync::Mutex;
use uuid::Uuid;

use distributed_chunk_storage::db::{MemoryMetadataStore, MetadataStore};
use distributed_chunk_storage::error::{Result, StorageError};
use distributed_chunk_storage::models::NodeAddress;
use distributed_chunk_storage::node::ChunkClient;
use distributed_chunk_storage::registry::{NodeRegistration, NodeRegistry};
use distributed_chunk_storage::services::{FileService, UploadRequest, UploadSettings};

pub const MB: i64 = 1024 * 1024;
pub const GB: i64 = 1024 * MB;

/// Chunk nodes kept in a map. Individual nodes can be made to fail.
#[derive(Default)]
pub struct FakeChunkClient {
    chunks: Mutex<HashMap<(String, String), Bytes>>,
    failing: Mutex<HashSet<String>>,
}

impl FakeChunkClient {
    pub async fn fail_node(&self, node_id: &str) {
        self.failing.lock().await.insert(node_id.to_string());
    }

    pub async fn heal_node(&self, node_id: &str) {
        self.failing.lock().await.remove(node_id);
    }

    pub async fn corrupt(&self, node_id: &str, chunk_id: &str) {
        if let Some(data) = self.chunks.lock().await.get_mut(&(node_id.to_string(), chunk_id.to_string())) {
            let mut bytes = data.to_vec();
            bytes.push(0xff);
            *data = Bytes::from(bytes);
        }
    }

    pub async fn stored_on(&self, node_id: &str) -> Vec<String> {
        let mut ids: Vec<String> = self
            .chunks
            .lock()
            .await
            .keys()
            .filter(|(node, _)| node == node_id)
            .map(|(_, chunk)| chunk.clone())
            .collect();
        ids.sort();
        ids
    }

    pub async fn total_chunks(&self) -> usize {
        self.chunks.lock().await.len()
    }

    async fn check(&self, node: &NodeAddress) -> Result<()> {
        if self.failing.lock().await.contains(&node.node_id) {
            return Err(StorageError::Unavailable(format!("node {} is down", node.node_id)));
        }
        Ok(())
    }
}

#[async_trait]
impl ChunkClient for FakeChunkClient {
    async fn store_chunk(&self, node: &NodeAddress, chunk_id: &str, data: Bytes, _checksum: &str) -> Result<()> {
        self.check(node).await?;
        self.chunks.lock().await.insert((node.node_id.clone(), chunk_id.to_string()), data);
        Ok(())
    }

    async fn retrieve_chunk(&self, node: &NodeAddress, chunk_id: &str) -> Result<Bytes> {
        self.check(node).await?;
        self.chunks
            .lock()
            .await
            .get(&(node.node_id.clone(), chunk_id.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("chunk {}", chunk_id)))
    }

    async fn delete_chunk(&self, node: &NodeAddress, chunk_id: &str) -> Result<()> {
        self.check(node).await?;
        self.chunks.lock().await.remove(&(node.node_id.clone(), chunk_id.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub store: Arc<MemoryMetadataStore>,
    pub registry: Arc<NodeRegistry>,
    pub client: Arc<FakeChunkClient>,
    pub service: FileService,
}

impl Harness {
    pub fn new(chunk_count: usize, replication_factor: usize) -> Self {
        let store = Arc::new(MemoryMetadataStore::new());
        let registry = Arc::new(NodeRegistry::new(store.clone(), chrono::Duration::seconds(120)));
        let client = Arc::new(FakeChunkClient::default());
        let service = FileService::new(
            store.clone(),
            registry.clone(),
            client.clone(),
            UploadSettings { chunk_count, replication_factor },
        );
        Self { store, registry, client, service }
    }

    pub async fn add_node(&self, node_id: &str, capacity: i64) {
        self.registry
            .register_node(registration(node_id, capacity))
            .await
            .unwrap();
    }

    pub async fn user_with_quota(&self, allocated: i64) -> Uuid {
        let user = Uuid::new_v4();
        self.store.set_allocation(user, allocated).await.unwrap();
        user
    }

    pub async fn used(&self, user: Uuid) -> i64 {
        self.store.get_quota(user).await.unwrap().storage_used
    }

    pub async fn upload(&self, user: Uuid, name: &str, data: &[u8]) -> Result<distributed_chunk_storage::services::UploadReceipt> {
        self.service.upload(request(user, name, data.len() as u64), frames(data)).await
    }
}

pub fn registration(node_id: &str, capacity: i64) -> NodeRegistration {
    NodeRegistration {
        node_id: node_id.to_string(),
        host: "127.0.0.1".to_string(),
        port: 9000,
        capacity,
        cpu_cores: 2,
    }
}

pub fn request(user: Uuid, name: &str, declared_size: u64) -> UploadRequest {
    UploadRequest {
        user_id: user,
        filename: name.to_string(),
        declared_size,
        mime_type: None,
        parent_folder_id: None,
    }
}

/// Splits `data` into uneven frames the way a network body would arrive.
pub fn frames(data: &[u8]) -> BoxStream<'static, std::result::Result<Bytes, std::io::Error>> {
    let pieces: Vec<std::result::Result<Bytes, std::io::Error>> = data
        .chunks(64 * 1024 + 7)
        .map(|c| Ok(Bytes::copy_from_slice(c)))
        .collect();
    stream::iter(pieces).boxed()
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
