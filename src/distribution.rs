use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;

use crate::db::MetadataStore;
use crate::error::{Result, StorageError};
use crate::models::file_chunk::ChunkRecord;
use crate::models::node::{NodeAddress, StorageNode};
use crate::registry::NodeRegistry;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChunkPlacement {
    pub chunk_index: usize,
    pub primary: NodeAddress,
    pub replicas: Vec<NodeAddress>,
}

/// Picks nodes for new chunks and finds a live holder for existing ones.
#[derive(Clone)]
pub struct Distributor {
    registry: Arc<NodeRegistry>,
    store: Arc<dyn MetadataStore>,
}

impl Distributor {
    pub fn new(registry: Arc<NodeRegistry>, store: Arc<dyn MetadataStore>) -> Self {
        Self { registry, store }
    }

    pub async fn select_nodes_for_chunks(&self, chunk_count: usize, replication_factor: usize) -> Result<Vec<ChunkPlacement>> {
        self.select_nodes_for_chunks_at(chunk_count, replication_factor, Utc::now()).await
    }

    pub async fn select_nodes_for_chunks_at(
        &self,
        chunk_count: usize,
        replication_factor: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<ChunkPlacement>> {
        let nodes = self.registry.nodes_in_order().await;
        if nodes.is_empty() {
            return Err(StorageError::Unavailable("no storage nodes registered".to_string()));
        }
        let window = self.registry.liveness_window();
        let online: Vec<StorageNode> = nodes.into_iter().filter(|n| n.is_online_at(now, window)).collect();
        if online.is_empty() {
            return Err(StorageError::Unavailable("no online storage nodes".to_string()));
        }
        let candidates: Vec<StorageNode> = online.into_iter().filter(|n| n.has_space()).collect();
        if candidates.is_empty() {
            return Err(StorageError::Unavailable("all online storage nodes are full".to_string()));
        }
        Ok(assign_round_robin(candidates, chunk_count, replication_factor, &mut rand::thread_rng()))
    }

    pub async fn resolve_node_for_chunk(&self, chunk_id: &str) -> Result<NodeAddress> {
        self.resolve_node_for_chunk_at(chunk_id, Utc::now()).await
    }

    /// Primary if online, else the first online replica in recorded order.
    pub async fn resolve_node_for_chunk_at(&self, chunk_id: &str, now: DateTime<Utc>) -> Result<NodeAddress> {
        let chunk = self.store.get_chunk(chunk_id).await?;
        self.candidate_nodes_for_chunk_at(&chunk, now)
            .await
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::NotFound(format!("no online node holds chunk {}", chunk_id)))
    }

    pub async fn candidate_nodes_for_chunk(&self, chunk: &ChunkRecord) -> Vec<NodeAddress> {
        self.candidate_nodes_for_chunk_at(chunk, Utc::now()).await
    }

    /// Online holders of the chunk in resolution order.
    pub async fn candidate_nodes_for_chunk_at(&self, chunk: &ChunkRecord, now: DateTime<Utc>) -> Vec<NodeAddress> {
        let window = self.registry.liveness_window();
        let mut found = Vec::with_capacity(1 + chunk.replica_node_ids.len());
        for node_id in std::iter::once(&chunk.primary_node_id).chain(chunk.replica_node_ids.iter()) {
            if let Some(node) = self.registry.get_node(node_id).await {
                if node.is_online_at(now, window) {
                    found.push(node.address());
                }
            }
        }
        found
    }
}

/// Sorts by remaining capacity then health, both descending. The sort is
/// stable so ties keep registration order. Chunk `i` goes to candidate
/// `i % len` and replicas are drawn at random from the other candidates.
pub fn assign_round_robin<R: Rng + ?Sized>(
    mut candidates: Vec<StorageNode>,
    chunk_count: usize,
    replication_factor: usize,
    rng: &mut R,
) -> Vec<ChunkPlacement> {
    if candidates.is_empty() {
        return Vec::new();
    }
    candidates.sort_by(|a, b| {
        b.remaining()
            .cmp(&a.remaining())
            .then_with(|| b.health_score.cmp(&a.health_score))
    });

    let extra = replication_factor.saturating_sub(1);
    (0..chunk_count)
        .map(|i| {
            let primary = &candidates[i % candidates.len()];
            let replicas = if extra > 0 {
                let others: Vec<&StorageNode> = candidates.iter().filter(|c| c.node_id != primary.node_id).collect();
                others
                    .choose_multiple(rng, extra.min(others.len()))
                    .map(|n| n.address())
                    .collect()
            } else {
                Vec::new()
            };
            ChunkPlacement {
                chunk_index: i,
                primary: primary.address(),
                replicas,
            }
        })
        .collect()
}
