use serde::{Serialize, Deserialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::models::node::NodeAddress;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct ChunkRecord {
    pub chunk_id: String,
    pub file_id: Uuid,
    pub chunk_index: i32,
    pub size: i64,
    pub checksum: String,
    pub primary_node_id: String,
    pub replica_node_ids: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl ChunkRecord {
    pub fn references_node(&self, node_id: &str) -> bool {
        self.primary_node_id == node_id || self.replica_node_ids.iter().any(|r| r == node_id)
    }
}

#[derive(Debug, Clone)]
pub struct NewChunk {
    pub file_id: Uuid,
    pub chunk_index: i32,
    pub size: i64,
    pub checksum: String,
    pub primary_node_id: String,
    pub replica_node_ids: Vec<String>,
}

/// Where a chunk physically lives, captured before its row is removed.
/// `primary` is `None` when the node row is already gone.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ChunkLocation {
    pub chunk_id: String,
    pub primary: Option<NodeAddress>,
    pub replicas: Vec<NodeAddress>,
}

impl ChunkLocation {
    pub fn addresses(&self) -> impl Iterator<Item = &NodeAddress> {
        self.primary.iter().chain(self.replicas.iter())
    }
}
