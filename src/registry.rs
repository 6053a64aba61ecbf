use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use log::{info, warn};
use tokio::sync::RwLock;

use crate::db::MetadataStore;
use crate::error::{Result, StorageError};
use crate::models::node::{GlobalStats, NodeState, NodeStatus, StorageNode, DEFAULT_HEALTH_SCORE};

pub const DEFAULT_LIVENESS_WINDOW_SECS: i64 = 120;

#[derive(Debug, Clone)]
pub struct NodeRegistration {
    pub node_id: String,
    pub host: String,
    pub port: i32,
    pub capacity: i64,
    pub cpu_cores: i32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistrationOutcome {
    pub newly_registered: bool,
    /// Change to the global capacity pool caused by this registration.
    pub capacity_delta: i64,
}

struct Entry {
    node: StorageNode,
    seq: u64,
}

/// Gateway-side directory of chunk stores.
///
/// Every mutation is written to the metadata store first and then applied to
/// the in-memory table, and the table lock is never held across I/O. Online
/// state is derived from `last_heartbeat` on every read.
pub struct NodeRegistry {
    nodes: RwLock<HashMap<String, Entry>>,
    next_seq: AtomicU64,
    store: Arc<dyn MetadataStore>,
    liveness_window: Duration,
}

impl NodeRegistry {
    pub fn new(store: Arc<dyn MetadataStore>, liveness_window: Duration) -> Self {
        Self {
            nodes: RwLock::new(HashMap::new()),
            next_seq: AtomicU64::new(0),
            store,
            liveness_window,
        }
    }

    pub fn liveness_window(&self) -> Duration {
        self.liveness_window
    }

    /// Hydrates the table from persisted nodes, in registration order.
    pub async fn load(&self) -> Result<usize> {
        let persisted = self.store.load_nodes().await?;
        let mut nodes = self.nodes.write().await;
        for node in persisted {
            let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
            nodes.insert(node.node_id.clone(), Entry { node, seq });
        }
        Ok(nodes.len())
    }

    pub async fn register_node(&self, reg: NodeRegistration) -> Result<RegistrationOutcome> {
        self.register_node_at(reg, Utc::now()).await
    }

    pub async fn register_node_at(&self, reg: NodeRegistration, now: DateTime<Utc>) -> Result<RegistrationOutcome> {
        if reg.node_id.trim().is_empty() {
            return Err(StorageError::InvalidArgument("node_id must not be empty".to_string()));
        }
        if reg.capacity < 0 {
            return Err(StorageError::InvalidArgument("capacity must not be negative".to_string()));
        }

        let previous = self.get_node(&reg.node_id).await;
        let mut node = StorageNode {
            node_id: reg.node_id.clone(),
            host: reg.host,
            port: reg.port,
            capacity: reg.capacity,
            used: 0,
            cpu_cores: reg.cpu_cores,
            health_score: DEFAULT_HEALTH_SCORE,
            chunk_count: 0,
            last_heartbeat: Some(now),
            created_at: now,
        };
        if let Some(prev) = &previous {
            node.used = prev.used;
            node.chunk_count = prev.chunk_count;
            node.health_score = prev.health_score;
            node.created_at = prev.created_at;
        }

        self.store.upsert_node(&node).await?;

        let mut nodes = self.nodes.write().await;
        // 以锁内的状态为准，期间可能有心跳写入
        let (outcome, seq) = match nodes.get(&reg.node_id) {
            Some(entry) => {
                node.used = entry.node.used;
                node.chunk_count = entry.node.chunk_count;
                let outcome = RegistrationOutcome {
                    newly_registered: false,
                    capacity_delta: node.capacity - entry.node.capacity,
                };
                (outcome, entry.seq)
            }
            None => {
                let outcome = RegistrationOutcome {
                    newly_registered: true,
                    capacity_delta: node.capacity,
                };
                (outcome, self.next_seq.fetch_add(1, Ordering::SeqCst))
            }
        };
        nodes.insert(reg.node_id.clone(), Entry { node, seq });
        drop(nodes);

        if outcome.newly_registered {
            info!("Node {} registered, global pool +{} bytes", reg.node_id, outcome.capacity_delta);
        } else if outcome.capacity_delta != 0 {
            info!("Node {} re-registered, capacity changed by {} bytes", reg.node_id, outcome.capacity_delta);
        } else {
            info!("Node {} re-registered", reg.node_id);
        }
        Ok(outcome)
    }

    pub async fn heartbeat(&self, node_id: &str, used: i64, chunk_count: i64) -> Result<()> {
        self.heartbeat_at(node_id, used, chunk_count, Utc::now()).await
    }

    /// Fails with `NotFound` for a node that never registered; the node is
    /// expected to register again.
    pub async fn heartbeat_at(&self, node_id: &str, used: i64, chunk_count: i64, now: DateTime<Utc>) -> Result<()> {
        if !self.nodes.read().await.contains_key(node_id) {
            return Err(StorageError::NotFound(format!("node {} is not registered", node_id)));
        }
        if !self.store.update_node_usage(node_id, used, chunk_count, now).await? {
            warn!("Heartbeat from {} but its row is gone", node_id);
            self.nodes.write().await.remove(node_id);
            return Err(StorageError::NotFound(format!("node {} is not registered", node_id)));
        }

        let mut nodes = self.nodes.write().await;
        if let Some(entry) = nodes.get_mut(node_id) {
            entry.node.used = used;
            entry.node.chunk_count = chunk_count;
            entry.node.last_heartbeat = Some(now);
        }
        Ok(())
    }

    pub async fn global_stats(&self) -> GlobalStats {
        self.global_stats_at(Utc::now()).await
    }

    pub async fn global_stats_at(&self, now: DateTime<Utc>) -> GlobalStats {
        let nodes = self.nodes.read().await;
        let mut stats = GlobalStats::default();
        for entry in nodes.values() {
            let node = &entry.node;
            stats.total_capacity += node.capacity;
            stats.total_used += node.used;
            stats.total_nodes += 1;
            if node.is_online_at(now, self.liveness_window) {
                stats.usable_capacity += node.capacity;
                stats.online_nodes += 1;
            } else {
                stats.offline_nodes += 1;
            }
        }
        metrics::gauge!("dfs_online_nodes").set(stats.online_nodes as f64);
        stats
    }

    /// Every node, in registration order.
    pub async fn nodes_in_order(&self) -> Vec<StorageNode> {
        let nodes = self.nodes.read().await;
        let mut entries: Vec<&Entry> = nodes.values().collect();
        entries.sort_by_key(|e| e.seq);
        entries.into_iter().map(|e| e.node.clone()).collect()
    }

    pub async fn list_nodes_at(&self, now: DateTime<Utc>) -> Vec<NodeStatus> {
        self.nodes_in_order()
            .await
            .into_iter()
            .map(|node| {
                let status = if node.is_online_at(now, self.liveness_window) {
                    NodeState::Online
                } else {
                    NodeState::Offline
                };
                NodeStatus { node, status }
            })
            .collect()
    }

    pub async fn list_nodes(&self) -> Vec<NodeStatus> {
        self.list_nodes_at(Utc::now()).await
    }

    pub async fn get_node(&self, node_id: &str) -> Option<StorageNode> {
        self.nodes.read().await.get(node_id).map(|e| e.node.clone())
    }

    pub async fn is_online_at(&self, node_id: &str, now: DateTime<Utc>) -> bool {
        self.nodes
            .read()
            .await
            .get(node_id)
            .map(|e| e.node.is_online_at(now, self.liveness_window))
            .unwrap_or(false)
    }

    /// Only nodes that hold no chunk may leave.
    pub async fn remove_node(&self, node_id: &str) -> Result<StorageNode> {
        let node = self
            .get_node(node_id)
            .await
            .ok_or_else(|| StorageError::NotFound(format!("node {}", node_id)))?;
        let referenced = self.store.count_chunks_on_node(node_id).await?;
        if referenced > 0 {
            return Err(StorageError::FailedPrecondition(format!(
                "node {} still holds {} chunks",
                node_id, referenced
            )));
        }
        self.store.delete_node(node_id).await?;
        self.nodes.write().await.remove(node_id);
        info!("Node {} removed, global pool -{} bytes", node_id, node.capacity);
        Ok(node)
    }
}
