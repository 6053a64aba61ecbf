use serde::{Serialize, Deserialize};
use chrono::{DateTime, Duration, Utc};

/// Default health score; nothing recomputes it yet.
pub const DEFAULT_HEALTH_SCORE: i32 = 100;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, sqlx::FromRow)]
pub struct StorageNode {
    pub node_id: String,
    pub host: String,
    pub port: i32,
    pub capacity: i64,
    pub used: i64,
    pub cpu_cores: i32,
    pub health_score: i32,
    pub chunk_count: i64,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl StorageNode {
    pub fn is_online_at(&self, now: DateTime<Utc>, window: Duration) -> bool {
        match self.last_heartbeat {
            Some(ts) => now - ts < window,
            None => false,
        }
    }

    pub fn remaining(&self) -> i64 {
        (self.capacity - self.used).max(0)
    }

    pub fn has_space(&self) -> bool {
        self.used < self.capacity
    }

    pub fn address(&self) -> NodeAddress {
        NodeAddress {
            node_id: self.node_id.clone(),
            host: self.host.clone(),
            port: self.port,
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeAddress {
    pub node_id: String,
    pub host: String,
    pub port: i32,
}

impl NodeAddress {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    Online,
    Offline,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct NodeStatus {
    #[serde(flatten)]
    pub node: StorageNode,
    pub status: NodeState,
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct GlobalStats {
    pub total_capacity: i64,
    pub usable_capacity: i64,
    pub total_used: i64,
    pub online_nodes: usize,
    pub offline_nodes: usize,
    pub total_nodes: usize,
}
