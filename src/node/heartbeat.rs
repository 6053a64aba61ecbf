use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};

use crate::error::{Result, StorageError};
use crate::node::chunk_store::ChunkStore;
use crate::node::client::GatewayClient;
use crate::protocol::{HeartbeatRequest, RegisterNodeRequest};

/// Keeps one node known to the gateway: registers, then reports usage on a timer.
pub struct NodeAgent {
    gateway: GatewayClient,
    store: Arc<ChunkStore>,
    registration: RegisterNodeRequest,
    interval: Duration,
}

impl NodeAgent {
    pub fn new(gateway: GatewayClient, store: Arc<ChunkStore>, registration: RegisterNodeRequest, interval: Duration) -> Self {
        Self { gateway, store, registration, interval }
    }

    /// Retries until the gateway accepts the node.
    pub async fn register_until_accepted(&self) {
        loop {
            match self.gateway.register(&self.registration).await {
                Ok(ack) => {
                    info!("Registered {} with gateway: {}", self.registration.node_id, ack.message);
                    return;
                }
                Err(e) => {
                    warn!("Registration of {} failed: {}; retrying in {:?}", self.registration.node_id, e, self.interval);
                    tokio::time::sleep(self.interval).await;
                }
            }
        }
    }

    /// One usage report. A gateway that no longer knows the node gets a fresh registration.
    pub async fn beat(&self) -> Result<()> {
        let usage = self.store.usage().await?;
        let req = HeartbeatRequest {
            node_id: self.registration.node_id.clone(),
            used_bytes: usage.bytes,
            chunk_count: usage.chunks,
        };
        match self.gateway.heartbeat(&req).await {
            Ok(_) => Ok(()),
            Err(StorageError::NotFound(_)) => {
                warn!("Gateway forgot node {}, registering again", req.node_id);
                self.gateway.register(&self.registration).await?;
                self.gateway.heartbeat(&req).await.map(|_| ())
            }
            Err(e) => Err(e),
        }
    }

    pub async fn run(self) {
        self.register_until_accepted().await;
        let mut ticker = tokio::time::interval(self.interval);
        loop {
            ticker.tick().await;
            if let Err(e) = self.beat().await {
                error!("Heartbeat for {} failed: {}", self.registration.node_id, e);
            }
        }
    }
}
