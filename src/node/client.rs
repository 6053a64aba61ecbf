use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;

use crate::error::{Result, StorageError};
use crate::models::node::NodeAddress;
use crate::protocol::{AckResponse, HeartbeatRequest, RegisterNodeRequest, CHECKSUM_HEADER};

/// Byte transport between the gateway and chunk stores.
#[async_trait]
pub trait ChunkClient: Send + Sync {
    async fn store_chunk(&self, node: &NodeAddress, chunk_id: &str, data: Bytes, checksum: &str) -> Result<()>;
    async fn retrieve_chunk(&self, node: &NodeAddress, chunk_id: &str) -> Result<Bytes>;
    async fn delete_chunk(&self, node: &NodeAddress, chunk_id: &str) -> Result<()>;
}

#[derive(Clone)]
pub struct HttpChunkClient {
    http: reqwest::Client,
}

impl HttpChunkClient {
    pub fn new(timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Internal(format!("cannot build http client: {}", e)))?;
        Ok(Self { http })
    }
}

fn chunk_url(node: &NodeAddress, chunk_id: &str) -> String {
    format!("{}/chunks/{}", node.base_url(), chunk_id)
}

// 节点返回 AckResponse，网关返回 ErrorResponse，两者都带 message 字段
async fn rejection_message(resp: reqwest::Response) -> String {
    let status = resp.status();
    resp.json::<serde_json::Value>()
        .await
        .ok()
        .and_then(|body| body.get("message").and_then(|m| m.as_str()).map(str::to_string))
        .unwrap_or_else(|| format!("status {}", status))
}

#[async_trait]
impl ChunkClient for HttpChunkClient {
    async fn store_chunk(&self, node: &NodeAddress, chunk_id: &str, data: Bytes, checksum: &str) -> Result<()> {
        let resp = self
            .http
            .put(chunk_url(node, chunk_id))
            .header(CHECKSUM_HEADER, checksum)
            .body(data)
            .send()
            .await?;
        if resp.status().is_success() {
            return Ok(());
        }
        Err(StorageError::Unavailable(format!(
            "node {} rejected chunk {}: {}",
            node.node_id,
            chunk_id,
            rejection_message(resp).await
        )))
    }

    async fn retrieve_chunk(&self, node: &NodeAddress, chunk_id: &str) -> Result<Bytes> {
        let resp = self.http.get(chunk_url(node, chunk_id)).send().await?;
        match resp.status() {
            s if s.is_success() => Ok(resp.bytes().await?),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(format!(
                "chunk {} not on node {}",
                chunk_id, node.node_id
            ))),
            _ => Err(StorageError::Unavailable(format!(
                "node {} failed to serve chunk {}: {}",
                node.node_id,
                chunk_id,
                rejection_message(resp).await
            ))),
        }
    }

    async fn delete_chunk(&self, node: &NodeAddress, chunk_id: &str) -> Result<()> {
        let resp = self.http.delete(chunk_url(node, chunk_id)).send().await?;
        if resp.status().is_success() {
            return Ok(());
        }
        Err(StorageError::Unavailable(format!(
            "node {} failed to delete chunk {}: {}",
            node.node_id,
            chunk_id,
            rejection_message(resp).await
        )))
    }
}

/// Node-side client for the gateway's registry endpoints.
#[derive(Clone)]
pub struct GatewayClient {
    http: reqwest::Client,
    base_url: String,
}

impl GatewayClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StorageError::Internal(format!("cannot build http client: {}", e)))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub async fn register(&self, req: &RegisterNodeRequest) -> Result<AckResponse> {
        let resp = self
            .http
            .post(format!("{}/nodes/register", self.base_url))
            .json(req)
            .send()
            .await?;
        if !resp.status().is_success() {
            return Err(StorageError::Unavailable(format!(
                "gateway refused registration: {}",
                rejection_message(resp).await
            )));
        }
        Ok(resp.json().await?)
    }

    /// `NotFound` means the gateway forgot this node and it must register again.
    pub async fn heartbeat(&self, req: &HeartbeatRequest) -> Result<AckResponse> {
        let resp = self
            .http
            .post(format!("{}/nodes/heartbeat", self.base_url))
            .json(req)
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(resp.json().await?),
            StatusCode::NOT_FOUND => Err(StorageError::NotFound(format!("node {} unknown to gateway", req.node_id))),
            _ => Err(StorageError::Unavailable(format!(
                "gateway rejected heartbeat: {}",
                rejection_message(resp).await
            ))),
        }
    }
}
