//! Gateway and two storage nodes talking over real sockets.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use distributed_chunk_storage::db::{MemoryMetadataStore, MetadataStore};
use distributed_chunk_storage::node::server::chunk_routes;
use distributed_chunk_storage::node::{ChunkStore, GatewayClient, HttpChunkClient, NodeAgent};
use distributed_chunk_storage::protocol::{RegisterNodeRequest, FILE_NAME_HEADER};
use distributed_chunk_storage::registry::NodeRegistry;
use distributed_chunk_storage::routers::{api, AppState};
use distributed_chunk_storage::services::{FileService, UploadSettings};
use distributed_chunk_storage::utils::jwt::generate_jwt;

const SECRET: &str = "cluster-secret";

struct Node {
    _dir: tempfile::TempDir,
    store: Arc<ChunkStore>,
    agent: NodeAgent,
}

async fn start_node(node_id: &str, gateway: SocketAddr) -> Node {
    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(ChunkStore::open(dir.path()).await.unwrap());
    let (addr, server) = warp::serve(chunk_routes(store.clone())).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let client = GatewayClient::new(format!("http://{}", gateway), Duration::from_secs(5)).unwrap();
    let agent = NodeAgent::new(
        client,
        store.clone(),
        RegisterNodeRequest {
            node_id: node_id.to_string(),
            host: "127.0.0.1".to_string(),
            port: addr.port(),
            capacity_bytes: 1 << 30,
            cpu_cores: 1,
        },
        Duration::from_millis(200),
    );
    agent.register_until_accepted().await;
    Node { _dir: dir, store, agent }
}

#[tokio::test]
async fn upload_download_delete_over_http() {
    let metadata = Arc::new(MemoryMetadataStore::new());
    let registry = Arc::new(NodeRegistry::new(metadata.clone(), chrono::Duration::seconds(120)));
    let service = FileService::new(
        metadata.clone(),
        registry.clone(),
        Arc::new(HttpChunkClient::new(Duration::from_secs(5)).unwrap()),
        UploadSettings { chunk_count: 4, replication_factor: 1 },
    );
    let (gateway, server) = warp::serve(api(AppState::new(Arc::new(service), SECRET))).bind_ephemeral(([127, 0, 0, 1], 0));
    tokio::spawn(server);

    let n1 = start_node("n1", gateway).await;
    let n2 = start_node("n2", gateway).await;
    assert_eq!(registry.global_stats().await.online_nodes, 2);

    // a gateway that lost the node gets a fresh registration on the next beat
    registry.remove_node("n2").await.unwrap();
    n2.agent.beat().await.unwrap();
    assert!(registry.get_node("n2").await.is_some());

    let user = Uuid::new_v4();
    metadata.set_allocation(user, 1 << 20).await.unwrap();
    let token = generate_jwt(user, "user", SECRET, chrono::Duration::hours(1)).unwrap();
    let http = reqwest::Client::new();

    let data: Vec<u8> = (0..40_000u32).map(|i| (i * 7 % 256) as u8).collect();
    let resp = http
        .post(format!("http://{}/files?filename=report.pdf&size={}&mime_type=application/pdf", gateway, data.len()))
        .bearer_auth(&token)
        .body(data.clone())
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::CREATED);
    let receipt: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(receipt["chunks_stored"], 4);
    let file_id = receipt["file_id"].as_str().unwrap().to_string();

    let on_disk = n1.store.usage().await.unwrap().chunks + n2.store.usage().await.unwrap().chunks;
    assert_eq!(on_disk, 4);
    n1.agent.beat().await.unwrap();
    let reported = registry.get_node("n1").await.unwrap();
    assert_eq!(reported.chunk_count, n1.store.usage().await.unwrap().chunks);

    let resp = http
        .get(format!("http://{}/files/{}", gateway, file_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(resp.headers()[FILE_NAME_HEADER], "report.pdf");
    assert_eq!(resp.headers()["content-type"], "application/pdf");
    assert_eq!(resp.bytes().await.unwrap().as_ref(), data.as_slice());

    let resp = http
        .delete(format!("http://{}/files/{}?permanent=true", gateway, file_id))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), reqwest::StatusCode::OK);
    assert_eq!(n1.store.usage().await.unwrap().chunks + n2.store.usage().await.unwrap().chunks, 0);

    let storage: serde_json::Value = http
        .get(format!("http://{}/storage", gateway))
        .bearer_auth(&token)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(storage["used"], 0);
}
