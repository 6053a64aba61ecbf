use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::info;

use distributed_chunk_storage::config::NodeConfig;
use distributed_chunk_storage::node::server::chunk_routes;
use distributed_chunk_storage::node::{ChunkStore, GatewayClient, NodeAgent};
use distributed_chunk_storage::protocol::RegisterNodeRequest;

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

/// Storage node: serves chunks over HTTP and heartbeats to the gateway.
#[derive(Parser, Debug)]
#[command(name = "dfs-node")]
struct Args {
    node_id: String,
    /// Address the gateway uses to reach this node
    host: String,
    port: u16,
    storage_gb: f64,
    /// Defaults to storage/<node_id>
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long, default_value = "1")]
    cores: i32,
    /// Overrides GATEWAY_URL
    #[arg(long)]
    gateway: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = NodeConfig::from_env()?;

    if !(args.storage_gb > 0.0) {
        return Err(anyhow!("storage_gb must be positive"));
    }
    let data_dir = args
        .data_dir
        .clone()
        .unwrap_or_else(|| PathBuf::from("storage").join(&args.node_id));
    let store = Arc::new(ChunkStore::open(&data_dir).await.context("Failed to open chunk store")?);

    let gateway_url = args.gateway.clone().unwrap_or(cfg.gateway_url);
    let gateway = GatewayClient::new(gateway_url.as_str(), Duration::from_secs(cfg.request_timeout_secs))
        .context("Failed to build gateway client")?;
    let registration = RegisterNodeRequest {
        node_id: args.node_id.clone(),
        host: args.host.clone(),
        port: args.port,
        capacity_bytes: (args.storage_gb * GIB) as i64,
        cpu_cores: args.cores,
    };
    let agent = NodeAgent::new(
        gateway,
        store.clone(),
        registration,
        Duration::from_secs(cfg.heartbeat_interval_secs),
    );
    tokio::spawn(agent.run());

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    info!(
        "Node {} serving {} at http://{} (gateway {})",
        args.node_id,
        data_dir.display(),
        addr,
        gateway_url
    );
    warp::serve(chunk_routes(store)).run(addr).await;
    Ok(())
}
