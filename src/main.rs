use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use log::{info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;
use uuid::Uuid;

use distributed_chunk_storage::config::Config;
use distributed_chunk_storage::db::{self, MemoryMetadataStore, MetadataStore, PgMetadataStore};
use distributed_chunk_storage::node::HttpChunkClient;
use distributed_chunk_storage::registry::NodeRegistry;
use distributed_chunk_storage::routers::{self, AppState};
use distributed_chunk_storage::services::{FileManager, FileService, UploadSettings};
use distributed_chunk_storage::utils::jwt::generate_jwt;

#[derive(Parser)]
#[command(name = "dfs-gateway")]
#[command(about = "Gateway for the distributed chunk storage cluster", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP gateway (default)
    Serve,
    /// Set a user's storage allocation
    GrantQuota {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long)]
        bytes: i64,
    },
    /// Print a bearer token for a user
    IssueToken {
        #[arg(long)]
        user_id: Uuid,
        #[arg(long, default_value = "user")]
        role: String,
        #[arg(long, default_value = "24")]
        hours: i64,
    },
}

async fn open_store(cfg: &Config) -> Result<Arc<dyn MetadataStore>> {
    match &cfg.database_url {
        Some(url) => {
            let pool = db::init_db(url).await.context("Failed to connect to database")?;
            info!("Database OK.");
            Ok(Arc::new(PgMetadataStore::new(pool)))
        }
        None => {
            warn!("DATABASE_URL not set, metadata is kept in memory and lost on exit");
            Ok(Arc::new(MemoryMetadataStore::new()))
        }
    }
}

async fn serve(cfg: Config) -> Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], cfg.prometheus_port))
        .install()
        .context("Failed to install Prometheus exporter")?;
    info!("Metrics on :{}", cfg.prometheus_port);

    let store = open_store(&cfg).await?;
    let registry = Arc::new(NodeRegistry::new(
        store.clone(),
        chrono::Duration::seconds(cfg.node_liveness_secs),
    ));
    let loaded = registry.load().await.context("Failed to load storage nodes")?;
    info!("Loaded {} storage nodes", loaded);

    let client = HttpChunkClient::new(Duration::from_secs(cfg.node_request_timeout_secs))
        .context("Failed to build node client")?;
    let service = FileService::new(
        store,
        registry,
        Arc::new(client),
        UploadSettings {
            chunk_count: cfg.chunk_count,
            replication_factor: cfg.replication_factor,
        },
    );
    let state = AppState::new(Arc::new(service), cfg.jwt_secret.clone());

    info!(
        "Gateway listening on http://{} ({} chunks per file, replication {})",
        cfg.gateway_addr, cfg.chunk_count, cfg.replication_factor
    );
    warp::serve(routers::api(state)).run(cfg.gateway_addr).await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let cfg = Config::from_env()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(cfg).await,
        Commands::GrantQuota { user_id, bytes } => {
            if cfg.database_url.is_none() {
                bail!("grant-quota needs DATABASE_URL; against the in-memory store use PUT /users/{{id}}/quota with an admin token");
            }
            let store = open_store(&cfg).await?;
            let quota = FileManager::new(store).set_allocation(user_id, bytes).await?;
            println!(
                "User {}: allocated {} bytes, {} used",
                quota.user_id, quota.storage_allocated, quota.storage_used
            );
            Ok(())
        }
        Commands::IssueToken { user_id, role, hours } => {
            let token = generate_jwt(user_id, &role, &cfg.jwt_secret, chrono::Duration::hours(hours))
                .context("Failed to generate JWT")?;
            println!("{}", token);
            Ok(())
        }
    }
}
