use std::env;
use std::fmt::Display;
use std::net::SocketAddr;
use std::str::FromStr;

use anyhow::{anyhow, Context, Result};
use dotenv::dotenv;

use crate::registry::DEFAULT_LIVENESS_WINDOW_SECS;
use crate::utils::chunking::DEFAULT_CHUNK_COUNT;

#[derive(Debug, Clone)]
pub struct Config {
    /// Without a database the gateway keeps metadata in memory.
    pub database_url: Option<String>,
    pub jwt_secret: String,
    pub gateway_addr: SocketAddr,
    pub prometheus_port: u16,
    pub chunk_count: usize,
    pub replication_factor: usize,
    pub node_liveness_secs: i64,
    pub node_request_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.trim().is_empty());
        let jwt_secret = env::var("JWT_SECRET").context("JWT_SECRET not set")?;
        let config = Self {
            database_url,
            jwt_secret,
            gateway_addr: env_or("GATEWAY_ADDR", SocketAddr::from(([0, 0, 0, 0], 8080)))?,
            prometheus_port: env_or("PROMETHEUS_PORT", 9898)?,
            chunk_count: env_or("CHUNK_COUNT", DEFAULT_CHUNK_COUNT)?,
            replication_factor: env_or("REPLICATION_FACTOR", 1)?,
            node_liveness_secs: env_or("NODE_LIVENESS_SECS", DEFAULT_LIVENESS_WINDOW_SECS)?,
            node_request_timeout_secs: env_or("NODE_REQUEST_TIMEOUT_SECS", 30)?,
        };
        if config.chunk_count == 0 {
            return Err(anyhow!("CHUNK_COUNT must be at least 1"));
        }
        if config.replication_factor == 0 {
            return Err(anyhow!("REPLICATION_FACTOR must be at least 1"));
        }
        Ok(config)
    }
}

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub gateway_url: String,
    pub heartbeat_interval_secs: u64,
    pub request_timeout_secs: u64,
}

impl NodeConfig {
    pub fn from_env() -> Result<Self> {
        dotenv().ok();
        Ok(Self {
            gateway_url: env::var("GATEWAY_URL").unwrap_or_else(|_| "http://127.0.0.1:8080".to_string()),
            heartbeat_interval_secs: env_or("HEARTBEAT_INTERVAL_SECS", 30)?,
            request_timeout_secs: env_or("NODE_REQUEST_TIMEOUT_SECS", 30)?,
        })
    }
}

fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    match env::var(key) {
        Ok(raw) => raw.trim().parse().map_err(|e| anyhow!("invalid {}={:?}: {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}
