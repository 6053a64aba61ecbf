pub mod chunk_store;
pub mod client;
pub mod heartbeat;
pub mod server;

pub use chunk_store::ChunkStore;
pub use client::{ChunkClient, GatewayClient, HttpChunkClient};
pub use heartbeat::NodeAgent;
