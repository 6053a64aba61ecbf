pub mod config;
pub mod db;
pub mod distribution;
pub mod error;
pub mod models;
pub mod node;
pub mod protocol;
pub mod registry;
pub mod routers;
pub mod services;
pub mod utils;

pub use error::{Result, StorageError};
