use std::path::{Path, PathBuf};

use bytes::Bytes;
use log::info;
use tokio::fs;
use uuid::Uuid;

use crate::error::{Result, StorageError};
use crate::utils::chunking::{checksum, is_valid_chunk_id};

const CHUNK_EXT: &str = "bin";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreUsage {
    pub bytes: i64,
    pub chunks: i64,
}

/// Chunks kept as flat files under one directory, `<root>/<chunk_id>.bin`.
pub struct ChunkStore {
    root: PathBuf,
}

impl ChunkStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        info!("Chunk store ready at {}", root.display());
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn chunk_path(&self, chunk_id: &str) -> Result<PathBuf> {
        if !is_valid_chunk_id(chunk_id) {
            return Err(StorageError::InvalidArgument(format!("invalid chunk id: {}", chunk_id)));
        }
        Ok(self.root.join(format!("{}.{}", chunk_id, CHUNK_EXT)))
    }

    /// Overwrites any previous copy. A non-empty `expected` checksum must match the bytes.
    pub async fn store(&self, chunk_id: &str, data: &[u8], expected: &str) -> Result<()> {
        let path = self.chunk_path(chunk_id)?;
        if !expected.is_empty() {
            let actual = checksum(data);
            if actual != expected {
                return Err(StorageError::InvalidArgument(format!(
                    "checksum mismatch for {}: expected {}, got {}",
                    chunk_id, expected, actual
                )));
            }
        }
        let tmp = self.root.join(format!(".{}.{}.tmp", chunk_id, Uuid::new_v4()));
        fs::write(&tmp, data).await?;
        if let Err(e) = fs::rename(&tmp, &path).await {
            let _ = fs::remove_file(&tmp).await;
            return Err(e.into());
        }
        Ok(())
    }

    pub async fn retrieve(&self, chunk_id: &str) -> Result<Bytes> {
        let path = self.chunk_path(chunk_id)?;
        match fs::read(&path).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(format!("chunk {}", chunk_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns whether a chunk was actually removed; a missing chunk is not an error.
    pub async fn delete(&self, chunk_id: &str) -> Result<bool> {
        let path = self.chunk_path(chunk_id)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn usage(&self) -> Result<StoreUsage> {
        let mut usage = StoreUsage::default();
        let mut entries = fs::read_dir(&self.root).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHUNK_EXT) {
                continue;
            }
            let meta = entry.metadata().await?;
            if meta.is_file() {
                usage.bytes += meta.len() as i64;
                usage.chunks += 1;
            }
        }
        Ok(usage)
    }
}
