use std::fmt::Display;

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::error::{Result, StorageError};

pub const DEFAULT_CHUNK_COUNT: usize = 4;

/// Sizes of each chunk for a file of `total` bytes split `count` ways.
/// The remainder goes to the last chunk; a file shorter than `count`
/// bytes becomes a single chunk.
pub fn chunk_plan(total: u64, count: usize) -> Vec<u64> {
    let count = count.max(1) as u64;
    let base = total / count;
    if base == 0 {
        return vec![total];
    }
    let mut sizes = vec![base; count as usize];
    if let Some(last) = sizes.last_mut() {
        *last += total % count;
    }
    sizes
}

pub fn chunk_id(file_id: &Uuid, index: usize) -> String {
    format!("{}_chunk_{}", file_id, index)
}

pub fn checksum(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

/// Chunk ids become file names on the node, so keep them to a single path segment.
pub fn is_valid_chunk_id(chunk_id: &str) -> bool {
    !chunk_id.is_empty()
        && chunk_id.len() <= 255
        && !chunk_id.contains("..")
        && chunk_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
}

/// Pulls exact-sized pieces off a byte stream without buffering more than one piece.
pub struct ChunkReader<S> {
    stream: S,
    pending: Bytes,
    consumed: u64,
}

impl<S, E> ChunkReader<S>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Unpin,
    E: Display,
{
    pub fn new(stream: S) -> Self {
        Self { stream, pending: Bytes::new(), consumed: 0 }
    }

    pub fn consumed(&self) -> u64 {
        self.consumed
    }

    pub async fn read_exact(&mut self, len: usize) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(len);
        while buf.len() < len {
            if self.pending.is_empty() {
                match self.stream.next().await {
                    Some(Ok(frame)) => self.pending = frame,
                    Some(Err(e)) => {
                        return Err(StorageError::InvalidArgument(format!("upload stream failed: {}", e)));
                    }
                    None => {
                        return Err(StorageError::InvalidArgument(format!(
                            "upload stream ended after {} bytes",
                            self.consumed + buf.len() as u64
                        )));
                    }
                }
                continue;
            }
            let take = (len - buf.len()).min(self.pending.len());
            buf.extend_from_slice(&self.pending.split_to(take));
        }
        self.consumed += len as u64;
        Ok(buf.freeze())
    }

    /// Fails if the stream still carries bytes past what was read.
    pub async fn finish(mut self) -> Result<()> {
        if !self.pending.is_empty() {
            return Err(self.overrun());
        }
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(frame) if frame.is_empty() => continue,
                Ok(_) => return Err(self.overrun()),
                Err(e) => return Err(StorageError::InvalidArgument(format!("upload stream failed: {}", e))),
            }
        }
        Ok(())
    }

    fn overrun(&self) -> StorageError {
        StorageError::InvalidArgument(format!("upload stream carries more than the declared {} bytes", self.consumed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn frames(parts: &[&'static [u8]]) -> impl Stream<Item = std::result::Result<Bytes, std::io::Error>> + Unpin {
        let items: Vec<std::result::Result<Bytes, std::io::Error>> =
            parts.iter().map(|p| Ok(Bytes::from_static(*p))).collect();
        stream::iter(items)
    }

    #[test]
    fn twelve_megabytes_split_evenly() {
        let mb = 1024 * 1024;
        assert_eq!(chunk_plan(12 * mb, 4), vec![3 * mb; 4]);
    }

    #[test]
    fn remainder_lands_in_last_chunk() {
        assert_eq!(chunk_plan(10, 4), vec![2, 2, 2, 4]);
        assert_eq!(chunk_plan(3, 4), vec![3]);
        assert_eq!(chunk_plan(0, 4), vec![0]);
    }

    #[test]
    fn sha256_hex() {
        assert_eq!(checksum(b"abc"), "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad");
    }

    #[test]
    fn chunk_ids_stay_inside_one_directory() {
        let id = chunk_id(&Uuid::nil(), 3);
        assert_eq!(id, "00000000-0000-0000-0000-000000000000_chunk_3");
        assert!(is_valid_chunk_id(&id));
        assert!(!is_valid_chunk_id("../etc/passwd"));
        assert!(!is_valid_chunk_id("a/b"));
        assert!(!is_valid_chunk_id(""));
    }

    #[tokio::test]
    async fn reads_across_uneven_frames() {
        let mut reader = ChunkReader::new(frames(&[b"he", b"llo wo", b"rld"]));
        assert_eq!(reader.read_exact(4).await.unwrap(), Bytes::from_static(b"hell"));
        assert_eq!(reader.read_exact(7).await.unwrap(), Bytes::from_static(b"o world"));
        assert_eq!(reader.consumed(), 11);
        reader.finish().await.unwrap();
    }

    #[tokio::test]
    async fn short_stream_is_rejected() {
        let mut reader = ChunkReader::new(frames(&[b"abc"]));
        let err = reader.read_exact(5).await.unwrap_err();
        assert!(matches!(err, StorageError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn trailing_bytes_are_rejected() {
        let mut reader = ChunkReader::new(frames(&[b"abc", b"", b"d"]));
        reader.read_exact(3).await.unwrap();
        assert!(matches!(reader.finish().await, Err(StorageError::InvalidArgument(_))));
    }
}
