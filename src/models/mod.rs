pub mod node;
pub mod file;
pub mod file_chunk;
pub mod folder;
pub mod user;
pub mod share;

pub use file::{FileRecord, NewFile};
pub use file_chunk::{ChunkLocation, ChunkRecord, NewChunk};
pub use folder::{Folder, FolderEntry, FolderListing};
pub use node::{GlobalStats, NodeAddress, NodeState, NodeStatus, StorageNode};
pub use share::{FileShare, SharePermission};
pub use user::{StorageInfo, UserQuota};
