//! Commitment tree access: coordinates, chunk accounts, the storage account
//! and protocol-level lookups on top of them.

pub mod chunk;
pub mod indices;
pub mod manager;
pub mod storage;

pub use chunk::{ChunkReader, TreeChunk};
pub use indices::{AccIndex, GlobalIndex, LocalIndex, TreeGeometry};
pub use manager::{CommitmentInfo, PollConfig, PollState, TreeManager};
pub use storage::{StorageAccount, StorageReader};
