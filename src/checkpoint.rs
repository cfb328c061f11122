//! Durable per-shard checkpoints: the store trait, the file-backed store used on the
//! checkpoint volume, and an in-memory store for embedding.

pub mod file;
pub mod memory;
pub mod store;

pub use file::FileCheckpointStore;
pub use memory::MemoryCheckpointStore;
pub use store::{Checkpoint, CheckpointError, CheckpointFuture, CheckpointStore};
