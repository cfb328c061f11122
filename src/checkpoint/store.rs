use anyhow::Result;
use futures::future::BoxFuture;
use std::time::{SystemTime, UNIX_EPOCH};

pub type CheckpointFuture<'a, T> = BoxFuture<'a, Result<T>>;

/// All records of `shard_id` at or before `sequence` reached a terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkpoint {
    pub shard_id: String,
    pub sequence: u64,
    pub written_at_ms: u64,
}

impl Checkpoint {
    pub fn new(shard_id: impl Into<String>, sequence: u64) -> Self {
        Self {
            shard_id: shard_id.into(),
            sequence,
            written_at_ms: unix_millis(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CheckpointError {
    #[error("refusing to move checkpoint for shard {shard_id} back from {stored} to {attempted}")]
    Regression {
        shard_id: String,
        stored: u64,
        attempted: u64,
    },
}

/// Storage for checkpoints. Saves must be atomic and must never move a shard backwards;
/// saving the stored position again is a no-op.
pub trait CheckpointStore: Send + Sync {
    fn load<'a>(&'a self, shard_id: &'a str) -> CheckpointFuture<'a, Option<Checkpoint>>;

    fn save<'a>(&'a self, checkpoint: &'a Checkpoint) -> CheckpointFuture<'a, ()>;
}

/// Outcome of comparing a new checkpoint with the stored one.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SaveDecision {
    Write,
    Unchanged,
}

pub(crate) fn check_monotonic(
    stored: Option<&Checkpoint>,
    next: &Checkpoint,
) -> Result<SaveDecision, CheckpointError> {
    match stored {
        Some(stored) if next.sequence < stored.sequence => Err(CheckpointError::Regression {
            shard_id: next.shard_id.clone(),
            stored: stored.sequence,
            attempted: next.sequence,
        }),
        Some(stored) if next.sequence == stored.sequence => Ok(SaveDecision::Unchanged),
        _ => Ok(SaveDecision::Write),
    }
}

pub(crate) fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}
