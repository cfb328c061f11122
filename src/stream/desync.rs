//! Detection of positions the reader can no longer resume from safely.
//!
//! Skipping records silently would break at-least-once delivery, so every condition
//! below halts consumption instead of resetting the cursor.

use crate::stream::client::StreamError;
use crate::stream::record::{ReadPosition, RecordBatch};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamDesyncError {
    #[error("checkpoint {checkpoint} fell out of the stream retention window (oldest retained: {oldest:?})")]
    PositionExpired { checkpoint: u64, oldest: Option<u64> },
    #[error("gap after sequence {after}: expected {expected}, stream returned {found}")]
    Gap { after: u64, expected: u64, found: u64 },
    #[error("out-of-order record after sequence {after}: stream returned {found}")]
    OutOfOrder { after: u64, found: u64 },
    #[error("checkpoint {checkpoint} is ahead of the stream (latest sequence: {latest:?})")]
    CheckpointAhead { checkpoint: u64, latest: Option<u64> },
    #[error("shard {shard} no longer exists")]
    ShardMissing { shard: String },
}

/// Maps gateway errors that mean the cursor is unusable. Other errors are transient.
pub fn desync_from_error(
    error: &StreamError,
    position: &ReadPosition,
    shard: &str,
) -> Option<StreamDesyncError> {
    match error {
        StreamError::ExpiredPosition { .. } => Some(StreamDesyncError::PositionExpired {
            checkpoint: position.resumed_from().unwrap_or_default(),
            oldest: None,
        }),
        StreamError::ShardNotFound { .. } => Some(StreamDesyncError::ShardMissing {
            shard: shard.to_owned(),
        }),
        _ => None,
    }
}

/// Checks a batch read from `position` against the shard bounds and dense sequencing.
pub fn validate_batch(position: &ReadPosition, batch: &RecordBatch) -> Result<(), StreamDesyncError> {
    let mut previous = None;

    if let Some(checkpoint) = position.resumed_from() {
        match batch.latest {
            Some(latest) if latest >= checkpoint => {}
            latest => return Err(StreamDesyncError::CheckpointAhead { checkpoint, latest }),
        }

        let oldest = batch
            .trim_horizon
            .or_else(|| batch.latest.map(|latest| latest.saturating_add(1)));
        if let Some(oldest) = oldest {
            if oldest > checkpoint.saturating_add(1) {
                return Err(StreamDesyncError::PositionExpired {
                    checkpoint,
                    oldest: Some(oldest),
                });
            }
        }

        previous = Some(checkpoint);
    }

    for record in &batch.records {
        if let Some(after) = previous {
            let expected = after.saturating_add(1);
            if record.sequence <= after {
                return Err(StreamDesyncError::OutOfOrder {
                    after,
                    found: record.sequence,
                });
            }
            if record.sequence != expected {
                return Err(StreamDesyncError::Gap {
                    after,
                    expected,
                    found: record.sequence,
                });
            }
        }
        previous = Some(record.sequence);
    }

    Ok(())
}
