//! Stream record model and read positions.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// One "document available" event read from a shard.
///
/// Sequence numbers are dense within a shard: every record carries the previous
/// record's sequence plus one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRecord {
    pub sequence: u64,
    pub partition_key: String,
    pub data: Bytes,
    pub arrival_ms: u64,
}

/// Where to start reading when a shard has no checkpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InitialPosition {
    #[default]
    TrimHorizon,
    Latest,
}

impl FromStr for InitialPosition {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "trim_horizon" => Ok(InitialPosition::TrimHorizon),
            "latest" => Ok(InitialPosition::Latest),
            other => Err(format!(
                "unknown initial position {other:?} (expected trim_horizon or latest)"
            )),
        }
    }
}

impl From<InitialPosition> for ReadPosition {
    fn from(position: InitialPosition) -> Self {
        match position {
            InitialPosition::TrimHorizon => ReadPosition::TrimHorizon,
            InitialPosition::Latest => ReadPosition::Latest,
        }
    }
}

/// Cursor sent to the gateway on every read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReadPosition {
    TrimHorizon,
    Latest,
    After { sequence: u64 },
}

impl ReadPosition {
    pub fn after(sequence: u64) -> Self {
        ReadPosition::After { sequence }
    }

    /// Sequence the reader has already consumed, if it is resuming.
    pub fn resumed_from(&self) -> Option<u64> {
        match self {
            ReadPosition::After { sequence } => Some(*sequence),
            _ => None,
        }
    }

    /// Position to use for the next read after `batch` was accepted.
    pub fn advance(&self, batch: &RecordBatch) -> ReadPosition {
        if let Some(last) = batch.records.last() {
            return ReadPosition::after(last.sequence);
        }

        // A never-written shard has no tip to pin; anything appended later must
        // still be read from its first record.
        match (self, batch.latest) {
            (ReadPosition::Latest, Some(latest)) => ReadPosition::after(latest),
            (ReadPosition::Latest, None) => ReadPosition::TrimHorizon,
            _ => *self,
        }
    }
}

impl fmt::Display for ReadPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadPosition::TrimHorizon => f.write_str("trim_horizon"),
            ReadPosition::Latest => f.write_str("latest"),
            ReadPosition::After { sequence } => write!(f, "after:{sequence}"),
        }
    }
}

/// Records returned by one read plus the shard bounds reported alongside them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordBatch {
    pub records: Vec<StreamRecord>,
    /// Oldest sequence still retained by the shard.
    pub trim_horizon: Option<u64>,
    /// Highest sequence ever assigned in the shard.
    pub latest: Option<u64>,
}

impl RecordBatch {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
