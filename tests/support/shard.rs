use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use futures::future::BoxFuture;
use pdfstream::{ReadPosition, RecordBatch, StreamClient, StreamError, StreamRecord};

/// In-process shard answering `getrecords` the way the gateway does.
#[derive(Clone, Default)]
pub struct MockShard {
    inner: Arc<Mutex<ShardInner>>,
    reads: Arc<AtomicUsize>,
}

#[derive(Default)]
struct ShardInner {
    records: Vec<StreamRecord>,
    /// Oldest retained sequence when records below it were trimmed away.
    trimmed_to: Option<u64>,
    failures_remaining: usize,
    answer: Option<StreamError>,
}

impl MockShard {
    pub fn new(records: Vec<StreamRecord>) -> Self {
        let shard = Self::default();
        shard.append(records);
        shard
    }

    pub fn append(&self, records: Vec<StreamRecord>) {
        let mut inner = self.inner.lock().expect("mock shard poisoned");
        inner.records.extend(records);
        inner.records.sort_by_key(|record| record.sequence);
    }

    /// Drops every record below `sequence`, as retention would.
    pub fn trim_before(&self, sequence: u64) {
        let mut inner = self.inner.lock().expect("mock shard poisoned");
        inner.records.retain(|record| record.sequence >= sequence);
        inner.trimmed_to = Some(sequence);
    }

    /// The next `count` reads fail with a transport error.
    pub fn fail_next_reads(&self, count: usize) {
        self.inner.lock().expect("mock shard poisoned").failures_remaining = count;
    }

    /// Every read from now on answers with `error`.
    pub fn answer_with(&self, error: StreamError) {
        self.inner.lock().expect("mock shard poisoned").answer = Some(error);
    }

    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }

    pub fn read(&self, position: ReadPosition, limit: usize) -> Result<RecordBatch, StreamError> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock().expect("mock shard poisoned");

        if inner.failures_remaining > 0 {
            inner.failures_remaining -= 1;
            return Err(StreamError::Transport("connection reset by peer".into()));
        }
        if let Some(error) = inner.answer.clone() {
            return Err(error);
        }

        let latest = inner
            .records
            .last()
            .map(|record| record.sequence)
            .or(inner.trimmed_to.map(|sequence| sequence.saturating_sub(1)));
        let trim_horizon = inner
            .records
            .first()
            .map(|record| record.sequence)
            .or(inner.trimmed_to);

        let records = match position {
            ReadPosition::TrimHorizon => inner.records.iter().take(limit).cloned().collect(),
            ReadPosition::Latest => Vec::new(),
            ReadPosition::After { sequence } => inner
                .records
                .iter()
                .filter(|record| record.sequence > sequence)
                .take(limit)
                .cloned()
                .collect(),
        };

        Ok(RecordBatch {
            records,
            trim_horizon,
            latest,
        })
    }
}

impl StreamClient for MockShard {
    fn get_records<'a>(
        &'a self,
        position: ReadPosition,
        limit: usize,
    ) -> BoxFuture<'a, Result<RecordBatch, StreamError>> {
        Box::pin(async move { self.read(position, limit) })
    }
}
