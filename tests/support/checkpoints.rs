use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use anyhow::anyhow;
use pdfstream::checkpoint::CheckpointFuture;
use pdfstream::{Checkpoint, CheckpointStore, MemoryCheckpointStore};

/// Memory store whose next loads or saves can be made to fail, like a flapping volume.
#[derive(Clone, Default)]
pub struct FlakyCheckpointStore {
    inner: Arc<MemoryCheckpointStore>,
    failures_remaining: Arc<AtomicUsize>,
    failed_saves: Arc<AtomicUsize>,
    load_failures_remaining: Arc<AtomicUsize>,
    failed_loads: Arc<AtomicUsize>,
}

impl FlakyCheckpointStore {
    pub fn new(inner: MemoryCheckpointStore) -> Self {
        Self {
            inner: Arc::new(inner),
            ..Self::default()
        }
    }

    pub fn fail_next_saves(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_loads(&self, count: usize) {
        self.load_failures_remaining.store(count, Ordering::SeqCst);
    }

    pub fn failed_loads(&self) -> usize {
        self.failed_loads.load(Ordering::SeqCst)
    }

    pub fn failed_saves(&self) -> usize {
        self.failed_saves.load(Ordering::SeqCst)
    }

    pub fn stored(&self, shard_id: &str) -> Option<u64> {
        self.inner.get(shard_id).map(|checkpoint| checkpoint.sequence)
    }

    pub fn writes(&self) -> usize {
        self.inner.writes()
    }

    fn take_failure(&self) -> bool {
        take_one(&self.failures_remaining)
    }
}

fn take_one(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
        .is_ok()
}

impl CheckpointStore for FlakyCheckpointStore {
    fn load<'a>(&'a self, shard_id: &'a str) -> CheckpointFuture<'a, Option<Checkpoint>> {
        if take_one(&self.load_failures_remaining) {
            self.failed_loads.fetch_add(1, Ordering::SeqCst);
            return Box::pin(async { Err(anyhow!("checkpoint volume unavailable")) });
        }
        self.inner.load(shard_id)
    }

    fn save<'a>(&'a self, checkpoint: &'a Checkpoint) -> CheckpointFuture<'a, ()> {
        if self.take_failure() {
            self.failed_saves.fetch_add(1, Ordering::SeqCst);
            return Box::pin(async { Err(anyhow!("checkpoint volume unavailable")) });
        }
        self.inner.save(checkpoint)
    }
}
