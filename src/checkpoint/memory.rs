use super::store::{check_monotonic, Checkpoint, CheckpointFuture, CheckpointStore, SaveDecision};
use anyhow::Result;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// Process-local checkpoint store with the same monotonic rule as the file store.
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    entries: Mutex<HashMap<String, Checkpoint>>,
    writes: AtomicUsize,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_checkpoint(shard_id: &str, sequence: u64) -> Self {
        let store = Self::default();
        store
            .entries
            .lock()
            .expect("checkpoint map poisoned")
            .insert(shard_id.to_owned(), Checkpoint::new(shard_id, sequence));
        store
    }

    pub fn get(&self, shard_id: &str) -> Option<Checkpoint> {
        self.entries
            .lock()
            .expect("checkpoint map poisoned")
            .get(shard_id)
            .cloned()
    }

    fn store(&self, checkpoint: &Checkpoint) -> Result<()> {
        let mut entries = self.entries.lock().expect("checkpoint map poisoned");
        if check_monotonic(entries.get(&checkpoint.shard_id), checkpoint)? == SaveDecision::Write {
            entries.insert(checkpoint.shard_id.clone(), checkpoint.clone());
            self.writes.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Number of saves that actually changed the stored position.
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl CheckpointStore for MemoryCheckpointStore {
    fn load<'a>(&'a self, shard_id: &'a str) -> CheckpointFuture<'a, Option<Checkpoint>> {
        Box::pin(async move { Ok(self.get(shard_id)) })
    }

    fn save<'a>(&'a self, checkpoint: &'a Checkpoint) -> CheckpointFuture<'a, ()> {
        Box::pin(async move { self.store(checkpoint) })
    }
}
