use std::sync::atomic::{AtomicU8, Ordering};

/// Lifecycle of a consumed shard.
///
/// `NoCheckpoint` moves to `Consuming` after the first successful read. A stream
/// desynchronization parks the shard in `OperatorIntervention`; only a restart with a
/// repaired checkpoint leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShardState {
    NoCheckpoint,
    Consuming,
    OperatorIntervention,
}

impl ShardState {
    fn as_u8(self) -> u8 {
        match self {
            ShardState::NoCheckpoint => 0,
            ShardState::Consuming => 1,
            ShardState::OperatorIntervention => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            1 => ShardState::Consuming,
            2 => ShardState::OperatorIntervention,
            _ => ShardState::NoCheckpoint,
        }
    }
}

#[derive(Debug)]
pub struct ShardStatus {
    state: AtomicU8,
}

impl Default for ShardStatus {
    fn default() -> Self {
        Self::new(ShardState::NoCheckpoint)
    }
}

impl ShardStatus {
    pub fn new(initial: ShardState) -> Self {
        Self {
            state: AtomicU8::new(initial.as_u8()),
        }
    }

    pub fn get(&self) -> ShardState {
        ShardState::from_u8(self.state.load(Ordering::SeqCst))
    }

    pub fn reset(&self, state: ShardState) {
        self.state.store(state.as_u8(), Ordering::SeqCst);
    }

    /// Marks the shard as consuming unless an operator must intervene first.
    pub fn mark_consuming(&self) {
        let _ = self.state.compare_exchange(
            ShardState::NoCheckpoint.as_u8(),
            ShardState::Consuming.as_u8(),
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }

    pub fn mark_desynchronized(&self) {
        self.reset(ShardState::OperatorIntervention);
    }
}
