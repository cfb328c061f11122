use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, Copy)]
struct Slot {
    sequence: u64,
    terminal: bool,
}

/// Dispatched sequences in submission order. Completions mark their slot terminal and
/// the contiguous terminal prefix is popped, so each sequence is pushed and popped once.
#[derive(Debug, Default)]
pub(crate) struct Frontier {
    slots: VecDeque<Slot>,
    /// Sequence to absolute slot number; the front slot's number is `popped`.
    positions: HashMap<u64, u64>,
    popped: u64,
    last_registered: Option<u64>,
    contiguous: Option<u64>,
}

impl Frontier {
    pub(crate) fn new(resume_after: Option<u64>) -> Self {
        Self {
            last_registered: resume_after,
            contiguous: resume_after,
            ..Self::default()
        }
    }

    /// Returns false for sequences that are not beyond everything registered so far.
    pub(crate) fn register(&mut self, sequence: u64) -> bool {
        if self.last_registered.is_some_and(|last| sequence <= last) {
            return false;
        }

        let absolute = self.popped + self.slots.len() as u64;
        self.slots.push_back(Slot {
            sequence,
            terminal: false,
        });
        self.positions.insert(sequence, absolute);
        self.last_registered = Some(sequence);
        true
    }

    /// Marks `sequence` terminal. Returns the new contiguous position when it moved.
    pub(crate) fn complete(&mut self, sequence: u64) -> Option<u64> {
        let absolute = *self.positions.get(&sequence)?;
        let index = (absolute - self.popped) as usize;
        self.slots[index].terminal = true;

        let before = self.contiguous;
        while self.slots.front().is_some_and(|slot| slot.terminal) {
            if let Some(slot) = self.slots.pop_front() {
                self.positions.remove(&slot.sequence);
                self.popped += 1;
                self.contiguous = Some(slot.sequence);
            }
        }

        (self.contiguous != before).then_some(self.contiguous).flatten()
    }

    pub(crate) fn is_pending(&self, sequence: u64) -> bool {
        self.positions.contains_key(&sequence)
    }

    /// Highest sequence such that it and everything before it are terminal.
    pub(crate) fn contiguous(&self) -> Option<u64> {
        self.contiguous
    }

    pub(crate) fn pending(&self) -> usize {
        self.slots.len()
    }
}
