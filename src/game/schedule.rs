//! Delayed actions keyed by tick
//!
//! Min-heap of `(fire_at_tick, payload)`. Entries scheduled for the same
//! tick fire in insertion order.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::game::entity::EntityId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduledAction {
    DetonateBarrel {
        barrel: EntityId,
        source: Option<EntityId>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Entry {
    fire_at: u64,
    seq: u64,
    action: ScheduledAction,
}

// Reversed so BinaryHeap pops the earliest entry first
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .fire_at
            .cmp(&self.fire_at)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Default)]
pub struct Schedule {
    heap: BinaryHeap<Entry>,
    next_seq: u64,
}

impl Schedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule(&mut self, fire_at: u64, action: ScheduledAction) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(Entry { fire_at, seq, action });
    }

    /// Remove and return every action due at or before `tick`
    pub fn pop_due(&mut self, tick: u64) -> Vec<ScheduledAction> {
        let mut due = Vec::new();
        while self.heap.peek().is_some_and(|e| e.fire_at <= tick) {
            if let Some(entry) = self.heap.pop() {
                due.push(entry.action);
            }
        }
        due
    }

    pub fn next_due(&self) -> Option<u64> {
        self.heap.peek().map(|e| e.fire_at)
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn clear(&mut self) {
        self.heap.clear();
    }
}
