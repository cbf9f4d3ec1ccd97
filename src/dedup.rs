//! Bounded cache of recently-spoken segment text.
//!
//! Streaming segmentation re-reads a growing buffer, so the same chunk
//! can surface more than once per turn. The guard drops re-emissions
//! while they are still inside a bounded FIFO window.

use std::collections::HashSet;
use std::collections::VecDeque;

/// FIFO-bounded set of raw segment strings.
///
/// Eviction is strict FIFO, not LRU: re-accepting a string later does not
/// refresh its position, and once evicted the same text is treated as a
/// brand new event.
#[derive(Debug)]
pub struct DedupGuard {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupGuard {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            seen: HashSet::with_capacity(capacity),
            order: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Returns `true` if `text` was not in the window (and records it),
    /// `false` if the chunk should be dropped as a duplicate.
    pub fn accept(&mut self, text: &str) -> bool {
        if self.seen.contains(text) {
            return false;
        }
        if self.order.len() == self.capacity
            && let Some(oldest) = self.order.pop_front()
        {
            self.seen.remove(&oldest);
        }
        self.seen.insert(text.to_owned());
        self.order.push_back(text.to_owned());
        true
    }

    /// Empty the window. Called at the start of every turn.
    pub fn clear(&mut self) {
        self.seen.clear();
        self.order.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}
