//! ==============================================================================
//! history.rs - bounded reading history
//! ==============================================================================
//!
//! purpose:
//!     keeps the last `capacity` readings in arrival order. appending past
//!     capacity evicts the oldest entry. callers only ever get copies, so an
//!     evicted reading can never leak back out.
//!
//! relationships:
//!     - owned by: pipeline.rs (behind the ingestion lock)
//!     - read by: stats.rs (slice view), persistence.rs (full copy)
//!
//! ==============================================================================

use std::collections::VecDeque;

use crate::domain::Reading;

pub const DEFAULT_CAPACITY: usize = 1000;

#[derive(Debug, Clone)]
pub struct HistoryBuffer {
    entries: VecDeque<Reading>,
    capacity: usize,
}

impl HistoryBuffer {
    /// a capacity of zero is bumped to one
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn append(&mut self, reading: Reading) {
        if self.entries.len() == self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(reading);
    }

    /// bulk append, used when reloading a snapshot
    pub fn extend<I: IntoIterator<Item = Reading>>(&mut self, readings: I) {
        for reading in readings {
            self.append(reading);
        }
    }

    /// most recent `min(limit, len)` readings, oldest first
    pub fn snapshot(&self, limit: usize) -> Vec<Reading> {
        let take = limit.min(self.capacity).min(self.entries.len());
        self.entries
            .iter()
            .skip(self.entries.len() - take)
            .cloned()
            .collect()
    }

    pub fn to_vec(&self) -> Vec<Reading> {
        self.entries.iter().cloned().collect()
    }

    pub fn oldest(&self) -> Option<&Reading> {
        self.entries.front()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Reading> + ExactSizeIterator {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for HistoryBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
