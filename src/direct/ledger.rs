use std::collections::{HashSet, VecDeque};
use tracing::debug;

pub const DEFAULT_LEDGER_CAPACITY: usize = 10_000;

/// Bounded record of item ids already surfaced to subscribers.
///
/// Ids are only forgotten by compaction: once more than `capacity` ids are
/// held, the oldest ones (by insertion, not by message timestamp) are dropped
/// until `capacity / 2` remain. A forgotten id that shows up again is emitted
/// again.
#[derive(Debug)]
pub struct DedupLedger {
    seen: HashSet<String>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DedupLedger {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(2);
        Self {
            seen: HashSet::with_capacity(capacity + 1),
            order: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Returns true exactly once per id (until compaction forgets it) and
    /// marks the id as seen.
    pub fn should_emit(&mut self, item_id: &str) -> bool {
        if self.seen.contains(item_id) {
            return false;
        }
        self.seen.insert(item_id.to_string());
        self.order.push_back(item_id.to_string());

        if self.order.len() > self.capacity {
            self.compact();
        }
        true
    }

    pub fn contains(&self, item_id: &str) -> bool {
        self.seen.contains(item_id)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    fn compact(&mut self) {
        let keep = self.capacity / 2;
        let evict = self.order.len().saturating_sub(keep);
        for id in self.order.drain(..evict) {
            self.seen.remove(&id);
        }
        debug!("Dedup ledger compacted: evicted {}, kept {}", evict, keep);
    }
}

impl Default for DedupLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LEDGER_CAPACITY)
    }
}
