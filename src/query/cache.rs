//! Per-series query cache.
//!
//! Holds two things: the min/max of every finalized block, and the set of
//! on-disk blocks that were reloaded for a read and are kept resident. The
//! reloaded set is bounded and evicts the least recently touched block.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::query::MinMax;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Block reads served from memory.
    pub hits: u64,
    /// Block reads that went to storage.
    pub misses: u64,
    pub evictions: u64,
    /// Reloaded blocks currently kept resident.
    pub cached_blocks: usize,
}

#[derive(Debug, Default)]
struct Reloaded {
    tick: u64,
    /// block index -> last access tick
    last_access: HashMap<u64, u64>,
}

#[derive(Debug)]
pub struct QueryCache {
    /// Indexed by block index. Blocks finalize in order, so this only grows
    /// at the end. `None` marks a block with no valid sample.
    aggregates: RwLock<Vec<Option<MinMax>>>,
    reloaded: Mutex<Reloaded>,
    capacity: usize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl QueryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            aggregates: RwLock::new(Vec::new()),
            reloaded: Mutex::new(Reloaded::default()),
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record the final min/max of `block`, `None` when every slot of it
    /// precedes the first valid sample.
    ///
    /// Blocks are recorded in index order; a repeated index overwrites.
    pub fn record_block(&self, block: u64, range: Option<MinMax>) {
        let mut aggregates = self.aggregates_mut();
        let slot = block as usize;
        if slot < aggregates.len() {
            aggregates[slot] = range;
        } else if slot == aggregates.len() {
            aggregates.push(range);
        } else {
            log::error!(
                "block {block} finalized out of order (expected {})",
                aggregates.len()
            );
        }
    }

    /// Aggregate of a finalized block. The outer `None` means the block is
    /// not finalized yet.
    pub fn block_range(&self, block: u64) -> Option<Option<MinMax>> {
        self.aggregates().get(block as usize).copied()
    }

    pub fn finalized_blocks(&self) -> u64 {
        self.aggregates().len() as u64
    }

    pub fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    /// Mark a reloaded block as just used.
    pub fn touch(&self, block: u64) {
        let mut reloaded = self.reloaded();
        reloaded.tick += 1;
        let tick = reloaded.tick;
        if let Some(last) = reloaded.last_access.get_mut(&block) {
            *last = tick;
        }
    }

    /// Admit a freshly reloaded block. Returns the blocks that must give up
    /// their residency to keep the set within capacity.
    pub fn admit(&self, block: u64) -> Vec<u64> {
        let mut reloaded = self.reloaded();
        reloaded.tick += 1;
        let tick = reloaded.tick;
        reloaded.last_access.insert(block, tick);

        let mut evicted = Vec::new();
        while reloaded.last_access.len() > self.capacity {
            let oldest = reloaded
                .last_access
                .iter()
                .filter(|(candidate, _)| **candidate != block)
                .min_by_key(|(_, last)| **last)
                .map(|(candidate, _)| *candidate);
            match oldest {
                Some(oldest) => {
                    reloaded.last_access.remove(&oldest);
                    evicted.push(oldest);
                }
                None => break,
            }
        }
        self.evictions
            .fetch_add(evicted.len() as u64, Ordering::Relaxed);
        evicted
    }

    pub fn is_cached(&self, block: u64) -> bool {
        self.reloaded().last_access.contains_key(&block)
    }

    /// Drop every aggregate and reloaded block. Both sets are cleared under
    /// their locks together so no reader sees one without the other.
    pub fn invalidate(&self) {
        let mut aggregates = self.aggregates_mut();
        let mut reloaded = self.reloaded();
        aggregates.clear();
        reloaded.last_access.clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            cached_blocks: self.reloaded().last_access.len(),
        }
    }

    fn aggregates(&self) -> RwLockReadGuard<'_, Vec<Option<MinMax>>> {
        self.aggregates.read().unwrap_or_else(|e| e.into_inner())
    }

    fn aggregates_mut(&self) -> RwLockWriteGuard<'_, Vec<Option<MinMax>>> {
        self.aggregates.write().unwrap_or_else(|e| e.into_inner())
    }

    fn reloaded(&self) -> MutexGuard<'_, Reloaded> {
        self.reloaded.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_blocks_in_order() {
        let cache = QueryCache::new(4);
        cache.record_block(0, None);
        cache.record_block(1, Some(MinMax { min: -5.0, max: 3.0 }));
        // Out of order: ignored.
        cache.record_block(3, Some(MinMax::of(1.0)));

        assert_eq!(cache.block_range(0), Some(None));
        assert_eq!(cache.block_range(1), Some(Some(MinMax { min: -5.0, max: 3.0 })));
        assert_eq!(cache.block_range(2), None);
        assert_eq!(cache.finalized_blocks(), 2);
    }

    #[test]
    fn evicts_least_recently_touched() {
        let cache = QueryCache::new(2);
        assert!(cache.admit(1).is_empty());
        assert!(cache.admit(2).is_empty());
        cache.touch(1);
        assert_eq!(cache.admit(3), vec![2]);
        assert!(cache.is_cached(1));
        assert!(cache.is_cached(3));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn invalidate_drops_everything() {
        let cache = QueryCache::new(2);
        cache.record_block(0, Some(MinMax::of(1.0)));
        cache.admit(0);
        cache.invalidate();
        assert_eq!(cache.block_range(0), None);
        assert_eq!(cache.stats().cached_blocks, 0);
    }
}
