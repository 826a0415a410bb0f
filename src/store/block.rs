//! In-memory block representation and lifecycle state.

use std::ops::Range;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use crate::query::MinMax;

/// Samples per block.
pub const BLOCK_SIZE: usize = 1024;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockState {
    Empty = 0,
    Filling = 1,
    /// Min/max recorded and final.
    Full = 2,
    FlushScheduled = 3,
    Flushing = 4,
    /// Durable on disk, memory released.
    OnDisk = 5,
    /// Durable on disk and reloaded for reads.
    OnDiskCached = 6,
    /// Failed post-read validation.
    Unavailable = 7,
}

impl BlockState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            1 => BlockState::Filling,
            2 => BlockState::Full,
            3 => BlockState::FlushScheduled,
            4 => BlockState::Flushing,
            5 => BlockState::OnDisk,
            6 => BlockState::OnDiskCached,
            7 => BlockState::Unavailable,
            _ => BlockState::Empty,
        }
    }

    pub fn is_on_disk(self) -> bool {
        matches!(self, BlockState::OnDisk | BlockState::OnDiskCached)
    }
}

/// Sample and timestamp slots of one block.
///
/// Slots are atomics so readers can scan a filling block while the writer
/// appends; the series publishes its sample count with `Release` after each
/// store, and readers only look at slots below the count they loaded.
#[derive(Debug)]
pub struct BlockData {
    values: Box<[AtomicU64]>,
    timestamps: Box<[AtomicU64]>,
}

impl BlockData {
    pub fn new() -> Self {
        Self {
            values: (0..BLOCK_SIZE).map(|_| AtomicU64::new(0)).collect(),
            timestamps: (0..BLOCK_SIZE).map(|_| AtomicU64::new(0)).collect(),
        }
    }

    pub fn from_samples(values: &[f64], timestamps: &[u64]) -> Self {
        let data = Self::new();
        for (slot, (value, ts)) in values.iter().zip(timestamps).take(BLOCK_SIZE).enumerate() {
            data.store(slot, *value, *ts);
        }
        data
    }

    pub fn store(&self, slot: usize, value: f64, timestamp: u64) {
        self.values[slot].store(value.to_bits(), Ordering::Relaxed);
        self.timestamps[slot].store(timestamp, Ordering::Relaxed);
    }

    pub fn value(&self, slot: usize) -> f64 {
        f64::from_bits(self.values[slot].load(Ordering::Relaxed))
    }

    pub fn timestamp(&self, slot: usize) -> u64 {
        self.timestamps[slot].load(Ordering::Relaxed)
    }

    pub fn values(&self, range: Range<usize>) -> Vec<f64> {
        range.map(|slot| self.value(slot)).collect()
    }

    pub fn timestamps(&self, range: Range<usize>) -> Vec<u64> {
        range.map(|slot| self.timestamp(slot)).collect()
    }

    pub fn min_max(&self, range: Range<usize>) -> Option<MinMax> {
        let mut acc: Option<MinMax> = None;
        for slot in range {
            let value = self.value(slot);
            match acc.as_mut() {
                Some(acc) => acc.include(value),
                None => acc = Some(MinMax::of(value)),
            }
        }
        acc
    }
}

impl Default for BlockData {
    fn default() -> Self {
        Self::new()
    }
}

/// One block of a series: lifecycle state plus optional resident data.
#[derive(Debug)]
pub struct Block {
    index: u64,
    state: AtomicU8,
    data: RwLock<Option<Arc<BlockData>>>,
    /// Serializes reloads so concurrent readers load a block once.
    load: Mutex<()>,
}

impl Block {
    /// A new block ready for the writer.
    pub fn filling(index: u64) -> (Arc<Self>, Arc<BlockData>) {
        let data = Arc::new(BlockData::new());
        let block = Arc::new(Self {
            index,
            state: AtomicU8::new(BlockState::Filling as u8),
            data: RwLock::new(Some(Arc::clone(&data))),
            load: Mutex::new(()),
        });
        (block, data)
    }

    /// A block known to exist only on disk.
    pub fn on_disk(index: u64) -> Arc<Self> {
        Arc::new(Self {
            index,
            state: AtomicU8::new(BlockState::OnDisk as u8),
            data: RwLock::new(None),
            load: Mutex::new(()),
        })
    }

    pub fn index(&self) -> u64 {
        self.index
    }

    pub fn state(&self) -> BlockState {
        BlockState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: BlockState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Move from `from` to `to`; false if the block was not in `from`.
    pub fn transition(&self, from: BlockState, to: BlockState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn data(&self) -> Option<Arc<BlockData>> {
        self.data.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn set_data(&self, data: Option<Arc<BlockData>>) {
        *self.data.write().unwrap_or_else(|e| e.into_inner()) = data;
    }

    pub fn is_resident(&self) -> bool {
        self.data.read().map(|data| data.is_some()).unwrap_or(false)
    }

    pub(crate) fn lock_load(&self) -> MutexGuard<'_, ()> {
        self.load.lock().unwrap_or_else(|e| e.into_inner())
    }
}
