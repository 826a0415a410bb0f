//! One append-only series: block directory, writer gate, flush bookkeeping
//! and the read paths.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, RwLock, Weak};
use std::time::{Duration, Instant};

use crate::core::{Error, Result};
use crate::query::{CacheStats, MinMax, QueryCache, SampleBuffer};
use crate::store::block::{Block, BlockData, BlockState, BLOCK_SIZE};
use crate::store::block_file::BlockImage;
use crate::store::flush::{write_with_retry, FlushJob, FlushQueue, RetryPolicy};
use crate::store::storage::BlockStorage;
use crate::store::StoreConfig;

const B: u64 = BLOCK_SIZE as u64;
/// `first_valid` before the series has seen a finite value.
const NO_VALID: u64 = u64::MAX;

pub type SeriesHandle = Arc<Series>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct SeriesSettings {
    pub flush_lag: u64,
    pub retry: RetryPolicy,
    pub dispose_timeout: Duration,
}

impl From<&StoreConfig> for SeriesSettings {
    fn from(config: &StoreConfig) -> Self {
        Self {
            flush_lag: config.flush_lag,
            retry: RetryPolicy {
                retries: config.flush_retries,
                backoff: config.retry_backoff(),
            },
            dispose_timeout: config.dispose_timeout(),
        }
    }
}

/// Snapshot of a series' counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SeriesStats {
    pub samples: u64,
    pub blocks: usize,
    pub resident_blocks: usize,
    pub on_disk_blocks: usize,
    pub unavailable_blocks: usize,
    pub degraded: bool,
    pub substitutions: u64,
    pub cache: CacheStats,
}

struct WriterState {
    current: Option<(Arc<Block>, Arc<BlockData>)>,
    last_valid: Option<f64>,
    /// Lowest block index not yet handed to the lag policy.
    next_flush: u64,
}

#[derive(Default)]
struct FlightState {
    /// Jobs scheduled and not finished, including in-flight ones.
    pending: usize,
    in_flight: usize,
    /// Bumped by `clear`/`dispose`; flushes from an older generation discard
    /// what they wrote.
    generation: u64,
}

/// A named series of `f64` samples with `u64` timestamps.
///
/// One writer calls [`append`](Self::append); any number of threads may read.
pub struct Series {
    name: String,
    me: Weak<Series>,
    settings: SeriesSettings,
    storage: Arc<dyn BlockStorage>,
    flusher: FlushQueue,
    blocks: RwLock<BTreeMap<u64, Arc<Block>>>,
    cache: QueryCache,
    count: AtomicU64,
    /// Index of the first finite sample. Earlier slots hold placeholders and
    /// are left out of every min/max.
    first_valid: AtomicU64,
    writer: Mutex<WriterState>,
    flight: Mutex<FlightState>,
    flight_done: Condvar,
    degraded: AtomicBool,
    disposed: AtomicBool,
    cancelled: AtomicBool,
    substitutions: AtomicU64,
}

impl std::fmt::Debug for Series {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Series")
            .field("name", &self.name)
            .field("samples", &self.sample_count())
            .finish()
    }
}

impl Series {
    pub(crate) fn new(
        name: String,
        settings: SeriesSettings,
        storage: Arc<dyn BlockStorage>,
        flusher: FlushQueue,
        cache_blocks: usize,
    ) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            name,
            me: me.clone(),
            settings,
            storage,
            flusher,
            blocks: RwLock::new(BTreeMap::new()),
            cache: QueryCache::new(cache_blocks),
            count: AtomicU64::new(0),
            first_valid: AtomicU64::new(NO_VALID),
            writer: Mutex::new(WriterState {
                current: None,
                last_valid: None,
                next_flush: 0,
            }),
            flight: Mutex::new(FlightState::default()),
            flight_done: Condvar::new(),
            degraded: AtomicBool::new(false),
            disposed: AtomicBool::new(false),
            cancelled: AtomicBool::new(false),
            substitutions: AtomicU64::new(0),
        })
    }

    /// Rebuild from blocks already in storage: the contiguous run starting
    /// at block 0. Later blocks after a gap or a bad block are ignored.
    pub(crate) fn recover(
        name: String,
        settings: SeriesSettings,
        storage: Arc<dyn BlockStorage>,
        flusher: FlushQueue,
        cache_blocks: usize,
    ) -> Result<Arc<Self>> {
        let series = Self::new(name, settings, Arc::clone(&storage), flusher, cache_blocks);
        let stored = storage.list_blocks(&series.name)?;
        let mut recovered = 0u64;
        let mut last_valid = None;
        let mut first_valid = NO_VALID;
        {
            let mut blocks = series.blocks_mut();
            for index in stored {
                if index != recovered {
                    log::warn!("{}: gap before block {index}, recovery stops at {recovered}", series.name);
                    break;
                }
                let image = match storage.read_block(&series.name, index) {
                    Ok(image) => image,
                    Err(err) => {
                        log::warn!("{}: block {index} unreadable during recovery: {err}", series.name);
                        break;
                    }
                };
                if image.values.len() != BLOCK_SIZE {
                    log::warn!("{}: block {index} is not a full block", series.name);
                    break;
                }
                if first_valid == NO_VALID && image.valid_from < BLOCK_SIZE {
                    first_valid = index * B + image.valid_from as u64;
                }
                if first_valid != NO_VALID {
                    last_valid = image.values.last().copied();
                }
                series
                    .cache
                    .record_block(index, MinMax::from_slice(image.valid_values()));
                blocks.insert(index, Block::on_disk(index));
                recovered += 1;
            }
        }
        if let Ok(mut writer) = series.writer.lock() {
            writer.last_valid = last_valid;
            writer.next_flush = recovered;
        }
        series.first_valid.store(first_valid, Ordering::Release);
        series.count.store(recovered * B, Ordering::Release);
        log::info!("{}: recovered {recovered} blocks", series.name);
        Ok(series)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of samples visible to readers.
    pub fn sample_count(&self) -> u64 {
        self.count.load(Ordering::Acquire)
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Acquire)
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    pub fn cache(&self) -> &QueryCache {
        &self.cache
    }

    /// Append the next sample; returns its index.
    ///
    /// A NaN or infinite value is replaced by the last valid value. Before
    /// the first finite value it is stored as 0.0 and left out of min/max.
    /// Never waits on disk I/O.
    ///
    /// # Errors
    ///
    /// - `Error::Disposed`: the series was disposed
    pub fn append(&self, value: f64, timestamp: u64) -> Result<u64> {
        let mut writer = self.writer()?;
        if self.is_disposed() {
            return Err(Error::Disposed);
        }

        let index = self.count.load(Ordering::Relaxed);
        let value = if value.is_finite() {
            if writer.last_valid.is_none() {
                self.first_valid.store(index, Ordering::Release);
            }
            writer.last_valid = Some(value);
            value
        } else {
            let replacement = writer.last_valid.unwrap_or(0.0);
            let seen = self.substitutions.fetch_add(1, Ordering::Relaxed);
            if seen == 0 {
                log::warn!("{}: non-finite value {value} replaced by {replacement}", self.name);
            } else {
                log::debug!("{}: non-finite value {value} replaced by {replacement}", self.name);
            }
            replacement
        };

        let block_index = index / B;
        let slot = (index % B) as usize;

        if writer.current.is_none() {
            let (block, data) = Block::filling(block_index);
            self.blocks_mut().insert(block_index, Arc::clone(&block));
            writer.current = Some((block, data));
        }
        let Some((block, data)) = writer.current.as_ref() else {
            return Err(Error::Corrupt("filling block missing"));
        };
        data.store(slot, value, timestamp);

        if slot + 1 == BLOCK_SIZE {
            // Aggregate first, then state, then count: a reader that sees the
            // count also sees a final min/max.
            let range = data.min_max(self.valid_from(block_index)..BLOCK_SIZE);
            self.cache.record_block(block_index, range);
            block.set_state(BlockState::Full);
            self.count.store(index + 1, Ordering::Release);
            writer.current = None;
            if !self.is_degraded() {
                self.schedule_lagged(&mut writer, block_index);
            }
        } else {
            self.count.store(index + 1, Ordering::Release);
        }
        Ok(index)
    }

    /// Hand full blocks at least `flush_lag` behind `finalized` to the pool.
    fn schedule_lagged(&self, writer: &mut WriterState, finalized: u64) {
        let Some(limit) = finalized.checked_sub(self.settings.flush_lag) else {
            return;
        };
        if limit < writer.next_flush {
            return;
        }
        let candidates: Vec<Arc<Block>> = self
            .blocks_read()
            .range(writer.next_flush..=limit)
            .map(|(_, block)| Arc::clone(block))
            .collect();
        writer.next_flush = limit + 1;
        for block in candidates {
            self.schedule(&block);
        }
    }

    fn schedule(&self, block: &Arc<Block>) {
        {
            let mut flight = self.flight();
            if !block.transition(BlockState::Full, BlockState::FlushScheduled) {
                return;
            }
            flight.pending += 1;
        }
        let Some(me) = self.me.upgrade() else {
            self.abandon_flush(block);
            return;
        };
        let job = FlushJob {
            series: me,
            block: Arc::clone(block),
        };
        if !self.flusher.submit(job) {
            log::warn!("{}: flush pool stopped, block {} stays in memory", self.name, block.index());
            self.abandon_flush(block);
        }
    }

    /// Return a scheduled block that will never run to `Full`.
    pub(crate) fn abandon_flush(&self, block: &Block) {
        let mut flight = self.flight();
        if block.transition(BlockState::FlushScheduled, BlockState::Full) {
            flight.pending = flight.pending.saturating_sub(1);
            self.flight_done.notify_all();
        }
    }

    /// Flush one block. Runs on a pool thread.
    pub(crate) fn run_flush(&self, block: &Block) {
        let generation = {
            let mut flight = self.flight();
            if !block.transition(BlockState::FlushScheduled, BlockState::Flushing) {
                // Cancelled by clear or dispose, which already settled `pending`.
                return;
            }
            flight.in_flight += 1;
            flight.generation
        };

        let outcome = match block.data() {
            Some(data) => write_with_retry(
                self.storage.as_ref(),
                &self.name,
                block.index(),
                &BlockImage::new(data.values(0..BLOCK_SIZE), data.timestamps(0..BLOCK_SIZE))
                    .with_valid_from(self.valid_from(block.index())),
                self.settings.retry,
                &self.cancelled,
            ),
            None => Err(Error::Corrupt("flushing block has no data")),
        };

        let mut flight = self.flight();
        let stale = flight.generation != generation;
        match outcome {
            Ok(()) if stale => {
                if let Err(err) = self.storage.remove_block(&self.name, block.index()) {
                    log::warn!("{}: removing stale block {} failed: {err}", self.name, block.index());
                }
            }
            Ok(()) => {
                if block.transition(BlockState::Flushing, BlockState::OnDisk) {
                    block.set_data(None);
                }
                log::debug!("{}: block {} flushed", self.name, block.index());
            }
            Err(Error::Cancelled) => {
                block.transition(BlockState::Flushing, BlockState::Full);
            }
            Err(err) => {
                block.transition(BlockState::Flushing, BlockState::Full);
                if !self.degraded.swap(true, Ordering::AcqRel) {
                    log::error!(
                        "{}: series degraded, block {} kept in memory: {err}",
                        self.name,
                        block.index()
                    );
                }
            }
        }
        flight.in_flight -= 1;
        flight.pending = flight.pending.saturating_sub(1);
        drop(flight);
        self.flight_done.notify_all();
    }

    /// Clear the degraded flag and reschedule every full block the lag
    /// policy allows. Returns the number of blocks scheduled.
    pub fn retry_flush(&self) -> Result<usize> {
        let mut writer = self.writer()?;
        self.degraded.store(false, Ordering::Release);
        let finalized = self.cache.finalized_blocks();
        let Some(limit) = finalized
            .checked_sub(1)
            .and_then(|last| last.checked_sub(self.settings.flush_lag))
        else {
            return Ok(0);
        };
        let candidates: Vec<Arc<Block>> = self
            .blocks_read()
            .range(..=limit)
            .filter(|(_, block)| block.state() == BlockState::Full)
            .map(|(_, block)| Arc::clone(block))
            .collect();
        writer.next_flush = writer.next_flush.max(limit + 1);
        for block in &candidates {
            self.schedule(block);
        }
        Ok(candidates.len())
    }

    /// Schedule every full block regardless of lag, then wait for all
    /// flushes to finish. `Ok(false)` on timeout.
    pub fn flush_all(&self, timeout: Duration) -> Result<bool> {
        {
            let _writer = self.writer()?;
            let candidates: Vec<Arc<Block>> = self
                .blocks_read()
                .values()
                .filter(|block| block.state() == BlockState::Full)
                .cloned()
                .collect();
            for block in &candidates {
                self.schedule(block);
            }
        }
        self.wait_idle(timeout)
    }

    /// Wait until no flush is scheduled or running. `Ok(false)` on timeout.
    ///
    /// # Errors
    ///
    /// - `Error::Cancelled`: [`cancel_waits`](Self::cancel_waits) was called
    pub fn wait_idle(&self, timeout: Duration) -> Result<bool> {
        let deadline = Instant::now() + timeout;
        let mut flight = self.flight();
        while flight.pending > 0 {
            if self.cancelled.load(Ordering::Acquire) {
                return Err(Error::Cancelled);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            flight = self.wait_flight(flight, deadline - now);
        }
        Ok(true)
    }

    /// Abort blocking waits in `clear`/`wait_idle` and stop flush retries.
    /// Used when the owning connection is torn down.
    pub fn cancel_waits(&self) {
        self.cancelled.store(true, Ordering::Release);
        let _flight = self.flight();
        self.flight_done.notify_all();
    }

    /// Drop every sample, aggregate and block file of the series. The series
    /// stays usable and starts again at index 0.
    ///
    /// Scheduled flushes are cancelled and running ones awaited first.
    ///
    /// # Errors
    ///
    /// - `Error::Cancelled`: teardown interrupted the wait; nothing was cleared
    /// - `Error::FlushTimeout`: a running flush outlived the dispose timeout;
    ///   nothing was cleared
    /// - `Error::Disposed`: the series was disposed
    pub fn clear(&self) -> Result<()> {
        let mut writer = self.writer()?;
        if self.is_disposed() {
            return Err(Error::Disposed);
        }
        {
            let deadline = Instant::now() + self.settings.dispose_timeout;
            let mut flight = self.flight();
            self.cancel_scheduled(&mut flight);
            while flight.in_flight > 0 {
                if self.cancelled.load(Ordering::Acquire) {
                    return Err(Error::Cancelled);
                }
                let now = Instant::now();
                if now >= deadline {
                    log::warn!(
                        "{}: clear gave up with {} flush(es) still running",
                        self.name,
                        flight.in_flight
                    );
                    return Err(Error::FlushTimeout);
                }
                flight = self.wait_flight(flight, deadline - now);
            }
            flight.generation += 1;
            self.release_blocks();
        }
        writer.current = None;
        writer.last_valid = None;
        writer.next_flush = 0;
        self.degraded.store(false, Ordering::Release);
        self.storage.remove_series(&self.name)?;
        log::info!("{}: cleared", self.name);
        Ok(())
    }

    /// Tear the series down: refuse further appends, cancel scheduled
    /// flushes, await a running flush for up to the dispose timeout, then
    /// release memory and delete the block files. Idempotent.
    pub fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        let mut writer = self.writer()?;
        {
            let deadline = Instant::now() + self.settings.dispose_timeout;
            let mut flight = self.flight();
            self.cancel_scheduled(&mut flight);
            while flight.in_flight > 0 {
                let now = Instant::now();
                if self.cancelled.load(Ordering::Acquire) || now >= deadline {
                    log::warn!(
                        "{}: disposing with {} flush(es) still running",
                        self.name,
                        flight.in_flight
                    );
                    break;
                }
                flight = self.wait_flight(flight, deadline - now);
            }
            flight.generation += 1;
            self.release_blocks();
        }
        writer.current = None;
        self.storage.remove_series(&self.name)?;
        log::info!("{}: disposed", self.name);
        Ok(())
    }

    fn cancel_scheduled(&self, flight: &mut FlightState) {
        for block in self.blocks_read().values() {
            if block.transition(BlockState::FlushScheduled, BlockState::Full) {
                flight.pending = flight.pending.saturating_sub(1);
            }
        }
    }

    fn release_blocks(&self) {
        let mut blocks = self.blocks_mut();
        self.cache.invalidate();
        for block in blocks.values() {
            block.set_data(None);
        }
        blocks.clear();
        self.first_valid.store(NO_VALID, Ordering::Release);
        self.count.store(0, Ordering::Release);
    }

    /// First slot of `block` at or after the first finite sample;
    /// `BLOCK_SIZE` when the block has none.
    fn valid_from(&self, block: u64) -> usize {
        let first = self.first_valid.load(Ordering::Acquire);
        first.saturating_sub(block * B).min(B) as usize
    }

    /// Value at `index`.
    ///
    /// # Errors
    ///
    /// - `Error::OutOfRange`: `index` is not yet written
    /// - `Error::BlockUnavailable`: the owning block failed to reload
    pub fn get_sample(&self, index: u64) -> Result<f64> {
        self.check_index(index)?;
        let data = self.resident_data(index / B)?;
        Ok(data.value((index % B) as usize))
    }

    pub fn get_timestamp(&self, index: u64) -> Result<u64> {
        self.check_index(index)?;
        let data = self.resident_data(index / B)?;
        Ok(data.timestamp((index % B) as usize))
    }

    /// Min/max over `first..=last`.
    ///
    /// Whole finalized blocks come from the cached aggregates; only the
    /// boundary blocks are scanned, over their partial slices. Placeholders
    /// stored before the first finite sample are skipped.
    ///
    /// # Errors
    ///
    /// - `Error::OutOfRange`: the span is not fully written or holds no
    ///   finite sample
    /// - `Error::BlockUnavailable`: the span touches a block that failed
    ///   validation
    pub fn get_range(&self, first: u64, last: u64) -> Result<MinMax> {
        self.check_span(first, last)?;
        let from = first.max(self.first_valid.load(Ordering::Acquire));
        if from > last {
            return Err(Error::OutOfRange {
                index: first,
                count: self.sample_count(),
            });
        }
        let first_block = from / B;
        let last_block = last / B;
        let mut acc = None;
        for block in first_block..=last_block {
            if self.block_state(block) == Some(BlockState::Unavailable) {
                return Err(Error::BlockUnavailable { block });
            }
            let lo = if block == first_block { (from % B) as usize } else { 0 };
            let hi = if block == last_block { (last % B) as usize } else { BLOCK_SIZE - 1 };
            if lo == 0 && hi == BLOCK_SIZE - 1 {
                match self.cache.block_range(block) {
                    Some(Some(range)) => {
                        acc = MinMax::fold(acc, range);
                        continue;
                    }
                    Some(None) => continue,
                    None => {}
                }
            }
            let data = self.resident_data(block)?;
            if let Some(range) = data.min_max(lo..hi + 1) {
                acc = MinMax::fold(acc, range);
            }
        }
        acc.ok_or(Error::OutOfRange {
            index: first,
            count: self.sample_count(),
        })
    }

    /// Materialize samples `first..=last` with their timestamps.
    pub fn get_samples_buffer(&self, first: u64, last: u64) -> Result<SampleBuffer> {
        self.check_span(first, last)?;
        let mut buffer = SampleBuffer::with_capacity(first, (last - first + 1) as usize);
        for block in first / B..=last / B {
            let lo = if block == first / B { (first % B) as usize } else { 0 };
            let hi = if block == last / B { (last % B) as usize } else { BLOCK_SIZE - 1 };
            let data = self.resident_data(block)?;
            buffer.extend(&data.values(lo..hi + 1), &data.timestamps(lo..hi + 1));
        }
        Ok(buffer)
    }

    fn check_index(&self, index: u64) -> Result<()> {
        let count = self.sample_count();
        if index >= count {
            return Err(Error::OutOfRange { index, count });
        }
        Ok(())
    }

    fn check_span(&self, first: u64, last: u64) -> Result<()> {
        if first > last {
            return Err(Error::OutOfRange {
                index: first,
                count: self.sample_count(),
            });
        }
        self.check_index(last)
    }

    /// Resident data of a block, reloading it from storage on a miss.
    fn resident_data(&self, index: u64) -> Result<Arc<BlockData>> {
        let block = self
            .blocks_read()
            .get(&index)
            .cloned()
            .ok_or(Error::BlockUnavailable { block: index })?;

        if let Some(data) = block.data() {
            self.cache.record_hit();
            if block.state() == BlockState::OnDiskCached {
                self.cache.touch(index);
            }
            return Ok(data);
        }
        if block.state() == BlockState::Unavailable {
            return Err(Error::BlockUnavailable { block: index });
        }

        let _loading = block.lock_load();
        if let Some(data) = block.data() {
            self.cache.record_hit();
            return Ok(data);
        }
        self.cache.record_miss();

        let data = match self.load_block(index) {
            Ok(data) => Arc::new(data),
            Err(err @ Error::Corrupt(_)) => {
                log::error!("{}: block {index} unavailable: {err}", self.name);
                block.set_state(BlockState::Unavailable);
                return Err(Error::BlockUnavailable { block: index });
            }
            Err(err) => {
                log::warn!("{}: reloading block {index} failed: {err}", self.name);
                return Err(err);
            }
        };
        block.set_data(Some(Arc::clone(&data)));
        block.transition(BlockState::OnDisk, BlockState::OnDiskCached);
        for evicted in self.cache.admit(index) {
            self.evict(evicted);
        }
        Ok(data)
    }

    fn load_block(&self, index: u64) -> Result<BlockData> {
        let image = self.storage.read_block(&self.name, index)?;
        if image.values.len() != BLOCK_SIZE || image.timestamps.len() != BLOCK_SIZE {
            return Err(Error::Corrupt("block sample count mismatch"));
        }
        if image.valid_from != self.valid_from(index) {
            return Err(Error::Corrupt("block first valid slot disagrees with series"));
        }
        if let Some(expected) = self.cache.block_range(index) {
            if MinMax::from_slice(image.valid_values()) != expected {
                return Err(Error::Corrupt("block contents disagree with cached aggregate"));
            }
        }
        Ok(BlockData::from_samples(&image.values, &image.timestamps))
    }

    fn evict(&self, index: u64) {
        let block = self.blocks_read().get(&index).cloned();
        if let Some(block) = block {
            if block.transition(BlockState::OnDiskCached, BlockState::OnDisk) {
                block.set_data(None);
            }
        }
    }

    pub fn stats(&self) -> SeriesStats {
        let blocks = self.blocks_read();
        let mut stats = SeriesStats {
            samples: self.sample_count(),
            blocks: blocks.len(),
            degraded: self.is_degraded(),
            substitutions: self.substitutions.load(Ordering::Relaxed),
            cache: self.cache.stats(),
            ..SeriesStats::default()
        };
        for block in blocks.values() {
            let state = block.state();
            if block.is_resident() {
                stats.resident_blocks += 1;
            }
            if state.is_on_disk() {
                stats.on_disk_blocks += 1;
            }
            if state == BlockState::Unavailable {
                stats.unavailable_blocks += 1;
            }
        }
        stats
    }

    /// Lifecycle state of a block, if the series has it.
    pub fn block_state(&self, index: u64) -> Option<BlockState> {
        self.blocks_read().get(&index).map(|block| block.state())
    }

    pub fn substitutions(&self) -> u64 {
        self.substitutions.load(Ordering::Relaxed)
    }

    fn writer(&self) -> Result<MutexGuard<'_, WriterState>> {
        self.writer
            .lock()
            .map_err(|_| Error::Corrupt("series writer lock poisoned"))
    }

    fn flight(&self) -> MutexGuard<'_, FlightState> {
        self.flight.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn wait_flight<'a>(
        &self,
        guard: MutexGuard<'a, FlightState>,
        timeout: Duration,
    ) -> MutexGuard<'a, FlightState> {
        match self.flight_done.wait_timeout(guard, timeout) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        }
    }

    fn blocks_read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<u64, Arc<Block>>> {
        self.blocks.read().unwrap_or_else(|e| e.into_inner())
    }

    fn blocks_mut(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<u64, Arc<Block>>> {
        self.blocks.write().unwrap_or_else(|e| e.into_inner())
    }
}
