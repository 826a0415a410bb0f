use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use sampleflow::query::MinMax;
use sampleflow::store::{
    BlockImage, BlockState, BlockStorage, FsBlockStorage, Series, SeriesStore, StoreConfig,
    BLOCK_SIZE,
};
use sampleflow::{Error, Result};
use tempfile::tempdir;

const B: u64 = BLOCK_SIZE as u64;

/// Filesystem storage with switchable write and read failures and a gate
/// that holds writes until released.
struct Faulty {
    inner: FsBlockStorage,
    fail_writes: AtomicBool,
    fail_reads: AtomicBool,
    writes: AtomicU32,
    gate: Mutex<()>,
}

impl Faulty {
    fn new(root: &std::path::Path) -> Arc<Self> {
        Arc::new(Self {
            inner: FsBlockStorage::new(root).expect("storage"),
            fail_writes: AtomicBool::new(false),
            fail_reads: AtomicBool::new(false),
            writes: AtomicU32::new(0),
            gate: Mutex::new(()),
        })
    }
}

impl BlockStorage for Faulty {
    fn write_block(&self, series: &str, index: u64, block: &BlockImage) -> Result<()> {
        let _gate = self.gate.lock().unwrap_or_else(|e| e.into_inner());
        self.writes.fetch_add(1, Ordering::SeqCst);
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("injected write failure")));
        }
        self.inner.write_block(series, index, block)
    }

    fn read_block(&self, series: &str, index: u64) -> Result<BlockImage> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(Error::Io(std::io::Error::other("too many open files")));
        }
        self.inner.read_block(series, index)
    }

    fn remove_block(&self, series: &str, index: u64) -> Result<()> {
        self.inner.remove_block(series, index)
    }

    fn remove_series(&self, series: &str) -> Result<()> {
        self.inner.remove_series(series)
    }

    fn list_blocks(&self, series: &str) -> Result<Vec<u64>> {
        self.inner.list_blocks(series)
    }
}

fn config(root: &std::path::Path) -> StoreConfig {
    StoreConfig {
        flush_lag: 0,
        flush_threads: 1,
        read_cache_blocks: 1,
        retry_backoff_ms: 1,
        dispose_timeout_ms: 200,
        ..StoreConfig::with_root(root)
    }
}

fn special(i: u64) -> f64 {
    match i % 5 {
        0 => -0.0,
        1 => f64::MIN_POSITIVE / 3.0,
        2 => f64::MAX,
        3 => -(i as f64) / 7.0,
        _ => 1e-300 * i as f64,
    }
}

fn fill(series: &Series, samples: u64) {
    for i in 0..samples {
        series.append(special(i), 1_000 + i).expect("append");
    }
}

fn wait_for_state(series: &Series, block: u64, state: BlockState) {
    let deadline = Instant::now() + Duration::from_secs(10);
    while series.block_state(block) != Some(state) {
        assert!(Instant::now() < deadline, "block {block} never reached {state:?}");
        thread::sleep(Duration::from_millis(1));
    }
}

#[test]
fn flushed_and_evicted_samples_reload_bit_identical() {
    let dir = tempdir().expect("tempdir");
    let store = SeriesStore::open(config(dir.path())).expect("store");
    let series = store.create_series("bits").expect("series");
    fill(&series, 3 * B);
    assert!(series.wait_idle(Duration::from_secs(10)).expect("wait"));
    assert_eq!(series.stats().resident_blocks, 0);

    for i in [0, 1, 2, 3, 4, B - 1] {
        assert_eq!(series.get_sample(i).expect("sample").to_bits(), special(i).to_bits());
    }
    assert_eq!(series.block_state(0), Some(BlockState::OnDiskCached));

    // Capacity is one block: loading block 2 evicts block 0.
    let v = series.get_sample(2 * B + 7).expect("sample");
    assert_eq!(v.to_bits(), special(2 * B + 7).to_bits());
    assert_eq!(series.block_state(0), Some(BlockState::OnDisk));
    assert_eq!(series.block_state(2), Some(BlockState::OnDiskCached));
    assert_eq!(series.get_timestamp(2 * B + 7).expect("ts"), 1_000 + 2 * B + 7);

    let stats = series.stats();
    assert_eq!(stats.cache.evictions, 1);
    assert_eq!(stats.cache.misses, 2);
    assert_eq!(stats.resident_blocks, 1);

    let buffer = series.get_samples_buffer(B - 2, B + 1).expect("buffer");
    let bits: Vec<u64> = buffer.values().iter().map(|v| v.to_bits()).collect();
    let expected: Vec<u64> = (B - 2..=B + 1).map(|i| special(i).to_bits()).collect();
    assert_eq!(bits, expected);
}

#[test]
fn write_failure_degrades_then_retry_recovers() {
    let dir = tempdir().expect("tempdir");
    let storage = Faulty::new(dir.path());
    storage.fail_writes.store(true, Ordering::SeqCst);
    let store = SeriesStore::with_storage(config(dir.path()), storage.clone()).expect("store");
    let series = store.create_series("flaky").expect("series");

    fill(&series, 2 * B);
    assert!(series.wait_idle(Duration::from_secs(10)).expect("wait"));
    assert!(series.is_degraded());
    // 1 attempt + 3 retries for block 0; block 1 is skipped while degraded
    // unless it was scheduled before the failure landed.
    assert!(storage.writes.load(Ordering::SeqCst) >= 4);
    assert_eq!(series.block_state(0), Some(BlockState::Full));
    assert_eq!(series.get_sample(5).expect("sample").to_bits(), special(5).to_bits());
    assert!(series.get_range(0, 2 * B - 1).is_ok());

    storage.fail_writes.store(false, Ordering::SeqCst);
    let scheduled = series.retry_flush().expect("retry");
    assert!(scheduled >= 1);
    assert!(series.wait_idle(Duration::from_secs(10)).expect("wait"));
    assert!(!series.is_degraded());
    assert_eq!(series.block_state(0), Some(BlockState::OnDisk));
    assert_eq!(series.block_state(1), Some(BlockState::OnDisk));
}

#[test]
fn corrupt_block_is_unavailable_only_for_its_range() {
    let dir = tempdir().expect("tempdir");
    let store = SeriesStore::open(config(dir.path())).expect("store");
    let series = store.create_series("corrupt").expect("series");
    fill(&series, 2 * B + 10);
    assert!(series.wait_idle(Duration::from_secs(10)).expect("wait"));

    let path = dir.path().join("corrupt").join("000000000.blk");
    let mut bytes = std::fs::read(&path).expect("read block");
    let last = bytes.len() - 1;
    bytes[last] ^= 0x5A;
    std::fs::write(&path, bytes).expect("write block");

    assert!(matches!(
        series.get_sample(3),
        Err(Error::BlockUnavailable { block: 0 })
    ));
    assert_eq!(series.block_state(0), Some(BlockState::Unavailable));
    assert!(matches!(
        series.get_samples_buffer(0, B + 1),
        Err(Error::BlockUnavailable { block: 0 })
    ));
    // Any range touching block 0 fails, even one its aggregate could answer.
    assert!(matches!(
        series.get_range(0, B - 1),
        Err(Error::BlockUnavailable { block: 0 })
    ));
    assert!(matches!(
        series.get_range(B - 1, B),
        Err(Error::BlockUnavailable { block: 0 })
    ));
    assert!(series.get_range(B, 2 * B - 1).is_ok());
    assert_eq!(series.get_sample(B + 3).expect("sample").to_bits(), special(B + 3).to_bits());
    assert_eq!(series.stats().unavailable_blocks, 1);
}

#[test]
fn recovers_flushed_blocks_after_reopen() {
    let dir = tempdir().expect("tempdir");
    {
        let store = SeriesStore::open(config(dir.path())).expect("store");
        let series = store.create_series("kept").expect("series");
        fill(&series, 3 * B + 50);
        assert!(series.wait_idle(Duration::from_secs(10)).expect("wait"));
        store.close().expect("close");
    }

    let store = SeriesStore::open(config(dir.path())).expect("reopen");
    let series = store.recover_series("kept").expect("recover");
    assert_eq!(series.sample_count(), 3 * B);
    assert_eq!(series.get_sample(2 * B + 1).expect("sample").to_bits(), special(2 * B + 1).to_bits());
    assert_eq!(series.get_timestamp(B).expect("ts"), 1_000 + B);

    let index = series.append(9.5, 0).expect("append");
    assert_eq!(index, 3 * B);
    assert_eq!(series.get_sample(3 * B).expect("sample"), 9.5);
}

#[test]
fn dispose_waits_bounded_for_running_flush() {
    let dir = tempdir().expect("tempdir");
    let storage = Faulty::new(dir.path());
    let store = SeriesStore::with_storage(config(dir.path()), storage.clone()).expect("store");
    let series = store.create_series("gone").expect("series");

    let gate = storage.gate.lock().expect("gate");
    fill(&series, 3 * B);
    wait_for_state(&series, 0, BlockState::Flushing);
    assert_eq!(series.block_state(1), Some(BlockState::FlushScheduled));

    let started = Instant::now();
    series.dispose().expect("dispose");
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(150), "dispose returned after {waited:?}");
    assert!(waited < Duration::from_secs(5));
    assert_eq!(series.sample_count(), 0);
    assert!(matches!(series.append(1.0, 0), Err(Error::Disposed)));

    drop(gate);
    assert!(series.wait_idle(Duration::from_secs(10)).expect("wait"));
    // The late flush discards what it wrote; the two cancelled blocks never ran.
    assert!(storage.list_blocks("gone").expect("list").is_empty());
    assert_eq!(storage.writes.load(Ordering::SeqCst), 1);
}

#[test]
fn transient_read_error_does_not_condemn_block() {
    let dir = tempdir().expect("tempdir");
    let storage = Faulty::new(dir.path());
    let store = SeriesStore::with_storage(config(dir.path()), storage.clone()).expect("store");
    let series = store.create_series("busy").expect("series");
    fill(&series, 2 * B + 10);
    assert!(series.wait_idle(Duration::from_secs(10)).expect("wait"));
    assert_eq!(series.block_state(0), Some(BlockState::OnDisk));

    storage.fail_reads.store(true, Ordering::SeqCst);
    assert!(matches!(series.get_sample(3), Err(Error::Io(_))));
    assert_eq!(series.block_state(0), Some(BlockState::OnDisk));

    storage.fail_reads.store(false, Ordering::SeqCst);
    assert_eq!(series.get_sample(3).expect("sample").to_bits(), special(3).to_bits());
    assert_eq!(series.block_state(0), Some(BlockState::OnDiskCached));
    assert_eq!(series.stats().unavailable_blocks, 0);
}

#[test]
fn leading_placeholders_survive_flush_and_recovery() {
    let dir = tempdir().expect("tempdir");
    let expected = MinMax {
        min: (B + 3) as f64,
        max: (3 * B - 1) as f64,
    };
    {
        let store = SeriesStore::open(config(dir.path())).expect("store");
        let series = store.create_series("late").expect("series");
        for i in 0..3 * B {
            let value = if i < B + 3 { f64::NAN } else { i as f64 };
            series.append(value, i).expect("append");
        }
        assert!(series.wait_idle(Duration::from_secs(10)).expect("wait"));
        assert_eq!(series.stats().resident_blocks, 0);

        // Block 1 reloads and its first valid slot checks out.
        assert_eq!(series.get_range(0, 3 * B - 1).expect("range"), expected);
        assert_eq!(series.block_state(1), Some(BlockState::OnDiskCached));
        store.close().expect("close");
    }

    let store = SeriesStore::open(config(dir.path())).expect("reopen");
    let series = store.recover_series("late").expect("recover");
    assert_eq!(series.get_range(0, 3 * B - 1).expect("range"), expected);
    assert!(matches!(
        series.get_range(0, B - 1),
        Err(Error::OutOfRange { .. })
    ));
    assert_eq!(series.get_sample(2).expect("placeholder"), 0.0);
    assert_eq!(series.stats().unavailable_blocks, 0);

    // A non-finite value now repeats the last recovered sample.
    series.append(f64::NAN, 3 * B).expect("append");
    assert_eq!(series.get_sample(3 * B).expect("sample"), (3 * B - 1) as f64);
}

#[test]
fn flush_all_ignores_the_lag() {
    let dir = tempdir().expect("tempdir");
    let store = SeriesStore::open(StoreConfig {
        flush_lag: 16,
        ..config(dir.path())
    })
    .expect("store");
    let series = store.create_series("held").expect("series");
    fill(&series, 3 * B + 5);
    assert!(store.wait_idle(Duration::from_secs(10)).expect("wait"));
    assert_eq!(series.block_state(0), Some(BlockState::Full));

    assert!(store.flush_all(Duration::from_secs(10)).expect("flush all"));
    for block in 0..3 {
        assert_eq!(series.block_state(block), Some(BlockState::OnDisk));
    }
    assert_eq!(series.block_state(3), Some(BlockState::Filling));
    assert_eq!(series.get_sample(B + 1).expect("sample").to_bits(), special(B + 1).to_bits());
}

#[test]
fn clear_wait_gives_up_after_dispose_timeout() {
    let dir = tempdir().expect("tempdir");
    let storage = Faulty::new(dir.path());
    let store = SeriesStore::with_storage(config(dir.path()), storage.clone()).expect("store");
    let series = store.create_series("stuck").expect("series");

    let gate = storage.gate.lock().expect("gate");
    fill(&series, B);
    wait_for_state(&series, 0, BlockState::Flushing);

    let started = Instant::now();
    assert!(matches!(series.clear(), Err(Error::FlushTimeout)));
    let waited = started.elapsed();
    assert!(waited >= Duration::from_millis(150), "clear returned after {waited:?}");
    assert!(waited < Duration::from_secs(5));
    assert_eq!(series.sample_count(), B);

    drop(gate);
    assert!(series.wait_idle(Duration::from_secs(10)).expect("wait"));
    series.clear().expect("clear");
    assert_eq!(series.sample_count(), 0);
}

#[test]
fn clear_wait_is_cancellable() {
    let dir = tempdir().expect("tempdir");
    let storage = Faulty::new(dir.path());
    let store = Arc::new(
        SeriesStore::with_storage(
            StoreConfig {
                dispose_timeout_ms: 10_000,
                ..config(dir.path())
            },
            storage.clone(),
        )
        .expect("store"),
    );
    let series = store.create_series("held").expect("series");

    let gate = storage.gate.lock().expect("gate");
    fill(&series, B);
    wait_for_state(&series, 0, BlockState::Flushing);

    let canceller = {
        let store = Arc::clone(&store);
        thread::spawn(move || {
            thread::sleep(Duration::from_millis(100));
            store.cancel_waits().expect("cancel");
        })
    };
    assert!(matches!(series.clear(), Err(Error::Cancelled)));
    canceller.join().expect("canceller");
    assert_eq!(series.sample_count(), B);

    drop(gate);
    let deadline = Instant::now() + Duration::from_secs(10);
    while series.block_state(0) == Some(BlockState::Flushing) {
        assert!(Instant::now() < deadline);
        thread::sleep(Duration::from_millis(1));
    }
    assert_eq!(series.block_state(0), Some(BlockState::OnDisk));
}

#[test]
fn clear_after_flush_removes_files() {
    let dir = tempdir().expect("tempdir");
    let store = SeriesStore::open(config(dir.path())).expect("store");
    let series = store.create_series("wipe").expect("series");
    fill(&series, 2 * B);
    assert!(series.wait_idle(Duration::from_secs(10)).expect("wait"));
    assert!(dir.path().join("wipe").join("000000001.blk").exists());

    series.clear().expect("clear");
    assert!(!dir.path().join("wipe").exists());
    assert_eq!(series.sample_count(), 0);
    assert!(series.cache().block_range(0).is_none());
}
