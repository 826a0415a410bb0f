use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use sampleflow::query::MinMax;
use sampleflow::store::{SeriesStore, StoreConfig};
use sampleflow::{Error, Result};
use tempfile::tempdir;

const FAST_SAMPLES: usize = 100_000;
const DEFAULT_STRESS_SAMPLES: usize = 2_000_000;
const READERS: usize = 8;

#[test]
fn stress_concurrent_readers_fast() -> Result<()> {
    run_stress(FAST_SAMPLES, 2)
}

#[test]
fn stress_concurrent_readers_eager_flush() -> Result<()> {
    run_stress(FAST_SAMPLES, 0)
}

#[test]
#[ignore]
fn stress_concurrent_readers_heavy() -> Result<()> {
    let samples = env_usize("SAMPLEFLOW_STRESS_SAMPLES", DEFAULT_STRESS_SAMPLES);
    run_stress(samples, 2)
}

/// Sample `i` holds the value `i`, so any range `a..=b` must be exactly
/// `{a, b}` regardless of where the blocks live.
fn run_stress(samples: usize, lag: u64) -> Result<()> {
    let dir = tempdir().expect("tempdir");
    let store = SeriesStore::open(StoreConfig {
        flush_lag: lag,
        flush_threads: 2,
        read_cache_blocks: 4,
        ..StoreConfig::with_root(dir.path())
    })?;
    let series = store.create_series("ramp")?;
    let done = Arc::new(AtomicBool::new(false));

    let readers: Vec<_> = (0..READERS)
        .map(|id| {
            let series = Arc::clone(&series);
            let done = Arc::clone(&done);
            thread::spawn(move || -> Result<u64> {
                let mut rng = 0x2545_F491_4F6C_DD1D_u64 ^ (id as u64 + 1);
                let mut checked = 0u64;
                while !done.load(Ordering::Acquire) || checked < 64 {
                    let count = series.sample_count();
                    if count == 0 {
                        thread::yield_now();
                        continue;
                    }
                    rng ^= rng << 13;
                    rng ^= rng >> 7;
                    rng ^= rng << 17;
                    let a = rng % count;
                    let b = a + (rng >> 32) % (count - a);
                    let range = series.get_range(a, b)?;
                    if range != (MinMax { min: a as f64, max: b as f64 }) {
                        return Err(Error::Corrupt("range disagrees with ramp"));
                    }
                    if series.get_sample(b)? != b as f64 {
                        return Err(Error::Corrupt("sample disagrees with ramp"));
                    }
                    checked += 1;
                }
                Ok(checked)
            })
        })
        .collect();

    for i in 0..samples as u64 {
        series.append(i as f64, i)?;
    }
    done.store(true, Ordering::Release);

    let mut checked = 0;
    for reader in readers {
        checked += reader.join().expect("reader thread")?;
    }
    assert!(checked > 0);
    assert_eq!(series.sample_count(), samples as u64);
    assert!(store.wait_idle(Duration::from_secs(30))?);
    assert!(!series.is_degraded());

    let last = samples as u64 - 1;
    assert_eq!(series.get_range(0, last)?, MinMax { min: 0.0, max: last as f64 });
    Ok(())
}

fn env_usize(name: &str, default: usize) -> usize {
    std::env::var(name)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .unwrap_or(default)
}
