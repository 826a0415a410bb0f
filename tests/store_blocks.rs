use std::time::Duration;

use sampleflow::query::MinMax;
use sampleflow::store::{BlockState, SeriesStore, StoreConfig, BLOCK_SIZE};
use tempfile::tempdir;

fn open(root: &std::path::Path, lag: u64) -> SeriesStore {
    SeriesStore::open(StoreConfig {
        flush_lag: lag,
        ..StoreConfig::with_root(root)
    })
    .expect("store open")
}

fn true_range(values: &[f64]) -> MinMax {
    MinMax::from_slice(values).expect("non-empty")
}

#[test]
fn ten_thousand_sequential_samples() {
    assert_eq!(BLOCK_SIZE, 1024);
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), 2);
    let series = store.create_series("counter").expect("series");

    for i in 0..10_000u64 {
        series.append(i as f64, i * 1_000).expect("append");
    }

    // 10,000 = 9 full blocks + 784 samples in the filling block 9.
    assert_eq!(series.sample_count(), 10_000);
    for block in 0..9 {
        assert!(series.block_state(block).is_some(), "block {block} missing");
        assert_ne!(series.block_state(block), Some(BlockState::Filling));
    }
    assert_eq!(series.block_state(9), Some(BlockState::Filling));
    assert_eq!(series.block_state(10), None);
    assert_eq!(10_000 - 9 * BLOCK_SIZE, 784);
    assert_eq!(series.get_sample(9 * BLOCK_SIZE as u64 + 783).expect("last"), 9_999.0);

    assert_eq!(
        series.get_range(0, 9_999).expect("range"),
        MinMax {
            min: 0.0,
            max: 9_999.0
        }
    );
    let stats = series.stats();
    assert_eq!(stats.blocks, 10);
}

#[test]
fn ranges_match_brute_force_with_partial_tail() {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), 1);
    let series = store.create_series("wave").expect("series");

    let n = 5 * BLOCK_SIZE + 333;
    let values: Vec<f64> = (0..n)
        .map(|i| ((i as f64) * 0.37).sin() * 1000.0 + (i % 17) as f64)
        .collect();
    for (i, value) in values.iter().enumerate() {
        series.append(*value, i as u64).expect("append");
    }
    assert!(store.wait_idle(Duration::from_secs(10)).expect("wait"));

    let spans = [
        (0, n - 1),
        (0, BLOCK_SIZE - 1),
        (BLOCK_SIZE, 3 * BLOCK_SIZE - 1),
        (17, 4 * BLOCK_SIZE + 5),
        (BLOCK_SIZE - 1, BLOCK_SIZE),
        (5 * BLOCK_SIZE + 10, n - 1),
        (42, 42),
    ];
    for (first, last) in spans {
        assert_eq!(
            series.get_range(first as u64, last as u64).expect("range"),
            true_range(&values[first..=last]),
            "span {first}..={last}"
        );
    }
}

#[test]
fn range_across_block_flushed_mid_query() {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), 0);
    let series = store.create_series("flush").expect("series");

    let values: Vec<f64> = (0..3 * BLOCK_SIZE).map(|i| (i as f64 * 1.5) - 700.0).collect();
    for (i, value) in values[..BLOCK_SIZE + 100].iter().enumerate() {
        series.append(*value, i as u64).expect("append");
    }
    let before = series.get_range(10, (BLOCK_SIZE + 50) as u64).expect("range");

    for (i, value) in values.iter().enumerate().skip(BLOCK_SIZE + 100) {
        series.append(*value, i as u64).expect("append");
    }
    assert!(series.wait_idle(Duration::from_secs(10)).expect("wait"));
    assert!(series.block_state(0).is_some_and(BlockState::is_on_disk));

    let after = series.get_range(10, (BLOCK_SIZE + 50) as u64).expect("range");
    assert_eq!(before, after);
    assert_eq!(after, true_range(&values[10..=BLOCK_SIZE + 50]));
}

#[test]
fn non_finite_values_repeat_previous_sample() {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), 2);
    let series = store.create_series("noisy").expect("series");

    let input = [3.0, f64::NAN, 5.0, f64::INFINITY, f64::NEG_INFINITY, -2.0];
    for (i, value) in input.iter().enumerate() {
        series.append(*value, i as u64).expect("append");
    }

    let buffer = series.get_samples_buffer(0, 5).expect("buffer");
    assert_eq!(buffer.values(), &[3.0, 3.0, 5.0, 5.0, 5.0, -2.0]);
    assert_eq!(buffer.timestamps(), &[0, 1, 2, 3, 4, 5]);
    assert_eq!(
        series.get_range(0, 5).expect("range"),
        MinMax {
            min: -2.0,
            max: 5.0
        }
    );
    assert_eq!(series.stats().substitutions, 3);
}

#[test]
fn leading_placeholders_stay_out_of_min_max() {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), 2);
    let series = store.create_series("late").expect("series");

    for (i, value) in [f64::NAN, 5.0, 6.0].iter().enumerate() {
        series.append(*value, i as u64).expect("append");
    }
    assert_eq!(series.get_sample(0).expect("sample"), 0.0);
    assert_eq!(series.get_range(0, 2).expect("range"), MinMax { min: 5.0, max: 6.0 });
    assert!(matches!(
        series.get_range(0, 0),
        Err(sampleflow::Error::OutOfRange { .. })
    ));

    // Fill past two block boundaries so block 0 answers from its aggregate.
    for i in 3..(2 * BLOCK_SIZE as u64 + 5) {
        series.append(10.0 + (i % 7) as f64, i).expect("append");
    }
    assert_eq!(
        series.get_range(0, BLOCK_SIZE as u64 - 1).expect("block 0"),
        MinMax { min: 5.0, max: 16.0 }
    );
    assert_eq!(
        series.get_range(0, 2 * BLOCK_SIZE as u64 + 4).expect("all"),
        MinMax { min: 5.0, max: 16.0 }
    );
}

#[test]
fn block_of_only_placeholders_has_no_aggregate() {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), 2);
    let series = store.create_series("silent").expect("series");

    for i in 0..(BLOCK_SIZE as u64 + 3) {
        series.append(f64::NAN, i).expect("append");
    }
    series.append(-4.0, BLOCK_SIZE as u64 + 3).expect("append");

    assert_eq!(series.cache().block_range(0), Some(None));
    assert!(matches!(
        series.get_range(0, BLOCK_SIZE as u64 - 1),
        Err(sampleflow::Error::OutOfRange { .. })
    ));
    assert_eq!(
        series.get_range(0, BLOCK_SIZE as u64 + 3).expect("range"),
        MinMax::of(-4.0)
    );
}

#[test]
fn out_of_range_queries() {
    let dir = tempdir().expect("tempdir");
    let store = open(dir.path(), 2);
    let series = store.create_series("short").expect("series");
    series.append(1.0, 0).expect("append");

    assert!(matches!(
        series.get_sample(1),
        Err(sampleflow::Error::OutOfRange { index: 1, count: 1 })
    ));
    assert!(series.get_range(0, 1).is_err());
    assert!(series.get_range(1, 0).is_err());
    assert!(series.get_samples_buffer(0, 3).is_err());
}
