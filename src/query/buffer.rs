use crate::query::MinMax;

/// Samples `first..first + len` of one series, materialized.
#[derive(Debug, Clone, PartialEq)]
pub struct SampleBuffer {
    first: u64,
    values: Vec<f64>,
    timestamps: Vec<u64>,
}

impl SampleBuffer {
    pub(crate) fn with_capacity(first: u64, capacity: usize) -> Self {
        Self {
            first,
            values: Vec::with_capacity(capacity),
            timestamps: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn extend(&mut self, values: &[f64], timestamps: &[u64]) {
        self.values.extend_from_slice(values);
        self.timestamps.extend_from_slice(timestamps);
    }

    pub fn first_index(&self) -> u64 {
        self.first
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn timestamps(&self) -> &[u64] {
        &self.timestamps
    }

    /// Value at a series sample index.
    pub fn get(&self, index: u64) -> Option<f64> {
        let offset = index.checked_sub(self.first)?;
        self.values.get(offset as usize).copied()
    }

    /// `(sample index, timestamp, value)` triples.
    pub fn iter(&self) -> impl Iterator<Item = (u64, u64, f64)> + '_ {
        self.values
            .iter()
            .zip(&self.timestamps)
            .enumerate()
            .map(move |(i, (value, ts))| (self.first + i as u64, *ts, *value))
    }

    pub fn min_max(&self) -> Option<MinMax> {
        MinMax::from_slice(&self.values)
    }
}
