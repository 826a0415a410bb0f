/// Minimum and maximum over a run of samples.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MinMax {
    pub min: f64,
    pub max: f64,
}

impl MinMax {
    pub fn of(value: f64) -> Self {
        Self {
            min: value,
            max: value,
        }
    }

    /// `None` for an empty slice.
    pub fn from_slice(values: &[f64]) -> Option<Self> {
        let (first, rest) = values.split_first()?;
        let mut acc = Self::of(*first);
        for value in rest {
            acc.include(*value);
        }
        Some(acc)
    }

    pub fn include(&mut self, value: f64) {
        if value < self.min {
            self.min = value;
        }
        if value > self.max {
            self.max = value;
        }
    }

    pub fn merge(self, other: MinMax) -> MinMax {
        MinMax {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Fold an optional accumulator with another range.
    pub fn fold(acc: Option<MinMax>, next: MinMax) -> Option<MinMax> {
        Some(match acc {
            Some(acc) => acc.merge(next),
            None => next,
        })
    }
}
