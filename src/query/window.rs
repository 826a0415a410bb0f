/// An inclusive sample index range picked for rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleWindow {
    pub first: u64,
    pub last: u64,
}

impl SampleWindow {
    /// Window of `duration * zoom` samples ending at `end`, clamped to the
    /// `count` samples written so far.
    ///
    /// Returns `None` when fewer than two samples fall inside.
    pub fn ending_at(end: u64, duration: u64, zoom: f64, count: u64) -> Option<Self> {
        if count < 2 || !zoom.is_finite() || zoom <= 0.0 {
            return None;
        }
        let width = (duration as f64 * zoom).round() as u64;
        if width < 2 {
            return None;
        }
        let last = end.min(count - 1);
        let first = last.saturating_sub(width - 1);
        let window = Self { first, last };
        (window.len() >= 2).then_some(window)
    }

    pub fn len(&self) -> u64 {
        self.last - self.first + 1
    }
}
