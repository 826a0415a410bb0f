use std::time::{SystemTime, UNIX_EPOCH};

/// A source of sample timestamps.
///
/// The pipeline stamps every decoded frame once, so all fields of a frame
/// share the same timestamp.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current timestamp in nanoseconds since the UNIX epoch.
    fn now(&self) -> u64;
}

/// A clock that uses `std::time::SystemTime`.
///
/// Susceptible to NTP adjustments. Returns 0 if the system time is before
/// the UNIX epoch.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(0)
    }
}

/// A clock that uses the CPU's Time-Stamp Counter (TSC) via the `quanta` crate.
///
/// Anchors to `SystemTime` at construction and then advances with TSC ticks,
/// so timestamps never move backwards within a session.
#[derive(Debug, Clone)]
pub struct QuantaClock {
    clock: quanta::Clock,
    start_wall_ns: u64,
    start_instant: quanta::Instant,
}

impl Default for QuantaClock {
    fn default() -> Self {
        let clock = quanta::Clock::new();
        let start_instant = clock.now();
        Self {
            clock,
            start_wall_ns: SystemClock.now(),
            start_instant,
        }
    }
}

impl QuantaClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for QuantaClock {
    fn now(&self) -> u64 {
        let delta = self.clock.now().duration_since(self.start_instant);
        self.start_wall_ns + delta.as_nanos() as u64
    }
}

/// Deterministic clock for tests and replays: each call advances by `step_ns`.
#[derive(Debug)]
pub struct StepClock {
    next: std::sync::atomic::AtomicU64,
    step_ns: u64,
}

impl StepClock {
    pub fn new(start_ns: u64, step_ns: u64) -> Self {
        Self {
            next: std::sync::atomic::AtomicU64::new(start_ns),
            step_ns,
        }
    }
}

impl Clock for StepClock {
    fn now(&self) -> u64 {
        self.next
            .fetch_add(self.step_ns, std::sync::atomic::Ordering::Relaxed)
    }
}
