//! Ingestion buffer configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Stall interval used to count growth stalls when blocking has no timeout.
pub(crate) const DEFAULT_STALL_INTERVAL: Duration = Duration::from_millis(50);

/// What `append` does when the buffer has no room for the incoming bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OverflowPolicy {
    /// Suspend the producer until the consumer frees space.
    ///
    /// With a timeout, an append that cannot make progress in time fails with
    /// `Error::BufferOverflow` and the unwritten remainder is discarded.
    Block {
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    /// Overwrite the oldest unread bytes.
    Overwrite,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        OverflowPolicy::Block {
            timeout_ms: Some(1000),
        }
    }
}

/// Capacity growth under the blocking policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GrowthConfig {
    /// Hard upper bound on the buffer capacity in bytes.
    pub max_capacity: usize,
    /// Number of timed-out waits before the buffer doubles.
    pub after_stalls: u32,
}

impl Default for GrowthConfig {
    fn default() -> Self {
        Self {
            max_capacity: 64 * 1024 * 1024,
            after_stalls: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestConfig {
    /// Initial capacity in bytes.
    /// Default: 1 MB
    pub capacity: usize,

    #[serde(default)]
    pub policy: OverflowPolicy,

    /// Growth is disabled when `None`.
    #[serde(default)]
    pub growth: Option<GrowthConfig>,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            capacity: 1024 * 1024,
            policy: OverflowPolicy::default(),
            growth: None,
        }
    }
}

impl IngestConfig {
    pub fn validate(&self) -> Result<()> {
        if self.capacity == 0 {
            return Err(Error::InvalidConfig("ingest capacity must be non-zero".into()));
        }
        if let Some(growth) = &self.growth {
            if matches!(self.policy, OverflowPolicy::Overwrite) {
                return Err(Error::InvalidConfig(
                    "growth only applies to the blocking policy".into(),
                ));
            }
            if growth.max_capacity < self.capacity {
                return Err(Error::InvalidConfig(
                    "growth max_capacity is below the initial capacity".into(),
                ));
            }
            if growth.after_stalls == 0 {
                return Err(Error::InvalidConfig("growth after_stalls must be >= 1".into()));
            }
        }
        Ok(())
    }

    /// How long one blocking wait lasts before it counts as a stall.
    pub(crate) fn stall_interval(&self) -> Option<Duration> {
        match self.policy {
            OverflowPolicy::Block { timeout_ms: Some(ms) } => Some(Duration::from_millis(ms)),
            OverflowPolicy::Block { timeout_ms: None } if self.growth.is_some() => {
                Some(DEFAULT_STALL_INTERVAL)
            }
            _ => None,
        }
    }
}
