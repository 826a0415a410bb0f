use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};

/// Series store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory holding one subdirectory of block files per series.
    pub root: PathBuf,

    /// Number of newer full blocks that must exist before a full block is
    /// scheduled for flush. Zero flushes blocks as soon as they fill.
    /// Default: 2
    pub flush_lag: u64,

    /// Background flush threads.
    /// Default: 2
    pub flush_threads: usize,

    /// Reloaded on-disk blocks kept resident per series.
    /// Default: 16
    pub read_cache_blocks: usize,

    /// Retries after the first failed write of a block.
    /// Default: 3
    pub flush_retries: u32,

    /// Backoff before the first retry; doubles on each further retry.
    /// Default: 10 ms
    pub retry_backoff_ms: u64,

    /// How long `dispose` waits for an in-progress flush.
    /// Default: 5 s
    pub dispose_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("sampleflow-data"),
            flush_lag: 2,
            flush_threads: 2,
            read_cache_blocks: 16,
            flush_retries: 3,
            retry_backoff_ms: 10,
            dispose_timeout_ms: 5_000,
        }
    }
}

impl StoreConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.root.as_os_str().is_empty() {
            return Err(Error::InvalidConfig("store root is empty".into()));
        }
        if self.flush_threads == 0 {
            return Err(Error::InvalidConfig("flush_threads must be >= 1".into()));
        }
        if self.read_cache_blocks == 0 {
            return Err(Error::InvalidConfig("read_cache_blocks must be >= 1".into()));
        }
        Ok(())
    }

    pub fn retry_backoff(&self) -> Duration {
        Duration::from_millis(self.retry_backoff_ms)
    }

    pub fn dispose_timeout(&self) -> Duration {
        Duration::from_millis(self.dispose_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_partial_json() {
        let config: StoreConfig =
            serde_json::from_str(r#"{"root": "/tmp/x", "flush_lag": 4}"#).unwrap();
        assert_eq!(config.flush_lag, 4);
        assert_eq!(config.flush_threads, 2);
        assert_eq!(config.dispose_timeout(), Duration::from_secs(5));
        config.validate().unwrap();
    }

    #[test]
    fn rejects_zero_threads() {
        let config = StoreConfig {
            flush_threads: 0,
            ..StoreConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }
}
