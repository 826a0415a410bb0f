use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use crate::core::{Error, Result};
use crate::query::MinMax;
use crate::store::flush::FlushPool;
use crate::store::series::{Series, SeriesHandle, SeriesSettings, SeriesStats};
use crate::store::storage::{BlockStorage, FsBlockStorage};
use crate::store::StoreConfig;

/// Registry of series sharing one storage root and one flush pool.
pub struct SeriesStore {
    config: StoreConfig,
    storage: Arc<dyn BlockStorage>,
    pool: Mutex<FlushPool>,
    series: RwLock<HashMap<String, SeriesHandle>>,
}

impl SeriesStore {
    /// Open a store on the filesystem under `config.root`.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidConfig`: see [`StoreConfig::validate`]
    /// - `Error::Io`: the root could not be created
    pub fn open(config: StoreConfig) -> Result<Self> {
        config.validate()?;
        let storage = Arc::new(FsBlockStorage::new(&config.root)?);
        Self::with_storage(config, storage)
    }

    /// Open a store on a custom block storage.
    pub fn with_storage(config: StoreConfig, storage: Arc<dyn BlockStorage>) -> Result<Self> {
        config.validate()?;
        let pool = FlushPool::new(config.flush_threads)?;
        log::info!(
            "series store at {} (lag {}, {} flush threads)",
            config.root.display(),
            config.flush_lag,
            config.flush_threads
        );
        Ok(Self {
            config,
            storage,
            pool: Mutex::new(pool),
            series: RwLock::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Create an empty series. Block files left under the same name by an
    /// earlier store are deleted.
    ///
    /// # Errors
    ///
    /// - `Error::SeriesExists`: the name is taken in this store
    pub fn create_series(&self, name: &str) -> Result<SeriesHandle> {
        let mut registry = self.registry_mut()?;
        if registry.contains_key(name) {
            return Err(Error::SeriesExists(name.to_string()));
        }
        self.storage.remove_series(name)?;
        let series = Series::new(
            name.to_string(),
            SeriesSettings::from(&self.config),
            Arc::clone(&self.storage),
            self.flush_queue()?,
            self.config.read_cache_blocks,
        );
        registry.insert(name.to_string(), Arc::clone(&series));
        log::debug!("created series {name}");
        Ok(series)
    }

    /// Rebuild a series from the block files a previous store left under
    /// the same root.
    pub fn recover_series(&self, name: &str) -> Result<SeriesHandle> {
        let mut registry = self.registry_mut()?;
        if registry.contains_key(name) {
            return Err(Error::SeriesExists(name.to_string()));
        }
        let series = Series::recover(
            name.to_string(),
            SeriesSettings::from(&self.config),
            Arc::clone(&self.storage),
            self.flush_queue()?,
            self.config.read_cache_blocks,
        )?;
        registry.insert(name.to_string(), Arc::clone(&series));
        Ok(series)
    }

    pub fn series(&self, name: &str) -> Result<SeriesHandle> {
        self.registry()?
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownSeries(name.to_string()))
    }

    /// Sorted series names.
    pub fn names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.registry()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Dispose a series and forget it.
    pub fn dispose_series(&self, name: &str) -> Result<()> {
        let series = self
            .registry_mut()?
            .remove(name)
            .ok_or_else(|| Error::UnknownSeries(name.to_string()))?;
        series.dispose()
    }

    /// Combined min/max of several series over the same index span.
    ///
    /// # Errors
    ///
    /// - `Error::OutOfRange`: a series has fewer than `last + 1` samples, or
    ///   `handles` is empty
    pub fn range_across(&self, handles: &[SeriesHandle], first: u64, last: u64) -> Result<MinMax> {
        let mut acc = None;
        for series in handles {
            acc = MinMax::fold(acc, series.get_range(first, last)?);
        }
        acc.ok_or(Error::OutOfRange {
            index: first,
            count: 0,
        })
    }

    pub fn stats(&self) -> Result<Vec<(String, SeriesStats)>> {
        let mut stats: Vec<(String, SeriesStats)> = self
            .registry()?
            .iter()
            .map(|(name, series)| (name.clone(), series.stats()))
            .collect();
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(stats)
    }

    /// Interrupt every blocking wait on every series. Used on disconnect.
    pub fn cancel_waits(&self) -> Result<()> {
        for series in self.registry()?.values() {
            series.cancel_waits();
        }
        Ok(())
    }

    /// Wait for every scheduled flush of every series. `Ok(false)` on timeout.
    pub fn wait_idle(&self, timeout: Duration) -> Result<bool> {
        let handles: Vec<SeriesHandle> = self.registry()?.values().cloned().collect();
        for series in handles {
            if !series.wait_idle(timeout)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Flush every full block of every series, ignoring the lag, and wait
    /// for the writes. `Ok(false)` on timeout.
    pub fn flush_all(&self, timeout: Duration) -> Result<bool> {
        let handles: Vec<SeriesHandle> = self.registry()?.values().cloned().collect();
        for series in handles {
            if !series.flush_all(timeout)? {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Stop the flush pool. Jobs still queued are returned to their series,
    /// whose blocks stay in memory. Block files are kept for recovery.
    pub fn close(&self) -> Result<()> {
        self.pool
            .lock()
            .map_err(|_| Error::Corrupt("flush pool lock poisoned"))?
            .shutdown();
        Ok(())
    }

    fn flush_queue(&self) -> Result<crate::store::flush::FlushQueue> {
        Ok(self
            .pool
            .lock()
            .map_err(|_| Error::Corrupt("flush pool lock poisoned"))?
            .queue())
    }

    fn registry(&self) -> Result<std::sync::RwLockReadGuard<'_, HashMap<String, SeriesHandle>>> {
        self.series
            .read()
            .map_err(|_| Error::Corrupt("series registry lock poisoned"))
    }

    fn registry_mut(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, HashMap<String, SeriesHandle>>> {
        self.series
            .write()
            .map_err(|_| Error::Corrupt("series registry lock poisoned"))
    }
}
