//! Source → ingest buffer → decoder → series store, on dedicated threads.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::core::{Clock, Error, QuantaClock, Result};
use crate::decode::{DecodeStats, FrameDecoder, FrameReader, FrameSchema};
use crate::ingest::{ByteSource, IngestBuffer, IngestConfig, IngestStats, PumpStats, SourcePump};
use crate::store::{SeriesHandle, SeriesStore, StoreConfig};

/// How long `disconnect` waits for a pump parked inside its source.
const PUMP_JOIN_TIMEOUT: Duration = Duration::from_millis(500);

fn default_decode_workers() -> usize {
    1
}

/// Everything needed to run one connection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub ingest: IngestConfig,

    pub schema: FrameSchema,

    #[serde(default)]
    pub store: StoreConfig,

    /// Threads decoding binary fields in parallel. 1 decodes inline.
    #[serde(default = "default_decode_workers")]
    pub decode_workers: usize,
}

impl PipelineConfig {
    pub fn new(schema: FrameSchema) -> Self {
        Self {
            ingest: IngestConfig::default(),
            schema,
            store: StoreConfig::default(),
            decode_workers: 1,
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn validate(&self) -> Result<()> {
        self.ingest.validate()?;
        self.schema.validate()?;
        self.store.validate()?;
        if self.decode_workers == 0 {
            return Err(Error::InvalidConfig("decode_workers must be >= 1".into()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineStats {
    pub pump: PumpStats,
    pub ingest: IngestStats,
    pub decode: DecodeStats,
    /// Frames whose values reached every series.
    pub frames_stored: u64,
    /// The pump was still blocked in its source at disconnect and was left
    /// to exit on its own; `pump` is empty then.
    pub pump_detached: bool,
}

struct DecoderExit {
    decode: DecodeStats,
    ingest: IngestStats,
    frames_stored: u64,
}

/// A running connection.
pub struct Pipeline {
    series: Vec<SeriesHandle>,
    pump: Option<SourcePump>,
    decoder: Option<JoinHandle<DecoderExit>>,
    cancel: Arc<AtomicBool>,
}

impl Pipeline {
    /// Start with a TSC-backed clock for sample timestamps.
    pub fn start<S>(config: &PipelineConfig, source: S, store: &SeriesStore) -> Result<Self>
    where
        S: ByteSource + 'static,
    {
        Self::start_with_clock(config, source, store, Arc::new(QuantaClock::new()))
    }

    /// Create one series per schema field, then spawn the producer pump and
    /// the decoder thread. Every field of a frame gets the same timestamp.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidConfig` / `Error::InvalidSchema`: bad configuration
    /// - `Error::SeriesExists`: a field name is already a series in `store`
    pub fn start_with_clock<S>(
        config: &PipelineConfig,
        source: S,
        store: &SeriesStore,
        clock: Arc<dyn Clock>,
    ) -> Result<Self>
    where
        S: ByteSource + 'static,
    {
        config.validate()?;
        let decoder = FrameDecoder::from_schema(&config.schema)?;
        let mut series = Vec::new();
        for name in config.schema.field_names() {
            match store.create_series(&name) {
                Ok(handle) => series.push(handle),
                Err(err) => {
                    for created in &series {
                        if let Err(cleanup) = store.dispose_series(created.name()) {
                            log::warn!("{}: rollback failed: {cleanup}", created.name());
                        }
                    }
                    return Err(err);
                }
            }
        }

        let (producer, consumer) = IngestBuffer::new(config.ingest.clone())?;
        let mut reader = FrameReader::new(consumer, decoder).with_workers(config.decode_workers)?;
        let pump = SourcePump::spawn(source, producer)?;

        let cancel = Arc::new(AtomicBool::new(false));
        let thread_cancel = Arc::clone(&cancel);
        let targets = series.clone();
        let decoder = thread::Builder::new()
            .name("frame-decode".to_string())
            .spawn(move || decode_loop(&mut reader, &targets, clock.as_ref(), &thread_cancel))?;

        log::info!("pipeline started with {} series", series.len());
        Ok(Self {
            series,
            pump: Some(pump),
            decoder: Some(decoder),
            cancel,
        })
    }

    pub fn series(&self) -> &[SeriesHandle] {
        &self.series
    }

    /// True while the decoder thread runs.
    pub fn is_running(&self) -> bool {
        self.decoder
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    /// Run until the source ends and every buffered frame is stored.
    pub fn wait(mut self) -> Result<PipelineStats> {
        self.finish(false)
    }

    /// Stop the producer, let the decoder finish its current frame, and
    /// join both threads. A pump blocked inside its source gets a short
    /// grace period and is then detached.
    pub fn disconnect(mut self) -> Result<PipelineStats> {
        self.finish(true)
    }

    fn finish(&mut self, cancel: bool) -> Result<PipelineStats> {
        let mut stats = PipelineStats::default();
        if cancel {
            self.cancel.store(true, Ordering::Release);
            if let Some(pump) = &self.pump {
                pump.cancel();
            }
        }
        // Decoder first: the pump may sit in a blocking read, and the
        // decoder exiting closes the ring under it.
        if let Some(decoder) = self.decoder.take() {
            let exit = decoder
                .join()
                .map_err(|_| Error::Corrupt("decoder thread panicked"))?;
            stats.decode = exit.decode;
            stats.ingest = exit.ingest;
            stats.frames_stored = exit.frames_stored;
        }
        if let Some(pump) = self.pump.take() {
            if cancel {
                match pump.join_timeout(PUMP_JOIN_TIMEOUT)? {
                    Some(pump) => stats.pump = pump,
                    None => stats.pump_detached = true,
                }
            } else {
                stats.pump = pump.join()?;
            }
        }
        stats.decode.substitutions = self.series.iter().map(|s| s.substitutions()).sum();
        log::info!(
            "pipeline stopped: {} frames stored, {} bytes skipped, {} checksum failures",
            stats.frames_stored,
            stats.decode.skipped_bytes,
            stats.decode.checksum_failures
        );
        Ok(stats)
    }
}

impl Drop for Pipeline {
    fn drop(&mut self) {
        if self.pump.is_some() || self.decoder.is_some() {
            let _ = self.finish(true);
        }
    }
}

fn decode_loop(
    reader: &mut FrameReader,
    series: &[SeriesHandle],
    clock: &dyn Clock,
    cancel: &AtomicBool,
) -> DecoderExit {
    let mut values = Vec::with_capacity(series.len());
    let mut frames_stored = 0u64;
    while !cancel.load(Ordering::Acquire) {
        values.clear();
        match reader.next_frame(&mut values) {
            Ok(true) => {}
            Ok(false) => continue,
            Err(Error::Closed) => break,
            Err(err) => {
                log::error!("decoder stopped: {err}");
                break;
            }
        }
        let timestamp = clock.now();
        let mut stored = true;
        for (target, value) in series.iter().zip(&values) {
            if let Err(err) = target.append(*value, timestamp) {
                log::error!("{}: append failed: {err}", target.name());
                stored = false;
            }
        }
        if stored {
            frames_stored += 1;
        }
        if series.iter().all(|s| s.is_disposed()) {
            log::info!("every series disposed, decoder stopping");
            break;
        }
    }
    DecoderExit {
        decode: reader.stats(),
        ingest: reader.consumer().stats(),
        frames_stored,
    }
}
