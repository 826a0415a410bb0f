//! Live sample ingestion: byte stream → frames → block-tiered series.
//!
//! - [`ingest`]: single-producer/single-consumer byte ring with backpressure
//! - [`decode`]: sync-delimited binary frames and delimited text lines
//! - [`store`]: append-only series of fixed-size blocks, flushed to disk in
//!   the background and reloaded on demand
//! - [`query`]: cached block aggregates and materialized sample ranges
//! - [`pipeline`]: the threads wiring the above together for one connection

pub mod core;
pub mod decode;
pub mod ingest;
pub mod pipeline;
pub mod query;
pub mod store;

pub use crate::core::{Error, Result};
pub use pipeline::{Pipeline, PipelineConfig, PipelineStats};
pub use store::{SeriesHandle, SeriesStore, StoreConfig, BLOCK_SIZE};
