//! Byte-level ingestion with backpressure.
//!
//! The transport layer hands raw bytes to an [`IngestProducer`] (usually via a
//! [`SourcePump`] thread); the frame decoder drains the matching
//! [`IngestConsumer`].

mod config;
mod ring;
mod source;

pub use config::{GrowthConfig, IngestConfig, OverflowPolicy};
pub use ring::{IngestBuffer, IngestConsumer, IngestProducer, IngestStats};
pub use source::{ByteSource, ChannelSource, PumpStats, ReadSource, SourcePump};
