//! Block-structured, append-only series storage with memory/disk tiering.
//!
//! A series is a sparse directory of fixed-size [`Block`]s. The writer fills
//! one block at a time; full blocks are flushed by a background
//! [`FlushPool`] once `flush_lag` newer blocks exist, and their memory is
//! released after the write is durable. Reads of flushed blocks reload them
//! into a bounded per-series cache.

pub mod block;
pub mod block_file;
mod config;
mod flush;
mod registry;
mod series;
mod storage;

pub use block::{Block, BlockData, BlockState, BLOCK_SIZE};
pub use block_file::BlockImage;
pub use config::StoreConfig;
pub use flush::{FlushPool, RetryPolicy};
pub use registry::SeriesStore;
pub use series::{Series, SeriesHandle, SeriesStats};
pub use storage::{BlockStorage, FsBlockStorage};
