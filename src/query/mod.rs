//! Query-side helpers: block aggregates, the reload cache and materialized
//! sample ranges.

mod buffer;
mod cache;
mod minmax;
mod window;

pub use buffer::SampleBuffer;
pub use cache::{CacheStats, QueryCache};
pub use minmax::MinMax;
pub use window::SampleWindow;
