use thiserror::Error;

/// Why a chunk of bytes did not yield a frame.
///
/// `SyncNotFound` and `Truncated` only mean the decoder needs more input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeFault {
    #[error("sync pattern not found")]
    SyncNotFound,

    #[error("frame truncated")]
    Truncated,

    #[error("checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch { expected: u32, actual: u32 },

    #[error("malformed line")]
    MalformedLine,

    #[error("unparseable token")]
    BadToken,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("corrupt data: {0}")]
    Corrupt(&'static str),

    #[error("ingest buffer overflow")]
    BufferOverflow,

    #[error("ingest buffer closed")]
    Closed,

    #[error("storage write failed for block {block} after {attempts} attempts")]
    StorageWrite { block: u64, attempts: u32 },

    #[error("sample index {index} out of range (count {count})")]
    OutOfRange { index: u64, count: u64 },

    #[error("block {block} unavailable")]
    BlockUnavailable { block: u64 },

    #[error("invalid schema: {0}")]
    InvalidSchema(String),

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("series already exists: {0}")]
    SeriesExists(String),

    #[error("unknown series: {0}")]
    UnknownSeries(String),

    #[error("operation cancelled")]
    Cancelled,

    #[error("timed out waiting for in-flight flushes")]
    FlushTimeout,

    #[error("series disposed")]
    Disposed,
}

pub type Result<T> = std::result::Result<T, Error>;
