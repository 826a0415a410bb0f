//! On-disk block layout and naming.
//!
//! ```text
//! 0   magic       u32  "BLK0"
//! 4   version     u32
//! 8   block index u64
//! 16  count       u32  samples in the block
//! 20  crc32       u32  over the body
//! 24  valid from  u32  first slot holding a real sample
//! 28  reserved    [u8; 4]
//! 32  values      count x f64 LE
//!     timestamps  count x u64 LE
//! ```

use std::path::Path;

use crate::core::{Error, Result};

pub const BLOCK_MAGIC: u32 = u32::from_le_bytes(*b"BLK0");
pub const BLOCK_VERSION: u32 = 1;
pub const BLOCK_HEADER_SIZE: usize = 32;

/// Contents of one block file.
#[derive(Debug, Clone, PartialEq)]
pub struct BlockImage {
    pub values: Vec<f64>,
    pub timestamps: Vec<u64>,
    /// Slots before this one are placeholders written before the series saw
    /// its first finite value; they take no part in min/max.
    pub valid_from: usize,
}

impl BlockImage {
    pub fn new(values: Vec<f64>, timestamps: Vec<u64>) -> Self {
        Self {
            values,
            timestamps,
            valid_from: 0,
        }
    }

    pub fn with_valid_from(mut self, valid_from: usize) -> Self {
        self.valid_from = valid_from;
        self
    }

    pub fn valid_values(&self) -> &[f64] {
        &self.values[self.valid_from.min(self.values.len())..]
    }
}

/// Block filename from its index (e.g. "000000042.blk").
pub fn block_filename(index: u64) -> String {
    format!("{:09}.blk", index)
}

/// Temporary filename used while a block is being written.
pub fn block_temp_filename(index: u64) -> String {
    format!("{:09}.blk.tmp", index)
}

/// Block index from a published block filename.
pub fn parse_block_filename(name: &str) -> Option<u64> {
    let base = name.strip_suffix(".blk")?;
    if base.len() != 9 || !base.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    base.parse::<u64>().ok()
}

/// Directory name for a series. Bytes outside `[A-Za-z0-9_-]` are
/// percent-escaped so distinct names never share a directory.
pub fn series_dir_name(series: &str) -> String {
    let mut out = String::with_capacity(series.len());
    for byte in series.bytes() {
        if byte.is_ascii_alphanumeric() || byte == b'-' || byte == b'_' {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{byte:02x}"));
        }
    }
    if out.is_empty() {
        out.push('%');
    }
    out
}

/// Sorted indices of the published block files in `dir`.
pub fn discover_blocks(dir: &Path) -> Result<Vec<u64>> {
    let mut blocks = Vec::new();
    if !dir.exists() {
        return Ok(blocks);
    }
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_file() {
            continue;
        }
        if let Some(index) = entry.file_name().to_str().and_then(parse_block_filename) {
            blocks.push(index);
        }
    }
    blocks.sort_unstable();
    Ok(blocks)
}

pub fn encode_block(index: u64, image: &BlockImage) -> Vec<u8> {
    let count = image.values.len().min(image.timestamps.len());
    let mut body = Vec::with_capacity(count * 16);
    for value in &image.values[..count] {
        body.extend_from_slice(&value.to_le_bytes());
    }
    for ts in &image.timestamps[..count] {
        body.extend_from_slice(&ts.to_le_bytes());
    }

    let mut out = Vec::with_capacity(BLOCK_HEADER_SIZE + body.len());
    out.extend_from_slice(&BLOCK_MAGIC.to_le_bytes());
    out.extend_from_slice(&BLOCK_VERSION.to_le_bytes());
    out.extend_from_slice(&index.to_le_bytes());
    out.extend_from_slice(&(count as u32).to_le_bytes());
    out.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    out.extend_from_slice(&(image.valid_from.min(count) as u32).to_le_bytes());
    out.extend_from_slice(&[0u8; 4]);
    out.extend_from_slice(&body);
    out
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(raw)
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(raw)
}

/// Validate and decode a block file image.
///
/// # Errors
///
/// - `Error::Corrupt`: bad magic or version, wrong block index, length
///   mismatch, checksum mismatch, first valid slot past the end
pub fn decode_block(bytes: &[u8], expected_index: u64) -> Result<BlockImage> {
    if bytes.len() < BLOCK_HEADER_SIZE {
        return Err(Error::Corrupt("block file truncated"));
    }
    if read_u32(bytes, 0) != BLOCK_MAGIC {
        return Err(Error::Corrupt("block magic mismatch"));
    }
    if read_u32(bytes, 4) != BLOCK_VERSION {
        return Err(Error::Corrupt("block version mismatch"));
    }
    if read_u64(bytes, 8) != expected_index {
        return Err(Error::Corrupt("block index mismatch"));
    }
    let count = read_u32(bytes, 16) as usize;
    let body = &bytes[BLOCK_HEADER_SIZE..];
    if body.len() != count * 16 {
        return Err(Error::Corrupt("block length mismatch"));
    }
    if crc32fast::hash(body) != read_u32(bytes, 20) {
        return Err(Error::Corrupt("block checksum mismatch"));
    }
    let valid_from = read_u32(bytes, 24) as usize;
    if valid_from > count {
        return Err(Error::Corrupt("block first valid slot out of range"));
    }

    let values = (0..count)
        .map(|i| f64::from_bits(read_u64(body, i * 8)))
        .collect();
    let timestamps = (0..count)
        .map(|i| read_u64(body, count * 8 + i * 8))
        .collect();
    Ok(BlockImage::new(values, timestamps).with_valid_from(valid_from))
}
