//! Frame decoding: binary sync-delimited frames and delimited text lines.
//!
//! Decoders are pure functions over a byte window ([`FrameDecoder::locate`]
//! then [`FrameDecoder::decode_fields`]); [`FrameReader`] drives them against
//! an [`IngestConsumer`](crate::ingest::IngestConsumer).

pub mod binary;
pub mod checksum;
pub mod parallel;
pub mod reader;
pub mod schema;
pub mod text;

use crate::core::{DecodeFault, Result};

pub use binary::BinaryFrameDecoder;
pub use checksum::ChecksumKind;
pub use parallel::ParallelFieldDecoder;
pub use reader::{DecodeStats, FrameReader};
pub use schema::{
    decode_value, encode_value, BinarySchema, ByteOrder, FieldSpec, FieldType, FrameSchema,
    ResolvedField, TextSchema,
};
pub use text::TextLineDecoder;

/// Outcome of scanning a byte window.
///
/// Every `consumed` count is relative to the start of the window and may be
/// released from the ingest buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStep {
    /// A complete frame spans `window[start..end]`; release `end` bytes after decoding.
    Frame { start: usize, end: usize },
    /// No complete frame yet.
    NeedMore { consumed: usize, fault: DecodeFault },
    /// Bytes that can never form a frame.
    Rejected { consumed: usize, fault: DecodeFault },
    /// Bytes that carry no frame and no error (blank text lines).
    Skip { consumed: usize },
}

/// Schema-selected decoder.
#[derive(Debug, Clone)]
pub enum FrameDecoder {
    Binary(BinaryFrameDecoder),
    Text(TextLineDecoder),
}

impl FrameDecoder {
    /// # Errors
    ///
    /// - `Error::InvalidSchema`: the schema fails validation
    pub fn from_schema(schema: &FrameSchema) -> Result<Self> {
        Ok(match schema {
            FrameSchema::Binary(binary) => FrameDecoder::Binary(BinaryFrameDecoder::new(binary)?),
            FrameSchema::Text(text) => FrameDecoder::Text(TextLineDecoder::new(text)?),
        })
    }

    pub fn field_count(&self) -> usize {
        match self {
            FrameDecoder::Binary(decoder) => decoder.fields().len(),
            FrameDecoder::Text(decoder) => decoder.field_count(),
        }
    }

    /// Largest window worth peeking at once.
    pub fn window_hint(&self) -> usize {
        match self {
            FrameDecoder::Binary(decoder) => (decoder.frame_len() * 16).max(256),
            FrameDecoder::Text(decoder) => decoder.max_line(),
        }
    }

    pub fn locate(&self, window: &[u8]) -> DecodeStep {
        match self {
            FrameDecoder::Binary(decoder) => decoder.locate(window),
            FrameDecoder::Text(decoder) => decoder.locate(window),
        }
    }

    /// Decode a frame returned by [`locate`](Self::locate) into `out`.
    pub fn decode_fields(
        &self,
        frame: &[u8],
        out: &mut Vec<f64>,
    ) -> std::result::Result<(), DecodeFault> {
        match self {
            FrameDecoder::Binary(decoder) => {
                decoder.decode_fields(frame, out);
                Ok(())
            }
            FrameDecoder::Text(decoder) => decoder.decode_fields(frame, out),
        }
    }
}
