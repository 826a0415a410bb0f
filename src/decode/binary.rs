//! Sync-delimited fixed-layout binary frames.

use crate::core::{DecodeFault, Result};
use crate::decode::checksum::ChecksumKind;
use crate::decode::schema::{BinarySchema, ResolvedField};
use crate::decode::DecodeStep;

/// Locates and decodes `[sync][payload][checksum]` frames.
#[derive(Debug, Clone)]
pub struct BinaryFrameDecoder {
    sync: Vec<u8>,
    fields: Vec<ResolvedField>,
    checksum: ChecksumKind,
    payload_len: usize,
}

impl BinaryFrameDecoder {
    /// # Errors
    ///
    /// - `Error::InvalidSchema`: see [`BinarySchema::resolve`]
    pub fn new(schema: &BinarySchema) -> Result<Self> {
        let fields = schema.resolve()?;
        let payload_len = fields.iter().map(ResolvedField::end).max().unwrap_or(0);
        Ok(Self {
            sync: schema.sync.clone(),
            fields,
            checksum: schema.checksum,
            payload_len,
        })
    }

    pub fn frame_len(&self) -> usize {
        self.sync.len() + self.payload_len + self.checksum.width()
    }

    pub fn fields(&self) -> &[ResolvedField] {
        &self.fields
    }

    /// Scan `window` for the next frame.
    ///
    /// The checksum is verified here, so a returned `Frame` is safe to decode.
    /// After a checksum mismatch scanning resumes one byte past the rejected
    /// sync start, so a sync pattern inside the bad frame is still found.
    pub fn locate(&self, window: &[u8]) -> DecodeStep {
        let start = match find(window, &self.sync) {
            Some(start) => start,
            None => {
                // Keep a tail that could be the beginning of a split sync.
                let keep = self.sync.len() - 1;
                return DecodeStep::NeedMore {
                    consumed: window.len().saturating_sub(keep),
                    fault: DecodeFault::SyncNotFound,
                };
            }
        };

        let end = start + self.frame_len();
        if window.len() < end {
            return DecodeStep::NeedMore {
                consumed: start,
                fault: DecodeFault::Truncated,
            };
        }

        if self.checksum != ChecksumKind::None {
            let payload = self.payload(&window[start..end]);
            let stored_at = start + self.sync.len() + self.payload_len;
            let expected = self.checksum.read(&window[stored_at..end]);
            let actual = self.checksum.compute(payload);
            if expected != actual {
                return DecodeStep::Rejected {
                    consumed: start + 1,
                    fault: DecodeFault::ChecksumMismatch { expected, actual },
                };
            }
        }

        DecodeStep::Frame { start, end }
    }

    /// Payload bytes of a located frame.
    pub fn payload<'a>(&self, frame: &'a [u8]) -> &'a [u8] {
        let from = self.sync.len();
        &frame[from..from + self.payload_len]
    }

    /// Decode every field of a located frame into `out`, in schema order.
    pub fn decode_fields(&self, frame: &[u8], out: &mut Vec<f64>) {
        let payload = self.payload(frame);
        out.extend(self.fields.iter().map(|field| field.decode(payload)));
    }

    /// Build a valid frame from values; the inverse of `decode_fields`.
    pub fn encode(&self, values: &[f64]) -> Vec<u8> {
        let mut payload = vec![0u8; self.payload_len];
        for (field, value) in self.fields.iter().zip(values) {
            let bytes = crate::decode::schema::encode_value(field.field_type, field.order, *value);
            payload[field.offset..field.end()].copy_from_slice(&bytes);
        }
        let mut frame = self.sync.clone();
        frame.extend_from_slice(&payload);
        frame.extend(self.checksum.encode(self.checksum.compute(&payload)));
        frame
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|candidate| candidate == needle)
}
