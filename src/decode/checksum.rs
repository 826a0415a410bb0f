//! Frame checksums.
//!
//! Checksums cover the payload bytes between the sync pattern and the
//! checksum itself. Multi-byte checksums are stored little-endian.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumKind {
    #[default]
    None,
    /// XOR of every payload byte.
    Xor8,
    /// Payload bytes summed modulo 256.
    Sum8,
    /// Little-endian 16-bit words summed modulo 65536; an odd trailing byte
    /// counts as a low byte.
    Sum16Le,
    /// CRC-32 (IEEE) of the payload.
    Crc32,
}

impl ChecksumKind {
    pub fn width(self) -> usize {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Xor8 | ChecksumKind::Sum8 => 1,
            ChecksumKind::Sum16Le => 2,
            ChecksumKind::Crc32 => 4,
        }
    }

    pub fn compute(self, payload: &[u8]) -> u32 {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Xor8 => payload.iter().fold(0u8, |acc, b| acc ^ b) as u32,
            ChecksumKind::Sum8 => payload.iter().fold(0u8, |acc, b| acc.wrapping_add(*b)) as u32,
            ChecksumKind::Sum16Le => {
                let mut sum = 0u16;
                for chunk in payload.chunks(2) {
                    let word = match chunk {
                        [lo, hi] => u16::from_le_bytes([*lo, *hi]),
                        [lo] => *lo as u16,
                        _ => 0,
                    };
                    sum = sum.wrapping_add(word);
                }
                sum as u32
            }
            ChecksumKind::Crc32 => {
                let mut hasher = crc32fast::Hasher::new();
                hasher.update(payload);
                hasher.finalize()
            }
        }
    }

    /// Read the stored checksum. `bytes` must hold `self.width()` bytes.
    pub fn read(self, bytes: &[u8]) -> u32 {
        match self {
            ChecksumKind::None => 0,
            ChecksumKind::Xor8 | ChecksumKind::Sum8 => bytes[0] as u32,
            ChecksumKind::Sum16Le => u16::from_le_bytes([bytes[0], bytes[1]]) as u32,
            ChecksumKind::Crc32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        }
    }

    /// Encode a checksum value for appending to a frame.
    pub fn encode(self, value: u32) -> Vec<u8> {
        match self {
            ChecksumKind::None => Vec::new(),
            ChecksumKind::Xor8 | ChecksumKind::Sum8 => vec![value as u8],
            ChecksumKind::Sum16Le => (value as u16).to_le_bytes().to_vec(),
            ChecksumKind::Crc32 => value.to_le_bytes().to_vec(),
        }
    }
}
