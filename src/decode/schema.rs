//! Frame schemas: field types, byte order, checksums, binary and text layouts.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::core::{Error, Result};
use crate::decode::checksum::ChecksumKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldType {
    U8,
    I8,
    U16,
    I16,
    U32,
    I32,
    U64,
    I64,
    F32,
    F64,
}

impl FieldType {
    pub fn width(self) -> usize {
        match self {
            FieldType::U8 | FieldType::I8 => 1,
            FieldType::U16 | FieldType::I16 => 2,
            FieldType::U32 | FieldType::I32 | FieldType::F32 => 4,
            FieldType::U64 | FieldType::I64 | FieldType::F64 => 8,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ByteOrder {
    /// Least significant byte first.
    #[default]
    #[serde(alias = "lsb")]
    Little,
    /// Most significant byte first.
    #[serde(alias = "msb")]
    Big,
}

/// One field of a binary frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    pub name: String,

    #[serde(rename = "type")]
    pub field_type: FieldType,

    #[serde(default)]
    pub order: ByteOrder,

    /// Byte offset counted from the end of the sync pattern. When absent the
    /// field directly follows the previous one.
    #[serde(default)]
    pub offset: Option<usize>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, field_type: FieldType, order: ByteOrder) -> Self {
        Self {
            name: name.into(),
            field_type,
            order,
            offset: None,
        }
    }

    pub fn at(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// A field with its offset resolved against the frame payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedField {
    pub offset: usize,
    pub field_type: FieldType,
    pub order: ByteOrder,
}

impl ResolvedField {
    pub fn end(&self) -> usize {
        self.offset + self.field_type.width()
    }

    /// Decode this field from a payload that covers `self.end()` bytes.
    pub fn decode(&self, payload: &[u8]) -> f64 {
        decode_value(
            self.field_type,
            self.order,
            &payload[self.offset..self.end()],
        )
    }
}

macro_rules! read_int {
    ($ty:ty, $n:expr, $order:expr, $bytes:expr) => {{
        let mut raw = [0u8; $n];
        raw.copy_from_slice(&$bytes[..$n]);
        match $order {
            ByteOrder::Little => <$ty>::from_le_bytes(raw),
            ByteOrder::Big => <$ty>::from_be_bytes(raw),
        }
    }};
}

/// Decode one value. `bytes` must hold at least `field_type.width()` bytes.
///
/// 64-bit integers beyond 2^53 lose precision in the `f64` sample type.
pub fn decode_value(field_type: FieldType, order: ByteOrder, bytes: &[u8]) -> f64 {
    match field_type {
        FieldType::U8 => bytes[0] as f64,
        FieldType::I8 => bytes[0] as i8 as f64,
        FieldType::U16 => read_int!(u16, 2, order, bytes) as f64,
        FieldType::I16 => read_int!(i16, 2, order, bytes) as f64,
        FieldType::U32 => read_int!(u32, 4, order, bytes) as f64,
        FieldType::I32 => read_int!(i32, 4, order, bytes) as f64,
        FieldType::U64 => read_int!(u64, 8, order, bytes) as f64,
        FieldType::I64 => read_int!(i64, 8, order, bytes) as f64,
        FieldType::F32 => read_int!(f32, 4, order, bytes) as f64,
        FieldType::F64 => read_int!(f64, 8, order, bytes),
    }
}

/// Encode a value the way `decode_value` reads it. Used by tests and replay tools.
pub fn encode_value(field_type: FieldType, order: ByteOrder, value: f64) -> Vec<u8> {
    macro_rules! bytes {
        ($v:expr) => {
            match order {
                ByteOrder::Little => $v.to_le_bytes().to_vec(),
                ByteOrder::Big => $v.to_be_bytes().to_vec(),
            }
        };
    }
    match field_type {
        FieldType::U8 => vec![value as u8],
        FieldType::I8 => vec![value as i8 as u8],
        FieldType::U16 => bytes!(value as u16),
        FieldType::I16 => bytes!(value as i16),
        FieldType::U32 => bytes!(value as u32),
        FieldType::I32 => bytes!(value as i32),
        FieldType::U64 => bytes!(value as u64),
        FieldType::I64 => bytes!(value as i64),
        FieldType::F32 => bytes!(value as f32),
        FieldType::F64 => bytes!(value),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BinarySchema {
    pub sync: Vec<u8>,
    pub fields: Vec<FieldSpec>,
    #[serde(default)]
    pub checksum: ChecksumKind,
}

impl BinarySchema {
    /// Resolve field offsets and validate the layout.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidSchema`: empty sync or field list, duplicate names,
    ///   overlapping fields
    pub fn resolve(&self) -> Result<Vec<ResolvedField>> {
        if self.sync.is_empty() {
            return Err(Error::InvalidSchema("sync pattern is empty".into()));
        }
        if self.fields.is_empty() {
            return Err(Error::InvalidSchema("binary schema has no fields".into()));
        }
        check_unique(self.fields.iter().map(|f| f.name.as_str()))?;

        let mut cursor = 0usize;
        let mut resolved = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let offset = field.offset.unwrap_or(cursor);
            let r = ResolvedField {
                offset,
                field_type: field.field_type,
                order: field.order,
            };
            cursor = r.end();
            resolved.push(r);
        }

        let mut spans: Vec<(usize, usize)> = resolved.iter().map(|f| (f.offset, f.end())).collect();
        spans.sort_unstable();
        for pair in spans.windows(2) {
            if pair[1].0 < pair[0].1 {
                return Err(Error::InvalidSchema(format!(
                    "fields overlap at bytes {}..{}",
                    pair[1].0, pair[0].1
                )));
            }
        }
        Ok(resolved)
    }

    /// Bytes between the sync pattern and the checksum.
    pub fn payload_len(&self) -> Result<usize> {
        Ok(self
            .resolve()?
            .iter()
            .map(ResolvedField::end)
            .max()
            .unwrap_or(0))
    }

    pub fn frame_len(&self) -> Result<usize> {
        Ok(self.sync.len() + self.payload_len()? + self.checksum.width())
    }
}

fn default_delimiter() -> char {
    ','
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextSchema {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Field names in column order.
    pub fields: Vec<String>,
}

impl TextSchema {
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(Error::InvalidSchema("text schema has no fields".into()));
        }
        if self.delimiter == '\n' || self.delimiter == '\r' {
            return Err(Error::InvalidSchema("delimiter cannot be a line break".into()));
        }
        check_unique(self.fields.iter().map(String::as_str))
    }
}

/// Frame layout of one connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum FrameSchema {
    Binary(BinarySchema),
    Text(TextSchema),
}

impl FrameSchema {
    pub fn validate(&self) -> Result<()> {
        match self {
            FrameSchema::Binary(schema) => schema.resolve().map(|_| ()),
            FrameSchema::Text(schema) => schema.validate(),
        }
    }

    /// Field names in the order values are produced.
    pub fn field_names(&self) -> Vec<String> {
        match self {
            FrameSchema::Binary(schema) => schema.fields.iter().map(|f| f.name.clone()).collect(),
            FrameSchema::Text(schema) => schema.fields.clone(),
        }
    }
}

fn check_unique<'a>(names: impl Iterator<Item = &'a str>) -> Result<()> {
    let mut seen = HashSet::new();
    for name in names {
        if name.is_empty() {
            return Err(Error::InvalidSchema("field name is empty".into()));
        }
        if !seen.insert(name) {
            return Err(Error::InvalidSchema(format!("duplicate field name: {name}")));
        }
    }
    Ok(())
}
