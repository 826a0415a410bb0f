//! Delimiter-separated text lines.

use crate::core::{DecodeFault, Result};
use crate::decode::schema::TextSchema;
use crate::decode::DecodeStep;

/// Longest line accepted before the bytes are rejected as malformed.
pub const DEFAULT_MAX_LINE: usize = 4096;

#[derive(Debug, Clone)]
pub struct TextLineDecoder {
    delimiter: char,
    field_count: usize,
    max_line: usize,
}

impl TextLineDecoder {
    pub fn new(schema: &TextSchema) -> Result<Self> {
        schema.validate()?;
        Ok(Self {
            delimiter: schema.delimiter,
            field_count: schema.fields.len(),
            max_line: DEFAULT_MAX_LINE,
        })
    }

    pub fn with_max_line(mut self, max_line: usize) -> Self {
        self.max_line = max_line.max(2);
        self
    }

    pub fn max_line(&self) -> usize {
        self.max_line
    }

    pub fn field_count(&self) -> usize {
        self.field_count
    }

    /// Find the next line terminated by `\n`.
    pub fn locate(&self, window: &[u8]) -> DecodeStep {
        let newline = match window.iter().position(|b| *b == b'\n') {
            Some(pos) => pos,
            None if window.len() >= self.max_line => {
                return DecodeStep::Rejected {
                    consumed: window.len(),
                    fault: DecodeFault::MalformedLine,
                };
            }
            None => {
                return DecodeStep::NeedMore {
                    consumed: 0,
                    fault: DecodeFault::Truncated,
                };
            }
        };

        let line = trim_line(&window[..newline]);
        if line.iter().all(u8::is_ascii_whitespace) {
            return DecodeStep::Skip {
                consumed: newline + 1,
            };
        }
        DecodeStep::Frame {
            start: 0,
            end: newline + 1,
        }
    }

    /// Parse one located line into `out`.
    ///
    /// `nan` and `inf` tokens parse successfully; substitution happens in the
    /// store. Missing or unparseable tokens reject the whole line and leave
    /// `out` untouched. Extra trailing tokens are ignored.
    pub fn decode_fields(&self, frame: &[u8], out: &mut Vec<f64>) -> std::result::Result<(), DecodeFault> {
        let line = std::str::from_utf8(trim_line(frame)).map_err(|_| DecodeFault::MalformedLine)?;
        let mark = out.len();
        let mut tokens = line.split(self.delimiter);
        for _ in 0..self.field_count {
            let token = match tokens.next() {
                Some(token) => token.trim(),
                None => {
                    out.truncate(mark);
                    return Err(DecodeFault::MalformedLine);
                }
            };
            match token.parse::<f64>() {
                Ok(value) => out.push(value),
                Err(_) => {
                    out.truncate(mark);
                    return Err(DecodeFault::BadToken);
                }
            }
        }
        Ok(())
    }
}

fn trim_line(line: &[u8]) -> &[u8] {
    let mut end = line.len();
    while end > 0 && (line[end - 1] == b'\n' || line[end - 1] == b'\r') {
        end -= 1;
    }
    &line[..end]
}
