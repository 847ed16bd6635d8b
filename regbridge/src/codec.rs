//! Line protocol spoken by the device.
//!
//! ```text
//! host -> device   GET\n              request all readable values
//! host -> device   <id>=<value>\n     set one writable slot
//! device -> host   v0,v1,...,vN-1\n   exactly N decimal fields
//! ```
//!
//! Any other inbound line is free-form diagnostic text.

use thiserror::Error;

/// Literal read request line (without delimiter).
pub const READ_REQUEST: &str = "GET";

/// Separator between fields of a reading frame.
pub const FIELD_SEPARATOR: char = ',';

/// Line delimiter.
pub const LINE_DELIMITER: u8 = b'\n';

/// Frame decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("field count mismatch: expected {expected}, got {actual}")]
    FieldCount { expected: usize, actual: usize },
}

/// A decoded reading frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingFrame {
    /// Field values in wire order.
    pub values: Vec<i64>,
    /// Indices of fields that failed to parse and were coerced to 0.
    pub coerced: Vec<usize>,
}

/// Classification of one inbound line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Blank line; ignored.
    Empty,
    /// Free-form text from the device.
    Diagnostic(String),
    /// A data frame with the expected field count.
    Reading(ReadingFrame),
}

/// Encode a write command line: `<slot_id>=<value>\n`.
pub fn encode_write_command(slot_id: &str, value: i64) -> Vec<u8> {
    format!("{}={}\n", slot_id, value).into_bytes()
}

/// Encode the read request line: `GET\n`.
pub fn encode_read_request() -> Vec<u8> {
    let mut line = READ_REQUEST.as_bytes().to_vec();
    line.push(LINE_DELIMITER);
    line
}

/// Decoder for inbound lines, configured with the exact field count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameCodec {
    expected_fields: usize,
}

impl FrameCodec {
    pub fn new(expected_fields: usize) -> Self {
        Self { expected_fields }
    }

    pub fn expected_fields(&self) -> usize {
        self.expected_fields
    }

    /// Classify and decode one line (delimiter optional).
    ///
    /// Unparsable fields decode as 0 and are reported in
    /// [`ReadingFrame::coerced`]; only a field count mismatch rejects the frame.
    pub fn decode_line(&self, line: &str) -> Result<Frame, DecodeError> {
        let text = line.trim();
        if text.is_empty() {
            return Ok(Frame::Empty);
        }

        if !text.contains(FIELD_SEPARATOR) {
            // A single-field layout has no separator to tell data from text,
            // so only a clean integer counts as data there.
            if self.expected_fields == 1 {
                if let Some(value) = parse_field(text) {
                    return Ok(Frame::Reading(ReadingFrame {
                        values: vec![value],
                        coerced: Vec::new(),
                    }));
                }
            }
            return Ok(Frame::Diagnostic(text.to_string()));
        }

        let fields: Vec<&str> = text.split(FIELD_SEPARATOR).collect();
        if fields.len() != self.expected_fields {
            return Err(DecodeError::FieldCount {
                expected: self.expected_fields,
                actual: fields.len(),
            });
        }

        let mut values = Vec::with_capacity(fields.len());
        let mut coerced = Vec::new();
        for (index, field) in fields.iter().enumerate() {
            match parse_field(field) {
                Some(value) => values.push(value),
                None => {
                    coerced.push(index);
                    values.push(0);
                }
            }
        }

        Ok(Frame::Reading(ReadingFrame { values, coerced }))
    }
}

/// Parse a (possibly signed) decimal field.
fn parse_field(field: &str) -> Option<i64> {
    field.trim().parse::<i64>().ok()
}
