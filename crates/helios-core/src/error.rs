//! Error types for the Helios wire protocol
//!
//! Decoding and encoding never panic: every failure surfaces as one of the
//! typed errors below so the caller can log it and keep going.

use bytes::Bytes;
use thiserror::Error;

use crate::command::Opcode;

/// Why a telemetry frame could not be decoded
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameErrorKind {
    /// A second start marker appeared before the end marker
    #[error("start marker found before end of previous frame")]
    NestedStart,

    /// Payload contains a byte outside the ASCII range
    #[error("non-ASCII byte at offset {offset}")]
    NonAscii {
        /// Offset of the offending byte within the payload
        offset: usize,
    },

    /// A field did not parse as a decimal integer
    #[error("field `{key}` is not numeric: {text:?}")]
    InvalidField {
        /// Schema key of the field
        key: String,
        /// Text found at the field's byte range
        text: String,
    },
}

/// A malformed or undecodable telemetry frame
///
/// Carries the raw bytes so the caller can log them for diagnostics.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("malformed frame: {kind} (raw: {})", escape_raw(.raw))]
pub struct FrameError {
    /// What went wrong
    pub kind: FrameErrorKind,
    /// The offending bytes
    pub raw: Bytes,
}

impl FrameError {
    /// Create a new frame error over the given raw bytes
    pub fn new(kind: FrameErrorKind, raw: impl Into<Bytes>) -> Self {
        Self {
            kind,
            raw: raw.into(),
        }
    }
}

/// A command that cannot be represented on the wire
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EncodingError {
    /// Parameter value does not fit its fixed digit width
    #[error("{opcode} parameter {index} = {value} does not fit in {width} digit(s)")]
    OutOfRange {
        /// Command opcode
        opcode: Opcode,
        /// Zero-based parameter position
        index: usize,
        /// Rejected value
        value: u32,
        /// Digit width of the parameter slot
        width: usize,
    },

    /// Wrong number of parameters for the opcode
    #[error("{opcode} expects {expected} parameter(s), got {got}")]
    Arity {
        /// Command opcode
        opcode: Opcode,
        /// Number of parameters the opcode takes
        expected: usize,
        /// Number of parameters supplied
        got: usize,
    },

    /// Lighting command names an LED group other than 1 to 4
    #[error("LED group {0} is not in 1..=4")]
    InvalidLed(u8),

    /// First byte is not a known opcode
    #[error("unknown opcode 0x{0:02X}")]
    UnknownOpcode(u8),

    /// Command frame does not end with the terminator byte
    #[error("command frame is missing the 0x0D terminator")]
    MissingTerminator,

    /// Command frame body is not made of the expected digits
    #[error("malformed command frame: {0}")]
    Malformed(String),
}

/// An invalid field schema definition
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// Schema has no fields
    #[error("schema has no fields")]
    Empty,

    /// Field at the given position has an empty key
    #[error("field {0} has an empty key")]
    EmptyKey(usize),

    /// Field has zero width
    #[error("field `{0}` has zero width")]
    ZeroWidth(String),

    /// Key appears more than once
    #[error("duplicate field key `{0}`")]
    DuplicateKey(String),
}

fn escape_raw(raw: &Bytes) -> String {
    raw.escape_ascii().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_error_display_escapes_raw() {
        let err = FrameError::new(FrameErrorKind::NonAscii { offset: 1 }, &b"1\xff2"[..]);
        let text = err.to_string();
        assert!(text.contains("offset 1"));
        assert!(text.contains("\\xff"));
    }

    #[test]
    fn test_out_of_range_message() {
        let err = EncodingError::OutOfRange {
            opcode: Opcode::Lighting,
            index: 1,
            value: 100,
            width: 2,
        };
        assert!(err.to_string().contains("100"));
        assert!(err.to_string().contains("2 digit"));
    }
}
