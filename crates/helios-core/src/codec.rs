//! Frame codec
//!
//! Telemetry arrives as ASCII text framed by the two-character markers
//! `"FA"` and `"0D"`:
//!
//! ```text
//! "FA" | payload (fixed width from the schema) | "0D"
//! ```
//!
//! There is no length field, so frame boundaries are found by scanning for
//! the markers. Commands go the other way as an opcode byte, zero-padded
//! ASCII decimal parameters, and a raw `0x0D` terminator byte.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tracing::{debug, trace, warn};

use crate::command::Opcode;
use crate::error::{EncodingError, FrameError, FrameErrorKind};
use crate::record::TelemetryRecord;
use crate::schema::FieldSchema;

/// Telemetry frame start marker (ASCII text, not the byte 0xFA)
pub const START_MARKER: &[u8] = b"FA";

/// Telemetry frame end marker (ASCII text, not the byte 0x0D)
pub const END_MARKER: &[u8] = b"0D";

/// Terminator byte of outbound command frames
pub const END_FRAME: u8 = 0x0D;

/// Upper bound on bytes held while waiting for a frame to complete
pub const MAX_BUFFERED_BYTES: usize = 4096;

/// Accumulates raw serial bytes and extracts one frame payload at a time
///
/// Bytes before a start marker are discarded. A start marker without a
/// matching end marker stays buffered until more bytes arrive. Only the
/// first complete frame is extracted per call; anything after it remains
/// buffered for the next call.
#[derive(Debug)]
pub struct FrameScanner {
    buffer: BytesMut,
    max_buffered: usize,
}

impl FrameScanner {
    /// Create a scanner with the default buffer bound
    pub fn new() -> Self {
        Self::with_capacity(MAX_BUFFERED_BYTES)
    }

    /// Create a scanner that holds at most `max_buffered` bytes
    pub fn with_capacity(max_buffered: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(max_buffered.min(1024)),
            max_buffered: max_buffered.max(START_MARKER.len() + END_MARKER.len()),
        }
    }

    /// Append freshly read bytes
    pub fn extend(&mut self, data: &[u8]) {
        self.buffer.extend_from_slice(data);

        if self.buffer.len() > self.max_buffered {
            let overflow = self.buffer.len() - self.max_buffered;
            warn!(discarded = overflow, "Frame buffer full, dropping oldest bytes");
            self.buffer.advance(overflow);
        }
    }

    /// Bytes currently buffered
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether nothing is buffered
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Drop everything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Extract the payload of the next complete frame
    ///
    /// Returns `None` when no complete frame is buffered (either no start
    /// marker, or a partial frame awaiting more bytes). A start marker
    /// followed by another start marker before any end marker yields a
    /// [`FrameError`] for the garbled leading part; scanning resumes at the
    /// second marker on the next call.
    pub fn next_frame(&mut self) -> Option<Result<Bytes, FrameError>> {
        let Some(start) = find(&self.buffer, START_MARKER) else {
            // Keep a trailing 'F': it may be the first half of a marker
            let keep = usize::from(self.buffer.last() == Some(&START_MARKER[0]));
            let discard = self.buffer.len() - keep;
            if discard > 0 {
                trace!(discarded = discard, "No start marker in buffer");
                self.buffer.advance(discard);
            }
            return None;
        };

        if start > 0 {
            debug!(discarded = start, "Discarding bytes before start marker");
            self.buffer.advance(start);
        }

        let body = &self.buffer[START_MARKER.len()..];
        let end = find(body, END_MARKER);
        let restart = find(body, START_MARKER);

        match (end, restart) {
            (Some(end), Some(restart)) if restart < end => Some(Err(self.take_garbled(restart))),
            (None, Some(restart)) => Some(Err(self.take_garbled(restart))),
            (Some(end), _) => {
                let frame = self
                    .buffer
                    .split_to(START_MARKER.len() + end + END_MARKER.len())
                    .freeze();
                trace!(len = end, remaining = self.buffer.len(), "Extracted frame");
                Some(Ok(frame.slice(START_MARKER.len()..START_MARKER.len() + end)))
            }
            (None, None) => {
                trace!(have = self.buffer.len(), "Waiting for end marker");
                None
            }
        }
    }

    fn take_garbled(&mut self, restart: usize) -> FrameError {
        let raw = self.buffer.split_to(START_MARKER.len() + restart).freeze();
        FrameError::new(FrameErrorKind::NestedStart, raw)
    }
}

impl Default for FrameScanner {
    fn default() -> Self {
        Self::new()
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

/// Decode a frame payload (the bytes strictly between the markers)
///
/// A payload shorter than the schema yields a record holding only the
/// fields whose byte ranges fit entirely; the remaining keys are absent.
pub fn decode_payload(
    schema: &FieldSchema,
    payload: &[u8],
) -> Result<TelemetryRecord, FrameError> {
    if let Some(offset) = payload.iter().position(|b| !b.is_ascii()) {
        return Err(FrameError::new(
            FrameErrorKind::NonAscii { offset },
            Bytes::copy_from_slice(payload),
        ));
    }

    if payload.len() != schema.payload_len() {
        warn!(
            got = payload.len(),
            expected = schema.payload_len(),
            "Payload length does not match schema"
        );
    }

    let mut record = TelemetryRecord::new();
    for (key, range) in schema.decode_offsets() {
        if range.end > payload.len() {
            debug!(key, "Payload truncated, remaining fields unknown");
            break;
        }

        // ASCII was checked above, so this slice is valid UTF-8
        let text = String::from_utf8_lossy(&payload[range]);
        let value = text.trim().parse::<i64>().map_err(|_| {
            FrameError::new(
                FrameErrorKind::InvalidField {
                    key: key.to_string(),
                    text: text.to_string(),
                },
                Bytes::copy_from_slice(payload),
            )
        })?;
        record.insert(key, value);
    }

    Ok(record)
}

/// Decode the first complete frame found in `buffer`
///
/// Returns `Ok(None)` when `buffer` holds no complete frame.
pub fn decode_frame(
    schema: &FieldSchema,
    buffer: &[u8],
) -> Result<Option<TelemetryRecord>, FrameError> {
    let mut scanner = FrameScanner::with_capacity(buffer.len());
    scanner.extend(buffer);
    match scanner.next_frame() {
        Some(Ok(payload)) => decode_payload(schema, &payload).map(Some),
        Some(Err(e)) => Err(e),
        None => Ok(None),
    }
}

/// Encode an opcode and its positional parameters
///
/// Each parameter is written right-justified and zero-padded to the width
/// the opcode assigns to its slot. A value that does not fit is rejected.
pub fn encode(opcode: Opcode, params: &[u32]) -> Result<Bytes, EncodingError> {
    let widths = opcode.param_widths();
    if params.len() != widths.len() {
        return Err(EncodingError::Arity {
            opcode,
            expected: widths.len(),
            got: params.len(),
        });
    }

    let mut frame = BytesMut::with_capacity(2 + widths.iter().sum::<usize>());
    frame.put_u8(opcode.as_byte());

    for (index, (&value, &width)) in params.iter().zip(widths).enumerate() {
        if !fits(u64::from(value), width) {
            return Err(EncodingError::OutOfRange {
                opcode,
                index,
                value,
                width,
            });
        }
        frame.put_slice(format!("{value:0width$}").as_bytes());
    }

    frame.put_u8(END_FRAME);
    Ok(frame.freeze())
}

fn fits(value: u64, width: usize) -> bool {
    u32::try_from(width)
        .ok()
        .and_then(|w| 10u64.checked_pow(w))
        .map_or(true, |limit| value < limit)
}

/// Parse an outbound command frame back into its opcode and parameters
///
/// This is the controller-side view of [`encode`].
pub fn parse_command(frame: &[u8]) -> Result<(Opcode, Vec<u32>), EncodingError> {
    let Some((&last, rest)) = frame.split_last() else {
        return Err(EncodingError::Malformed("empty frame".to_string()));
    };
    if last != END_FRAME {
        return Err(EncodingError::MissingTerminator);
    }
    let Some((&op, mut body)) = rest.split_first() else {
        return Err(EncodingError::Malformed("missing opcode".to_string()));
    };

    let opcode = Opcode::try_from(op)?;
    let widths = opcode.param_widths();
    let expected: usize = widths.iter().sum();
    if body.len() != expected {
        return Err(EncodingError::Malformed(format!(
            "{opcode} body is {} bytes, expected {expected}",
            body.len()
        )));
    }

    let mut params = Vec::with_capacity(widths.len());
    for &width in widths {
        let (digits, tail) = body.split_at(width);
        if !digits.iter().all(u8::is_ascii_digit) {
            return Err(EncodingError::Malformed(format!(
                "non-digit parameter {:?}",
                digits.escape_ascii().to_string()
            )));
        }
        let value = std::str::from_utf8(digits)
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .ok_or_else(|| EncodingError::Malformed("parameter overflow".to_string()))?;
        params.push(value);
        body = tail;
    }

    Ok((opcode, params))
}

/// Build a complete telemetry frame from a record
///
/// This is the controller-side view of [`decode_payload`]. Every schema key
/// must be present; reserved bytes are filled with `'0'`.
pub fn encode_telemetry(
    schema: &FieldSchema,
    record: &TelemetryRecord,
) -> Result<Bytes, EncodingError> {
    let mut frame =
        BytesMut::with_capacity(START_MARKER.len() + schema.payload_len() + END_MARKER.len());
    frame.put_slice(START_MARKER);

    for field in schema.fields() {
        let value = record
            .get(&field.key)
            .ok_or_else(|| EncodingError::Malformed(format!("missing field `{}`", field.key)))?;
        let text = format!("{value:0width$}", width = field.width);
        if text.len() > field.width {
            return Err(EncodingError::Malformed(format!(
                "field `{}` value {value} does not fit in {} bytes",
                field.key, field.width
            )));
        }
        frame.put_slice(text.as_bytes());
        frame.put_bytes(b'0', field.skip);
    }

    frame.put_slice(END_MARKER);
    Ok(frame.freeze())
}
