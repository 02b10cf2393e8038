//! Helios Core - wire protocol of the solar tracker controller
//!
//! This crate holds the pure, I/O-free half of the serial link between the
//! desktop client and the panel controller:
//!
//! - [`schema`] - positional layout of the telemetry payload
//! - [`record`] - decoded telemetry snapshot
//! - [`codec`] - frame scanning, telemetry decoding and command encoding
//! - [`command`] - typed outbound commands and their opcodes
//! - [`charge`] - collapsing the three charge flags into one state
//! - [`error`] - frame, encoding and schema errors
//!
//! # Example
//!
//! ```rust
//! use helios_core::{codec, Command, FieldSchema, LightingButton};
//!
//! let cmd = Command::Lighting { button: LightingButton::Led(2), level: 9 };
//! assert_eq!(cmd.encode().unwrap().as_ref(), b"E0209\r");
//!
//! let schema = FieldSchema::standard();
//! assert_eq!(codec::decode_frame(&schema, b"no frame here").unwrap(), None);
//! ```

#![warn(missing_docs)]

pub mod charge;
pub mod codec;
pub mod command;
pub mod error;
pub mod record;
pub mod schema;

pub use charge::{ChargeState, CHARGE_FLAG_KEYS};
pub use codec::{FrameScanner, END_FRAME, END_MARKER, START_MARKER};
pub use command::{
    Command, CorrectionMode, LightingButton, MotorDirection, MotorMove, Opcode,
};
pub use error::{EncodingError, FrameError, FrameErrorKind, SchemaError};
pub use record::TelemetryRecord;
pub use schema::{FieldSchema, FieldSpec};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }

    #[test]
    fn test_constants() {
        assert_eq!(START_MARKER, b"FA");
        assert_eq!(END_MARKER, b"0D");
        assert_eq!(END_FRAME, 0x0D);
    }
}
