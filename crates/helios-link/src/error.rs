//! Error types for the Helios serial link
//!
//! Only connection and encoding failures are true faults. A read timeout is
//! not an error at all (the session returns `Ok(None)`) and a malformed
//! frame is discarded while the session keeps running.

use helios_core::{EncodingError, FrameError};
use thiserror::Error;

/// Main error type for link operations
#[derive(Error, Debug)]
pub enum LinkError {
    // ===== Connection Errors =====
    /// Serial port not found
    #[error("Serial port not found: {0}")]
    PortNotFound(String),

    /// Serial port held by another process
    #[error("Serial port busy: {0}")]
    PortBusy(String),

    /// Serial port open failed
    #[error("Failed to open serial port {port}: {reason}")]
    PortOpenFailed {
        /// Port identifier
        port: String,
        /// Failure reason
        reason: String,
    },

    /// No port configured and none discovered
    #[error("No serial port configured")]
    NoPortConfigured,

    /// Operation requires an open session
    #[error("Not connected to any serial port")]
    NotConnected,

    /// Device closed the port (EOF)
    #[error("Serial port closed by device")]
    PortClosed,

    /// In-flight request cycle aborted by a concurrent disconnect
    #[error("Request interrupted by disconnect")]
    Interrupted,

    /// Serial read error
    #[error("Serial read error: {0}")]
    ReadError(String),

    /// Serial write error
    #[error("Serial write error: {0}")]
    WriteError(String),

    // ===== Protocol Errors =====
    /// Malformed telemetry frame
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Command parameter cannot be encoded
    #[error(transparent)]
    Encoding(#[from] EncodingError),

    // ===== Configuration Errors =====
    /// Invalid session configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ===== Worker Errors =====
    /// Session worker has stopped
    #[error("Session worker closed")]
    WorkerClosed,
}

impl LinkError {
    /// Port missing, busy or closed: fatal to the operation, not the process
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            LinkError::PortNotFound(_)
                | LinkError::PortBusy(_)
                | LinkError::PortOpenFailed { .. }
                | LinkError::NoPortConfigured
                | LinkError::NotConnected
                | LinkError::PortClosed
                | LinkError::Interrupted
                | LinkError::ReadError(_)
                | LinkError::WriteError(_)
        )
    }

    /// Bad data from the device
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, LinkError::Frame(_))
    }

    /// Get an error code for logging
    pub fn error_code(&self) -> &'static str {
        match self {
            LinkError::PortNotFound(_) => "PORT_NOT_FOUND",
            LinkError::PortBusy(_) => "PORT_BUSY",
            LinkError::PortOpenFailed { .. } => "PORT_OPEN_FAILED",
            LinkError::NoPortConfigured => "NO_PORT_CONFIGURED",
            LinkError::NotConnected => "NOT_CONNECTED",
            LinkError::PortClosed => "PORT_CLOSED",
            LinkError::Interrupted => "INTERRUPTED",
            LinkError::ReadError(_) => "READ_ERROR",
            LinkError::WriteError(_) => "WRITE_ERROR",
            LinkError::Frame(_) => "FRAME_ERROR",
            LinkError::Encoding(_) => "ENCODING_ERROR",
            LinkError::InvalidConfig(_) => "INVALID_CONFIG",
            LinkError::WorkerClosed => "WORKER_CLOSED",
        }
    }

    /// Map a serialport open error for `port`
    #[cfg(feature = "serial")]
    pub fn from_serial(port: &str, err: serialport::Error) -> Self {
        match err.kind {
            serialport::ErrorKind::NoDevice => LinkError::PortNotFound(port.to_string()),
            serialport::ErrorKind::Io(std::io::ErrorKind::NotFound) => {
                LinkError::PortNotFound(port.to_string())
            }
            serialport::ErrorKind::Io(std::io::ErrorKind::PermissionDenied)
            | serialport::ErrorKind::Io(std::io::ErrorKind::WouldBlock) => {
                LinkError::PortBusy(port.to_string())
            }
            _ => LinkError::PortOpenFailed {
                port: port.to_string(),
                reason: err.description,
            },
        }
    }
}

/// Result type alias for link operations
pub type Result<T> = std::result::Result<T, LinkError>;

/// Failure reported by a telemetry consumer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConsumerError {
    /// Consumer rejected the update
    #[error("{0}")]
    Rejected(String),

    /// Consumer queue is full, update dropped
    #[error("consumer queue full")]
    Backpressure,

    /// Consumer has shut down
    #[error("consumer closed")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use helios_core::FrameErrorKind;

    #[test]
    fn test_error_codes() {
        let err = LinkError::PortNotFound("/dev/ttyUSB0".to_string());
        assert_eq!(err.error_code(), "PORT_NOT_FOUND");
        assert_eq!(LinkError::WorkerClosed.error_code(), "WORKER_CLOSED");
    }

    #[test]
    fn test_taxonomy() {
        assert!(LinkError::NotConnected.is_connection_error());
        assert!(LinkError::Interrupted.is_connection_error());
        assert!(!LinkError::WorkerClosed.is_connection_error());
        assert!(!LinkError::InvalidConfig("baud".into()).is_protocol_error());

        let frame = LinkError::from(FrameError::new(
            FrameErrorKind::NestedStart,
            Bytes::from_static(b"FA1"),
        ));
        assert!(frame.is_protocol_error());
        assert!(!frame.is_connection_error());
    }
}
