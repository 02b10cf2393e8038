//! Byte-level links to the panel controller
//!
//! - [`SerialLink`] - real serial port (requires `serial` feature)
//! - [`crate::test_utils::MockLink`] - scripted in-memory link for tests
//!
//! # Feature Requirements
//!
//! - `serial`: Requires `libudev-dev` and `pkg-config` on Linux
//!   ```bash
//!   # Ubuntu/Debian
//!   apt install libudev-dev pkg-config
//!   ```

#[cfg(feature = "serial")]
mod serial;

#[cfg(feature = "serial")]
pub use serial::SerialLink;

use crate::config::SessionConfig;
use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// Raw duplex byte channel to the controller
///
/// Framing is not the link's job: the session owns the frame scanner, so a
/// link only moves bytes. `read_bytes` must be cancel safe because the
/// session races it against its timeout and the disconnect signal.
#[async_trait]
pub trait PanelLink: Send {
    /// Open the port described by `config`
    async fn open(&mut self, config: &SessionConfig) -> Result<()>;

    /// Close the port; closing a closed link is a no-op
    async fn close(&mut self) -> Result<()>;

    /// Check if the port is open
    fn is_open(&self) -> bool;

    /// Read whatever bytes are available
    ///
    /// Returns `None` if nothing arrived within the link's own poll window.
    async fn read_bytes(&mut self) -> Result<Option<Bytes>>;

    /// Write the bytes and flush
    async fn write_bytes(&mut self, data: &[u8]) -> Result<()>;

    /// Get the link name (for logging)
    fn name(&self) -> &str;
}

/// Session connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected
    #[default]
    Disconnected,
    /// Port open in progress
    Connecting,
    /// Port open and usable
    Connected,
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}
