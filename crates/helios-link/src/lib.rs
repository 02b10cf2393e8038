//! Helios Link - serial session to the solar tracker panel controller
//!
//! This crate drives the byte link described by [`helios_core`]:
//!
//! - **Session**: connect, send a command, wait for the reply frame
//! - **Worker**: one task owns the session; clonable handles talk to it
//! - **Poller**: periodic data requests while connected
//! - **Distributor**: fans decoded records out to consumers
//! - **Ports**: serial port discovery and default port choice
//!
//! # Feature Flags
//!
//! - `serial`: Enable [`interface::SerialLink`] (requires `libudev-dev` on Linux)
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use helios_link::{
//!     interface::SerialLink, LogConsumer, Poller, Session, SessionConfig,
//!     SessionWorker, StateDistributor, SystemPortResolver,
//! };
//!
//! let config = SessionConfig::from_resolver(&SystemPortResolver::new());
//! let distributor = Arc::new(StateDistributor::new());
//! distributor.register(Arc::new(LogConsumer));
//!
//! let session = Session::new(SerialLink::new(), config.clone());
//! let (handle, _task) = SessionWorker::spawn(session, distributor);
//! handle.connect().await?;
//! Poller::new(handle.clone(), config.poll_interval).spawn();
//! ```

#![warn(missing_docs)]

pub mod config;
pub mod distributor;
pub mod error;
pub mod interface;
pub mod ports;
pub mod session;
pub mod test_utils;
pub mod worker;

pub use config::{SessionConfig, SessionConfigBuilder, SUPPORTED_BAUD_RATES};
pub use distributor::{
    DispatchReport, FnConsumer, LatestTelemetry, LogConsumer, StateDistributor,
    TelemetryConsumer, TelemetryUpdate,
};
pub use error::{ConsumerError, LinkError, Result};
pub use interface::{ConnectionState, PanelLink};
pub use ports::{PortInfo, PortResolver, StaticPortResolver, SystemPortResolver};
pub use session::{Interrupter, Session, SessionStats};
pub use worker::{LinkStats, PollMode, Poller, SessionHandle, SessionWorker};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
