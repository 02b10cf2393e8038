//! Helios Mirror - remote copy of panel telemetry over HTTP
//!
//! - [`MirrorRecord`] - flat JSON record with a collapsed `charge_state`
//! - [`MirrorClient`] - `POST`/`GET` against the mirror's `/frames` resource
//! - [`MirrorConsumer`] - distributor consumer that uploads in the background
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use helios_mirror::{MirrorClient, MirrorConfig, MirrorConsumer, DEFAULT_UPLOAD_QUEUE};
//!
//! let client = MirrorClient::new(&MirrorConfig::new("http://localhost:8080"))?;
//! let (consumer, _uploads) = MirrorConsumer::spawn(client, DEFAULT_UPLOAD_QUEUE);
//! distributor.register(Arc::new(consumer));
//! ```

#![warn(missing_docs)]

pub mod client;
pub mod consumer;
pub mod error;
pub mod record;

pub use client::{MirrorClient, MirrorConfig, DEFAULT_MIRROR_URL};
pub use consumer::{MirrorConsumer, UploadStats, DEFAULT_UPLOAD_QUEUE};
pub use error::{MirrorError, Result};
pub use record::{MirrorAck, MirrorRecord};
