//! Distributor consumer that uploads records to the mirror
//!
//! `update` only enqueues; a background task does the HTTP round trips so a
//! slow or unreachable mirror never stalls the session worker. When the
//! queue is full the record is dropped and the distributor logs the
//! backpressure.

use helios_link::{ConsumerError, TelemetryConsumer, TelemetryUpdate};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::client::MirrorClient;
use crate::record::MirrorRecord;

/// Default depth of the upload queue
pub const DEFAULT_UPLOAD_QUEUE: usize = 16;

/// Totals reported by the upload task when it exits
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UploadStats {
    /// Records the mirror accepted
    pub uploaded: u64,
    /// Records the mirror rejected or never received
    pub failed: u64,
}

/// Forwards every update to the mirror
#[derive(Debug)]
pub struct MirrorConsumer {
    queue: mpsc::Sender<MirrorRecord>,
}

impl MirrorConsumer {
    /// Start the upload task
    ///
    /// The task ends once the consumer is dropped and the queue drains.
    pub fn spawn(client: MirrorClient, queue_size: usize) -> (Self, JoinHandle<UploadStats>) {
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        let task = tokio::spawn(upload_loop(client, rx));
        (Self { queue: tx }, task)
    }
}

impl TelemetryConsumer for MirrorConsumer {
    fn name(&self) -> &str {
        "mirror"
    }

    fn update(&self, update: &TelemetryUpdate) -> Result<(), ConsumerError> {
        self.queue
            .try_send(MirrorRecord::from_update(update))
            .map_err(|e| match e {
                TrySendError::Full(_) => ConsumerError::Backpressure,
                TrySendError::Closed(_) => ConsumerError::Closed,
            })
    }
}

async fn upload_loop(client: MirrorClient, mut rx: mpsc::Receiver<MirrorRecord>) -> UploadStats {
    info!(url = client.frames_url(), "Mirror upload task started");
    let mut stats = UploadStats::default();

    while let Some(record) = rx.recv().await {
        match client.send(&record).await {
            Ok(ack) => {
                stats.uploaded += 1;
                debug!(id = ?ack.id, "Uploaded telemetry to mirror");
            }
            Err(e) => {
                stats.failed += 1;
                warn!(error = %e, code = e.error_code(), "Mirror upload failed");
            }
        }
    }

    info!(
        uploaded = stats.uploaded,
        failed = stats.failed,
        "Mirror upload task stopped"
    );
    stats
}
