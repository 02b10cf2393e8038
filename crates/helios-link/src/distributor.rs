//! State distributor
//!
//! Fans each decoded record out to every registered consumer. A consumer
//! that errors or panics is logged and skipped; the others still receive
//! the update and the session keeps polling.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use helios_core::{ChargeState, TelemetryRecord};
use parking_lot::RwLock;
use tracing::{debug, error, info, warn};

use crate::error::ConsumerError;

/// One decoded record as seen by consumers
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetryUpdate {
    /// Decoded fields
    pub record: Arc<TelemetryRecord>,
    /// Collapsed charge flags
    pub charge_state: ChargeState,
    /// When the frame was decoded
    pub received_at: DateTime<Utc>,
}

impl TelemetryUpdate {
    /// Wrap a freshly decoded record
    pub fn new(record: TelemetryRecord) -> Self {
        Self {
            charge_state: ChargeState::from_record(&record),
            record: Arc::new(record),
            received_at: Utc::now(),
        }
    }
}

/// Receiver of telemetry updates
///
/// `update` runs on the session worker, so it should return quickly and
/// hand slow work to its own task.
pub trait TelemetryConsumer: Send + Sync {
    /// Consumer name (for logging)
    fn name(&self) -> &str;

    /// Handle one update
    fn update(&self, update: &TelemetryUpdate) -> Result<(), ConsumerError>;
}

/// Outcome of one dispatch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Consumers that accepted the update
    pub delivered: usize,
    /// Names of consumers that failed or panicked
    pub failed: Vec<String>,
}

impl DispatchReport {
    /// Whether every consumer accepted the update
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Registry of consumers
#[derive(Default)]
pub struct StateDistributor {
    consumers: RwLock<Vec<Arc<dyn TelemetryConsumer>>>,
}

impl StateDistributor {
    /// Create an empty distributor
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a consumer; it receives every later update
    pub fn register(&self, consumer: Arc<dyn TelemetryConsumer>) {
        info!(consumer = consumer.name(), "Registered telemetry consumer");
        self.consumers.write().push(consumer);
    }

    /// Number of registered consumers
    pub fn len(&self) -> usize {
        self.consumers.read().len()
    }

    /// Whether no consumer is registered
    pub fn is_empty(&self) -> bool {
        self.consumers.read().is_empty()
    }

    /// Deliver `record` to every consumer
    pub fn dispatch(&self, record: TelemetryRecord) -> (TelemetryUpdate, DispatchReport) {
        let update = TelemetryUpdate::new(record);
        let report = self.dispatch_update(&update);
        (update, report)
    }

    /// Deliver an already wrapped update to every consumer
    pub fn dispatch_update(&self, update: &TelemetryUpdate) -> DispatchReport {
        // Snapshot so a consumer may register others without deadlocking
        let consumers: Vec<_> = self.consumers.read().clone();
        let mut report = DispatchReport::default();

        for consumer in consumers {
            match catch_unwind(AssertUnwindSafe(|| consumer.update(update))) {
                Ok(Ok(())) => report.delivered += 1,
                Ok(Err(e)) => {
                    warn!(consumer = consumer.name(), error = %e, "Consumer rejected update");
                    report.failed.push(consumer.name().to_string());
                }
                Err(_) => {
                    error!(consumer = consumer.name(), "Consumer panicked");
                    report.failed.push(consumer.name().to_string());
                }
            }
        }

        debug!(
            delivered = report.delivered,
            failed = report.failed.len(),
            charge = %update.charge_state,
            "Dispatched telemetry"
        );
        report
    }
}

impl std::fmt::Debug for StateDistributor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .consumers
            .read()
            .iter()
            .map(|c| c.name().to_string())
            .collect();
        f.debug_struct("StateDistributor")
            .field("consumers", &names)
            .finish()
    }
}

/// Keeps the most recent update
#[derive(Debug, Default)]
pub struct LatestTelemetry {
    latest: RwLock<Option<TelemetryUpdate>>,
}

impl LatestTelemetry {
    /// Create an empty holder
    pub fn new() -> Self {
        Self::default()
    }

    /// Most recent update, if any
    pub fn get(&self) -> Option<TelemetryUpdate> {
        self.latest.read().clone()
    }
}

impl TelemetryConsumer for LatestTelemetry {
    fn name(&self) -> &str {
        "latest"
    }

    fn update(&self, update: &TelemetryUpdate) -> Result<(), ConsumerError> {
        *self.latest.write() = Some(update.clone());
        Ok(())
    }
}

/// Logs a summary of each update
#[derive(Debug, Default)]
pub struct LogConsumer;

impl TelemetryConsumer for LogConsumer {
    fn name(&self) -> &str {
        "log"
    }

    fn update(&self, update: &TelemetryUpdate) -> Result<(), ConsumerError> {
        let field = |key: &str| update.record.get(key);
        info!(
            average = ?field("average"),
            v_panel = ?field("v_panel"),
            v_battery = ?field("v_battery"),
            elevation = ?field("angle_elev"),
            azimuth = ?field("angle_azim"),
            charge = %update.charge_state,
            "Telemetry"
        );
        Ok(())
    }
}

/// Adapts a closure into a consumer
pub struct FnConsumer<F> {
    name: String,
    f: F,
}

impl<F> FnConsumer<F>
where
    F: Fn(&TelemetryUpdate) -> Result<(), ConsumerError> + Send + Sync,
{
    /// Wrap `f` under `name`
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self {
            name: name.into(),
            f,
        }
    }
}

impl<F> TelemetryConsumer for FnConsumer<F>
where
    F: Fn(&TelemetryUpdate) -> Result<(), ConsumerError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn update(&self, update: &TelemetryUpdate) -> Result<(), ConsumerError> {
        (self.f)(update)
    }
}
