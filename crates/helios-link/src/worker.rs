//! Session worker and periodic poller
//!
//! The worker task owns the [`Session`] and serves requests one at a time,
//! so a command and a poll can never interleave on the wire. Every decoded
//! record is handed to the [`StateDistributor`] before the caller gets it.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐  requests   ┌───────────────┐  bytes  ┌────────────┐
//! │ SessionHandle│────────────▶│ SessionWorker │◀───────▶│ PanelLink  │
//! │  (clonable)  │◀────────────│   (Session)   │         └────────────┘
//! └──────┬───────┘   replies   └───────┬───────┘
//!        │ interrupt                   │ records
//!        └─────────────────────────────▶ StateDistributor ──▶ consumers
//! ```
//!
//! `disconnect` signals the interrupter before queueing its request, so a
//! read that is waiting out its timeout is cut short.

use std::sync::Arc;
use std::time::Duration;

use helios_core::{Command, TelemetryRecord};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::distributor::StateDistributor;
use crate::error::{LinkError, Result};
use crate::interface::{ConnectionState, PanelLink};
use crate::session::{Interrupter, Session, SessionStats};

/// Depth of the request queue
const REQUEST_QUEUE_SIZE: usize = 32;

type RecordReply = oneshot::Sender<Result<Option<TelemetryRecord>>>;

#[derive(Debug)]
enum Request {
    Connect(Option<SessionConfig>, oneshot::Sender<Result<()>>),
    Disconnect(oneshot::Sender<Result<()>>),
    Send(Command, RecordReply),
    Receive(RecordReply),
    UpdateConfig(SessionConfig, oneshot::Sender<Result<()>>),
    GetConfig(oneshot::Sender<SessionConfig>),
    GetStats(oneshot::Sender<LinkStats>),
    Shutdown(oneshot::Sender<Result<()>>),
}

/// Worker statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LinkStats {
    /// Session counters
    pub session: SessionStats,
    /// Records handed to the distributor
    pub dispatched: u64,
    /// Consumer failures across all dispatches
    pub consumer_failures: u64,
}

/// Handle for controlling the session worker
#[derive(Clone)]
pub struct SessionHandle {
    requests: mpsc::Sender<Request>,
    interrupter: Interrupter,
    state: watch::Receiver<ConnectionState>,
}

impl SessionHandle {
    async fn call<T>(&self, make: impl FnOnce(oneshot::Sender<T>) -> Request) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.requests
            .send(make(tx))
            .await
            .map_err(|_| LinkError::WorkerClosed)?;
        rx.await.map_err(|_| LinkError::WorkerClosed)
    }

    /// Connect with the current settings
    pub async fn connect(&self) -> Result<()> {
        self.call(|tx| Request::Connect(None, tx)).await?
    }

    /// Connect with new settings
    pub async fn connect_with(&self, config: SessionConfig) -> Result<()> {
        self.call(|tx| Request::Connect(Some(config), tx)).await?
    }

    /// Disconnect, aborting any in-flight read
    pub async fn disconnect(&self) -> Result<()> {
        self.interrupter.interrupt();
        self.call(Request::Disconnect).await?
    }

    /// Send a command and wait for the reply frame
    pub async fn send_command(&self, command: Command) -> Result<Option<TelemetryRecord>> {
        self.call(|tx| Request::Send(command, tx)).await?
    }

    /// Ask the controller for a telemetry frame
    pub async fn request_data(&self) -> Result<Option<TelemetryRecord>> {
        self.send_command(Command::DataRequest).await
    }

    /// Wait for a frame the controller sends on its own
    pub async fn receive_data(&self) -> Result<Option<TelemetryRecord>> {
        self.call(Request::Receive).await?
    }

    /// Change the port, reconnecting if connected
    pub async fn set_port(&self, port: impl Into<String>) -> Result<()> {
        let mut config = self.config().await?;
        config.port = Some(port.into());
        self.update_config(config).await
    }

    /// Change the baud rate, reconnecting if connected
    pub async fn set_baud_rate(&self, baud_rate: u32) -> Result<()> {
        let mut config = self.config().await?;
        config.baud_rate = baud_rate;
        self.update_config(config).await
    }

    /// Change the read timeout, reconnecting if connected
    pub async fn set_timeout(&self, timeout: Duration) -> Result<()> {
        let mut config = self.config().await?;
        config.timeout = timeout;
        self.update_config(config).await
    }

    /// Apply new settings
    pub async fn update_config(&self, config: SessionConfig) -> Result<()> {
        self.call(|tx| Request::UpdateConfig(config, tx)).await?
    }

    /// Current settings
    pub async fn config(&self) -> Result<SessionConfig> {
        self.call(Request::GetConfig).await
    }

    /// Get worker statistics
    pub async fn stats(&self) -> Result<LinkStats> {
        self.call(Request::GetStats).await
    }

    /// Connection state as of the last completed request
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Watch connection state changes
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.clone()
    }

    /// Disconnect and stop the worker
    pub async fn shutdown(&self) -> Result<()> {
        self.interrupter.interrupt();
        self.call(Request::Shutdown).await?
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("state", &self.state())
            .finish()
    }
}

/// Task that owns a session
pub struct SessionWorker<L: PanelLink> {
    session: Session<L>,
    distributor: Arc<StateDistributor>,
    requests: mpsc::Receiver<Request>,
    state: watch::Sender<ConnectionState>,
    dispatched: u64,
    consumer_failures: u64,
}

impl<L: PanelLink + 'static> SessionWorker<L> {
    /// Create a worker and its handle
    pub fn new(session: Session<L>, distributor: Arc<StateDistributor>) -> (Self, SessionHandle) {
        let (request_tx, request_rx) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let (state_tx, state_rx) = watch::channel(session.state());

        let handle = SessionHandle {
            requests: request_tx,
            interrupter: session.interrupter(),
            state: state_rx,
        };
        let worker = Self {
            session,
            distributor,
            requests: request_rx,
            state: state_tx,
            dispatched: 0,
            consumer_failures: 0,
        };
        (worker, handle)
    }

    /// Spawn the worker on the runtime
    pub fn spawn(
        session: Session<L>,
        distributor: Arc<StateDistributor>,
    ) -> (SessionHandle, JoinHandle<()>) {
        let (worker, handle) = Self::new(session, distributor);
        (handle, tokio::spawn(worker.run()))
    }

    /// Serve requests until shutdown or until every handle is dropped
    pub async fn run(mut self) {
        info!(link = self.session.link().name(), "Session worker started");

        while let Some(request) = self.requests.recv().await {
            trace!(?request, "Session request");
            match request {
                Request::Connect(config, reply) => {
                    let config = config.unwrap_or_else(|| self.session.config().clone());
                    let result = self.session.connect(config).await;
                    let _ = reply.send(result);
                }
                Request::Disconnect(reply) => {
                    let result = self.session.disconnect().await;
                    let _ = reply.send(result);
                }
                Request::Send(command, reply) => {
                    let result = self.session.send_command(&command).await;
                    let _ = reply.send(self.deliver(result));
                }
                Request::Receive(reply) => {
                    let result = self.session.receive_data().await;
                    let _ = reply.send(self.deliver(result));
                }
                Request::UpdateConfig(config, reply) => {
                    let result = self.session.update_config(config).await;
                    let _ = reply.send(result);
                }
                Request::GetConfig(reply) => {
                    let _ = reply.send(self.session.config().clone());
                }
                Request::GetStats(reply) => {
                    let _ = reply.send(self.stats());
                }
                Request::Shutdown(reply) => {
                    let result = self.session.disconnect().await;
                    self.publish_state();
                    let _ = reply.send(result);
                    info!("Session worker shutting down");
                    return;
                }
            }
            self.publish_state();
        }

        debug!("All session handles dropped");
        if let Err(e) = self.session.disconnect().await {
            warn!(error = %e, "Error closing port on worker exit");
        }
        self.publish_state();
    }

    fn deliver(
        &mut self,
        result: Result<Option<TelemetryRecord>>,
    ) -> Result<Option<TelemetryRecord>> {
        if let Ok(Some(record)) = &result {
            let (_, report) = self.distributor.dispatch(record.clone());
            self.dispatched += 1;
            self.consumer_failures += report.failed.len() as u64;
        }
        result
    }

    fn stats(&self) -> LinkStats {
        LinkStats {
            session: self.session.stats().clone(),
            dispatched: self.dispatched,
            consumer_failures: self.consumer_failures,
        }
    }

    fn publish_state(&self) {
        self.state.send_if_modified(|state| {
            let current = self.session.state();
            if *state == current {
                return false;
            }
            debug!(from = %state, to = %current, "Connection state changed");
            *state = current;
            true
        });
    }
}

/// What the poller does on each tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PollMode {
    /// Send a data request and wait for the reply
    #[default]
    Request,
    /// Only listen for frames the controller pushes
    Listen,
}

/// Periodic telemetry poller
///
/// Skips ticks while disconnected and stops once the worker is gone.
#[derive(Debug)]
pub struct Poller {
    handle: SessionHandle,
    interval: Duration,
    mode: PollMode,
}

impl Poller {
    /// Poll through `handle` every `interval`
    pub fn new(handle: SessionHandle, interval: Duration) -> Self {
        Self {
            handle,
            interval,
            mode: PollMode::default(),
        }
    }

    /// Set the poll mode
    pub fn mode(mut self, mode: PollMode) -> Self {
        self.mode = mode;
        self
    }

    /// Spawn the poll loop; abort the returned task to stop it
    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Run the poll loop
    pub async fn run(self) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.interval.as_millis() as u64, mode = ?self.mode, "Poller started");

        loop {
            ticker.tick().await;
            if self.handle.state() != ConnectionState::Connected {
                trace!("Not connected, skipping poll");
                continue;
            }

            let result = match self.mode {
                PollMode::Request => self.handle.request_data().await,
                PollMode::Listen => self.handle.receive_data().await,
            };
            match result {
                Ok(Some(_)) => trace!("Poll delivered telemetry"),
                Ok(None) => debug!("Poll got no reply"),
                Err(LinkError::WorkerClosed) => {
                    info!("Session worker gone, poller stopping");
                    break;
                }
                Err(e) if e.is_protocol_error() => debug!(error = %e, "Poll got malformed frame"),
                Err(e) => warn!(error = %e, code = e.error_code(), "Poll failed"),
            }
        }
    }
}
