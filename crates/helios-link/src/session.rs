//! Transport session
//!
//! Owns the link, the frame scanner and the connection state. One request
//! cycle is: write the encoded command, then read until one complete frame
//! decodes or the timeout expires. A concurrent disconnect aborts the cycle
//! at any await point, the write included.
//!
//! ```text
//!              connect ok
//! Disconnected ──────────▶ Connected
//!      ▲   connect err         │
//!      └───────────────────────┤ disconnect / fatal I/O / interrupt
//!                              ▼
//!                         Disconnected
//! ```

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use helios_core::{codec, Command, FieldSchema, FrameScanner, TelemetryRecord};
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::SessionConfig;
use crate::error::{LinkError, Result};
use crate::interface::{ConnectionState, PanelLink};

/// Pause between reads when the link has nothing buffered
const IDLE_READ_INTERVAL: Duration = Duration::from_millis(10);

/// Counters kept by a session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    /// Commands written to the device
    pub commands_sent: u64,
    /// Frames decoded into records
    pub frames_decoded: u64,
    /// Malformed frames discarded
    pub frame_errors: u64,
    /// Cycles that ended without a frame
    pub timeouts: u64,
    /// Fatal I/O errors that closed the session
    pub connection_errors: u64,
    /// Cycles aborted by a disconnect
    pub interrupted_reads: u64,
    /// Successful connects
    pub connects: u64,
}

/// Aborts the in-flight read of a session from another task
#[derive(Debug, Clone)]
pub struct Interrupter {
    generation: Arc<watch::Sender<u64>>,
}

impl Interrupter {
    /// Abort the current request cycle, if any
    ///
    /// The session drops pending signals when a cycle starts, before the
    /// command is written, so an interrupt sent while idle does not affect
    /// the next cycle.
    pub fn interrupt(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
    }
}

enum ReadOutcome {
    Data(Result<Option<Bytes>>),
    TimedOut,
    Interrupted,
}

/// Serial session to one panel controller
pub struct Session<L: PanelLink> {
    link: L,
    config: SessionConfig,
    schema: FieldSchema,
    state: ConnectionState,
    scanner: FrameScanner,
    interrupter: Interrupter,
    interrupts: watch::Receiver<u64>,
    stats: SessionStats,
}

impl<L: PanelLink> Session<L> {
    /// Create a disconnected session over `link`
    pub fn new(link: L, config: SessionConfig) -> Self {
        let (tx, rx) = watch::channel(0u64);
        Self {
            link,
            config,
            schema: FieldSchema::standard(),
            state: ConnectionState::Disconnected,
            scanner: FrameScanner::new(),
            interrupter: Interrupter {
                generation: Arc::new(tx),
            },
            interrupts: rx,
            stats: SessionStats::default(),
        }
    }

    /// Decode frames with `schema` instead of the standard layout
    pub fn with_schema(mut self, schema: FieldSchema) -> Self {
        self.schema = schema;
        self
    }

    /// Current connection state
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the session is connected
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Current settings
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Telemetry layout
    pub fn schema(&self) -> &FieldSchema {
        &self.schema
    }

    /// Session counters
    pub fn stats(&self) -> &SessionStats {
        &self.stats
    }

    /// Underlying link
    pub fn link(&self) -> &L {
        &self.link
    }

    /// Handle for aborting reads from another task
    pub fn interrupter(&self) -> Interrupter {
        self.interrupter.clone()
    }

    /// Open the port described by `config`
    ///
    /// Connecting again with the same port settings is a no-op apart from
    /// storing the new poll period. Different port settings close the
    /// current port first. On failure the session is left disconnected.
    pub async fn connect(&mut self, config: SessionConfig) -> Result<()> {
        config.validate()?;

        if self.is_connected() && self.link.is_open() {
            if config.same_link(&self.config) {
                debug!(port = ?self.config.port, "Already connected");
                self.config = config;
                return Ok(());
            }
            info!("Connection settings changed, closing current port");
            self.close_link().await;
        }

        self.config = config;
        self.open_link().await
    }

    /// Close the port; disconnecting twice is a no-op
    pub async fn disconnect(&mut self) -> Result<()> {
        if self.state == ConnectionState::Disconnected && !self.link.is_open() {
            trace!("Already disconnected");
            return Ok(());
        }

        let result = self.link.close().await;
        self.state = ConnectionState::Disconnected;
        self.scanner.clear();
        info!(link = self.link.name(), "Disconnected");
        result
    }

    /// Change the port, reconnecting if connected
    pub async fn set_port(&mut self, port: impl Into<String>) -> Result<()> {
        let mut config = self.config.clone();
        config.port = Some(port.into());
        self.update_config(config).await
    }

    /// Change the baud rate, reconnecting if connected
    pub async fn set_baud_rate(&mut self, baud_rate: u32) -> Result<()> {
        let mut config = self.config.clone();
        config.baud_rate = baud_rate;
        self.update_config(config).await
    }

    /// Change the read timeout, reconnecting if connected
    pub async fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        let mut config = self.config.clone();
        config.timeout = timeout;
        self.update_config(config).await
    }

    /// Apply new settings
    ///
    /// While disconnected, or when only the poll period changes, the stored
    /// settings are replaced in place. Otherwise the port is closed once and
    /// opened once with the new settings; if that open fails the session
    /// ends disconnected.
    pub async fn update_config(&mut self, config: SessionConfig) -> Result<()> {
        config.validate()?;

        if !self.is_connected() || config.same_link(&self.config) {
            self.config = config;
            return Ok(());
        }

        info!("Connection settings changed, reconnecting");
        self.close_link().await;
        self.config = config;
        self.open_link().await
    }

    /// Send a command and wait for the reply frame
    ///
    /// Returns `Ok(None)` if no complete frame arrived within the timeout.
    /// A malformed frame is an error but the session stays connected.
    pub async fn send_command(&mut self, command: &Command) -> Result<Option<TelemetryRecord>> {
        self.ensure_connected()?;
        let frame = command.encode()?;
        self.begin_cycle();
        debug!(opcode = %command.opcode(), bytes = %frame.escape_ascii(), "Sending command");

        match self.write_frame(&frame).await {
            Some(Ok(())) => self.stats.commands_sent += 1,
            Some(Err(e)) => {
                self.fail(&e).await;
                return Err(e);
            }
            None => return Err(self.abort_cycle().await),
        }

        self.await_frame().await
    }

    /// Read a frame the device sent on its own, without writing
    pub async fn receive_data(&mut self) -> Result<Option<TelemetryRecord>> {
        self.ensure_connected()?;
        self.begin_cycle();
        self.await_frame().await
    }

    /// Drop interrupts sent while no cycle was running
    fn begin_cycle(&mut self) {
        self.interrupts.borrow_and_update();
    }

    /// Write `frame`, or `None` if a disconnect arrived first
    async fn write_frame(&mut self, frame: &[u8]) -> Option<Result<()>> {
        let link = &mut self.link;
        let interrupts = &mut self.interrupts;
        tokio::select! {
            biased;
            Ok(()) = interrupts.changed() => None,
            written = link.write_bytes(frame) => Some(written),
        }
    }

    async fn abort_cycle(&mut self) -> LinkError {
        self.stats.interrupted_reads += 1;
        info!("Request cycle interrupted by disconnect");
        self.close_link().await;
        LinkError::Interrupted
    }

    fn ensure_connected(&self) -> Result<()> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(LinkError::NotConnected)
        }
    }

    async fn open_link(&mut self) -> Result<()> {
        if self.config.port.is_none() {
            self.state = ConnectionState::Disconnected;
            return Err(LinkError::NoPortConfigured);
        }

        self.state = ConnectionState::Connecting;
        info!(
            port = ?self.config.port,
            baud = self.config.baud_rate,
            link = self.link.name(),
            "Connecting"
        );

        match self.link.open(&self.config).await {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                self.scanner.clear();
                self.stats.connects += 1;
                info!(port = ?self.config.port, "Connected to panel controller");
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                warn!(error = %e, code = e.error_code(), "Connect failed");
                Err(e)
            }
        }
    }

    async fn close_link(&mut self) {
        if let Err(e) = self.disconnect().await {
            warn!(error = %e, "Error while closing port");
        }
    }

    /// Fatal I/O: close and mark disconnected
    async fn fail(&mut self, error: &LinkError) {
        if error.is_connection_error() {
            warn!(error = %error, code = error.error_code(), "Connection lost");
            self.stats.connection_errors += 1;
            self.close_link().await;
        }
    }

    async fn await_frame(&mut self) -> Result<Option<TelemetryRecord>> {
        let deadline = Instant::now() + self.config.timeout;

        loop {
            if let Some(frame) = self.scanner.next_frame() {
                return self.decode(frame);
            }

            match self.read_until(deadline).await {
                ReadOutcome::Data(Ok(Some(bytes))) => {
                    trace!(bytes = bytes.len(), "Received");
                    self.scanner.extend(&bytes);
                }
                ReadOutcome::Data(Ok(None)) => {
                    let idle = deadline.saturating_duration_since(Instant::now());
                    tokio::time::sleep(IDLE_READ_INTERVAL.min(idle)).await;
                }
                ReadOutcome::Data(Err(e)) => {
                    self.fail(&e).await;
                    return Err(e);
                }
                ReadOutcome::TimedOut => {
                    self.stats.timeouts += 1;
                    debug!(
                        timeout_ms = self.config.timeout.as_millis() as u64,
                        buffered = self.scanner.buffered(),
                        "No complete frame before timeout"
                    );
                    return Ok(None);
                }
                ReadOutcome::Interrupted => return Err(self.abort_cycle().await),
            }
        }
    }

    async fn read_until(&mut self, deadline: Instant) -> ReadOutcome {
        let link = &mut self.link;
        let interrupts = &mut self.interrupts;
        tokio::select! {
            biased;
            changed = interrupts.changed() => match changed {
                Ok(()) => ReadOutcome::Interrupted,
                // The sender lives in self, so this cannot happen
                Err(_) => ReadOutcome::TimedOut,
            },
            _ = tokio::time::sleep_until(deadline) => ReadOutcome::TimedOut,
            data = link.read_bytes() => ReadOutcome::Data(data),
        }
    }

    fn decode(
        &mut self,
        frame: std::result::Result<Bytes, helios_core::FrameError>,
    ) -> Result<Option<TelemetryRecord>> {
        let decoded = frame.and_then(|payload| codec::decode_payload(&self.schema, &payload));
        match decoded {
            Ok(record) => {
                self.stats.frames_decoded += 1;
                debug!(fields = record.len(), "Decoded telemetry frame");
                Ok(Some(record))
            }
            Err(e) => {
                self.stats.frame_errors += 1;
                warn!(error = %e, "Discarding malformed frame");
                Err(e.into())
            }
        }
    }
}

impl<L: PanelLink> std::fmt::Debug for Session<L> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("link", &self.link.name())
            .field("state", &self.state)
            .field("port", &self.config.port)
            .field("buffered", &self.scanner.buffered())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{sample_frame, DeviceSimulator, MockLink, TestFixture};
    use helios_core::LightingButton;

    #[tokio::test]
    async fn test_commands_require_connection() {
        let fixture = TestFixture::new();
        let mut session = fixture.session();

        let err = session.send_command(&Command::DataRequest).await.unwrap_err();
        assert!(matches!(err, LinkError::NotConnected));
        assert!(fixture.link.outgoing().is_empty());
    }

    #[tokio::test]
    async fn test_connect_without_port() {
        let mut session = Session::new(MockLink::new(), SessionConfig::default());
        let err = session.connect(SessionConfig::default()).await.unwrap_err();
        assert!(matches!(err, LinkError::NoPortConfigured));
        assert_eq!(session.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_lighting_command_reply() {
        let fixture = TestFixture::with_device(DeviceSimulator::new());
        let mut session = fixture.session();
        session.connect(fixture.config.clone()).await.unwrap();

        let cmd = Command::Lighting {
            button: LightingButton::Led(2),
            level: 9,
        };
        let record = session.send_command(&cmd).await.unwrap().unwrap();

        assert_eq!(fixture.link.outgoing()[0].as_ref(), b"E0209\r");
        assert_eq!(record.get("light_on"), Some(2));
        assert_eq!(record.get("light_lvl"), Some(9));
        assert_eq!(session.stats().frames_decoded, 1);
    }

    #[tokio::test]
    async fn test_encoding_error_sends_nothing() {
        let fixture = TestFixture::new();
        let mut session = fixture.session();
        session.connect(fixture.config.clone()).await.unwrap();

        let cmd = Command::Lighting {
            button: LightingButton::All,
            level: 100,
        };
        let err = session.send_command(&cmd).await.unwrap_err();
        assert!(matches!(err, LinkError::Encoding(_)));
        assert!(fixture.link.outgoing().is_empty());
        assert!(session.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reply_split_across_reads() {
        let fixture = TestFixture::new();
        let mut session = fixture.session();
        session.connect(fixture.config.clone()).await.unwrap();

        let frame = sample_frame();
        fixture.link.queue_incoming(frame.slice(..10));
        fixture.link.queue_incoming(frame.slice(10..));

        let record = session.receive_data().await.unwrap().unwrap();
        assert_eq!(record.get("east"), Some(512));
        assert_eq!(record.get("corr_threshold"), Some(10));
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_failure_disconnects() {
        let fixture = TestFixture::new();
        let mut session = fixture.session();
        session.connect(fixture.config.clone()).await.unwrap();

        fixture.link.fail_writes(true);
        let err = session.send_command(&Command::DataRequest).await.unwrap_err();
        assert!(matches!(err, LinkError::WriteError(_)));
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.stats().connection_errors, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_idle_interrupt_does_not_abort_next_cycle() {
        let fixture = TestFixture::with_device(DeviceSimulator::new());
        let mut session = fixture.session();
        session.connect(fixture.config.clone()).await.unwrap();

        session.interrupter().interrupt();
        let record = session.send_command(&Command::DataRequest).await.unwrap();
        assert!(record.is_some());
        assert!(session.is_connected());
    }

    #[tokio::test]
    async fn test_poll_interval_change_keeps_port_open() {
        let fixture = TestFixture::new();
        let mut session = fixture.session();
        session.connect(fixture.config.clone()).await.unwrap();

        let mut config = fixture.config.clone();
        config.poll_interval = Duration::from_secs(5);
        session.update_config(config.clone()).await.unwrap();

        assert_eq!(fixture.link.open_calls(), 1);
        assert_eq!(fixture.link.close_calls(), 0);
        assert_eq!(session.config().poll_interval, Duration::from_secs(5));
        assert!(session.is_connected());

        config.poll_interval = Duration::from_secs(3);
        session.connect(config).await.unwrap();
        assert_eq!(fixture.link.open_calls(), 1);
        assert_eq!(session.config().poll_interval, Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_during_write_aborts_cycle() {
        let fixture = TestFixture::new();
        fixture.link.delay_writes(Duration::from_secs(10));
        let mut session = fixture.session();
        session.connect(fixture.config.clone()).await.unwrap();

        let interrupter = session.interrupter();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            interrupter.interrupt();
        });

        let err = session.send_command(&Command::DataRequest).await.unwrap_err();
        assert!(matches!(err, LinkError::Interrupted));
        assert!(fixture.link.outgoing().is_empty());
        assert_eq!(session.state(), ConnectionState::Disconnected);
        assert_eq!(session.stats().interrupted_reads, 1);
        assert_eq!(session.stats().commands_sent, 0);
    }
}
