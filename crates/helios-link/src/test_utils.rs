//! Test utilities for running sessions without hardware
//!
//! [`MockLink`] is a scripted in-memory link. Clones share state, so a test
//! can keep a handle after handing the link to a [`Session`]. A
//! [`DeviceSimulator`] plugged into the mock answers commands the way the
//! panel controller does.
//!
//! # Example
//!
//! ```rust
//! use helios_core::{Command, LightingButton};
//! use helios_link::test_utils::{DeviceSimulator, TestFixture};
//!
//! # tokio_test_block_on(async {
//! let fixture = TestFixture::with_device(DeviceSimulator::new());
//! let mut session = fixture.session();
//! session.connect(fixture.config.clone()).await.unwrap();
//!
//! let cmd = Command::Lighting { button: LightingButton::Led(2), level: 9 };
//! let record = session.send_command(&cmd).await.unwrap().unwrap();
//! assert_eq!(record.get("light_on"), Some(2));
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap().block_on(f)
//! # }
//! ```

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use helios_core::{codec, FieldSchema, Opcode, TelemetryRecord};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::config::SessionConfig;
use crate::error::{LinkError, Result};
use crate::interface::PanelLink;
use crate::session::Session;

type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

#[derive(Default)]
struct MockState {
    open: bool,
    open_calls: usize,
    close_calls: usize,
    opened_with: Vec<SessionConfig>,
    fail_opens: bool,
    fail_reads: bool,
    fail_writes: bool,
    stall_reads: bool,
    write_delay: Duration,
    incoming: VecDeque<Bytes>,
    outgoing: Vec<Bytes>,
    responder: Option<Responder>,
}

/// Mock link for testing without hardware
#[derive(Clone, Default)]
pub struct MockLink {
    state: Arc<Mutex<MockState>>,
}

impl MockLink {
    /// Create a new mock link
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer every write through `device`
    pub fn with_device(self, mut device: DeviceSimulator) -> Self {
        self.set_responder(move |data| device.handle(data));
        self
    }

    /// Install a closure that may answer each write with reply bytes
    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static,
    {
        self.state.lock().responder = Some(Box::new(responder));
    }

    /// Queue a chunk of bytes for a later read (simulates the device talking)
    pub fn queue_incoming(&self, data: impl Into<Bytes>) {
        self.state.lock().incoming.push_back(data.into());
    }

    /// Bytes written to the device, one entry per write
    pub fn outgoing(&self) -> Vec<Bytes> {
        self.state.lock().outgoing.clone()
    }

    /// Clear the outgoing log
    pub fn clear_outgoing(&self) {
        self.state.lock().outgoing.clear();
    }

    /// Make the next opens fail
    pub fn fail_opens(&self, enabled: bool) {
        self.state.lock().fail_opens = enabled;
    }

    /// Make reads fail with a read error
    pub fn fail_reads(&self, enabled: bool) {
        self.state.lock().fail_reads = enabled;
    }

    /// Make writes fail with a write error
    pub fn fail_writes(&self, enabled: bool) {
        self.state.lock().fail_writes = enabled;
    }

    /// Make reads block forever (a device that never answers at all)
    pub fn stall_reads(&self, enabled: bool) {
        self.state.lock().stall_reads = enabled;
    }

    /// Hold every write for `delay` before it reaches the device
    pub fn delay_writes(&self, delay: Duration) {
        self.state.lock().write_delay = delay;
    }

    /// Number of `open` calls so far
    pub fn open_calls(&self) -> usize {
        self.state.lock().open_calls
    }

    /// Number of `close` calls that closed an open port
    pub fn close_calls(&self) -> usize {
        self.state.lock().close_calls
    }

    /// Settings passed to each successful `open`
    pub fn opened_with(&self) -> Vec<SessionConfig> {
        self.state.lock().opened_with.clone()
    }
}

impl std::fmt::Debug for MockLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockLink")
            .field("open", &state.open)
            .field("incoming", &state.incoming.len())
            .field("outgoing", &state.outgoing.len())
            .finish()
    }
}

#[async_trait]
impl PanelLink for MockLink {
    async fn open(&mut self, config: &SessionConfig) -> Result<()> {
        let mut state = self.state.lock();
        state.open_calls += 1;
        let port = config.port.clone().ok_or(LinkError::NoPortConfigured)?;
        if state.fail_opens {
            return Err(LinkError::PortOpenFailed {
                port,
                reason: "Simulated error".to_string(),
            });
        }
        state.open = true;
        state.opened_with.push(config.clone());
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock();
        if state.open {
            state.open = false;
            state.close_calls += 1;
        }
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.state.lock().open
    }

    async fn read_bytes(&mut self) -> Result<Option<Bytes>> {
        {
            let mut state = self.state.lock();
            if !state.open {
                return Err(LinkError::NotConnected);
            }
            if state.fail_reads {
                state.open = false;
                return Err(LinkError::ReadError("Simulated error".to_string()));
            }
            if !state.stall_reads {
                return Ok(state.incoming.pop_front());
            }
        }

        std::future::pending::<()>().await;
        Ok(None)
    }

    async fn write_bytes(&mut self, data: &[u8]) -> Result<()> {
        let delay = self.state.lock().write_delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.state.lock();
        if !state.open {
            return Err(LinkError::NotConnected);
        }
        if state.fail_writes {
            state.open = false;
            return Err(LinkError::WriteError("Simulated error".to_string()));
        }
        state.outgoing.push(Bytes::copy_from_slice(data));

        let reply = state.responder.as_mut().and_then(|respond| respond(data));
        if let Some(reply) = reply {
            state.incoming.push_back(Bytes::from(reply));
        }
        Ok(())
    }

    fn name(&self) -> &str {
        "MockLink"
    }
}

/// Simulated panel controller
///
/// Keeps a full telemetry record, applies each command to it and answers
/// with a telemetry frame. Opcodes marked silent get no reply.
#[derive(Debug, Clone)]
pub struct DeviceSimulator {
    schema: FieldSchema,
    state: TelemetryRecord,
    silent: Vec<Opcode>,
}

impl DeviceSimulator {
    /// Controller with the standard layout and [`sample_record`] state
    pub fn new() -> Self {
        Self::with_state(FieldSchema::standard(), sample_record())
    }

    /// Controller with a custom layout and initial state
    pub fn with_state(schema: FieldSchema, state: TelemetryRecord) -> Self {
        Self {
            schema,
            state,
            silent: Vec::new(),
        }
    }

    /// Do not reply to `opcode`
    pub fn silent_on(mut self, opcode: Opcode) -> Self {
        self.silent.push(opcode);
        self
    }

    /// Current controller state
    pub fn state(&self) -> &TelemetryRecord {
        &self.state
    }

    /// Apply one command and build the reply frame
    pub fn handle(&mut self, data: &[u8]) -> Option<Vec<u8>> {
        let (opcode, params) = match codec::parse_command(data) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Simulator ignoring malformed command");
                return None;
            }
        };
        debug!(%opcode, ?params, "Simulator received command");
        self.apply(opcode, &params);

        if self.silent.contains(&opcode) {
            return None;
        }
        match codec::encode_telemetry(&self.schema, &self.state) {
            Ok(frame) => Some(frame.to_vec()),
            Err(e) => {
                warn!(error = %e, "Simulator cannot encode its state");
                None
            }
        }
    }

    fn apply(&mut self, opcode: Opcode, params: &[u32]) {
        let param = |i: usize| params.get(i).copied().map(i64::from).unwrap_or(0);
        let current = |state: &TelemetryRecord, key: &str| state.get(key).unwrap_or(0);

        match opcode {
            Opcode::Lighting => {
                self.state.insert("light_on", param(0));
                self.state.insert("light_lvl", param(1));
            }
            Opcode::ElevationMotor => {
                let angle = current(&self.state, "angle_elev");
                let angle = match (param(2), param(0)) {
                    (1, _) => 0,
                    (_, 1) => (angle + param(1)).min(90),
                    (_, 2) => (angle - param(1)).max(0),
                    _ => angle,
                };
                self.state.insert("angle_elev", angle);
            }
            Opcode::AzimuthMotor => {
                let angle = current(&self.state, "angle_azim");
                let angle = match (param(2), param(0)) {
                    (1, _) => 180,
                    (_, 1) => (angle + param(1)).rem_euclid(360),
                    (_, 2) => (angle - param(1)).rem_euclid(360),
                    _ => angle,
                };
                self.state.insert("angle_azim", angle);
            }
            Opcode::AutoCorrection => {
                self.state.insert("corr_mode", param(0));
                self.state.insert("corr_threshold", param(1));
                self.state.insert("corr_interval", param(2));
            }
            Opcode::DataRequest => {}
        }
    }
}

impl Default for DeviceSimulator {
    fn default() -> Self {
        Self::new()
    }
}

/// A plausible full record for the standard layout
pub fn sample_record() -> TelemetryRecord {
    TelemetryRecord::from_pairs([
        ("east", 512),
        ("west", 498),
        ("north", 505),
        ("south", 490),
        ("average", 501),
        ("v_panel", 182),
        ("v_battery", 124),
        ("c_panel", 35),
        ("c_battery", 12),
        ("charging", 1),
        ("full", 0),
        ("empty", 0),
        ("light_on", 0),
        ("light_lvl", 0),
        ("curr_elev", 0),
        ("curr_azim", 0),
        ("angle_azim", 180),
        ("angle_elev", 45),
        ("corr_mode", 2),
        ("corr_interval", 15),
        ("corr_threshold", 10),
    ])
}

/// Encoded frame for [`sample_record`]
pub fn sample_frame() -> Bytes {
    // sample_record covers every standard key
    codec::encode_telemetry(&FieldSchema::standard(), &sample_record())
        .unwrap_or_else(|_| Bytes::new())
}

/// Test fixture for creating pre-configured sessions
pub struct TestFixture {
    /// Mock link (shared with sessions built from this fixture)
    pub link: MockLink,
    /// Session configuration
    pub config: SessionConfig,
}

impl TestFixture {
    /// Fixture with a silent mock link
    pub fn new() -> Self {
        Self {
            link: MockLink::new(),
            config: SessionConfig::builder()
                .port("/dev/ttyMOCK0")
                .baud_rate(9600)
                .build(),
        }
    }

    /// Fixture whose link answers through `device`
    pub fn with_device(device: DeviceSimulator) -> Self {
        let mut fixture = Self::new();
        fixture.link = fixture.link.with_device(device);
        fixture
    }

    /// New session over the fixture's link
    pub fn session(&self) -> Session<MockLink> {
        Session::new(self.link.clone(), self.config.clone())
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use helios_core::{Command, CorrectionMode, MotorDirection, MotorMove};

    #[tokio::test]
    async fn test_mock_link_io() {
        let mut link = MockLink::new();
        assert!(matches!(
            link.read_bytes().await,
            Err(LinkError::NotConnected)
        ));

        link.open(&TestFixture::new().config).await.unwrap();
        link.queue_incoming(Bytes::from_static(b"FA1"));
        assert_eq!(link.read_bytes().await.unwrap().unwrap().as_ref(), b"FA1");
        assert!(link.read_bytes().await.unwrap().is_none());

        link.write_bytes(b"R\r").await.unwrap();
        assert_eq!(link.outgoing().len(), 1);
    }

    #[tokio::test]
    async fn test_mock_link_counts_real_closes() {
        let mut link = MockLink::new();
        link.close().await.unwrap();
        assert_eq!(link.close_calls(), 0);

        link.open(&TestFixture::new().config).await.unwrap();
        link.close().await.unwrap();
        link.close().await.unwrap();
        assert_eq!(link.open_calls(), 1);
        assert_eq!(link.close_calls(), 1);
    }

    #[test]
    fn test_sample_frame_decodes() {
        let schema = FieldSchema::standard();
        let record = codec::decode_frame(&schema, &sample_frame())
            .unwrap()
            .unwrap();
        assert_eq!(record, sample_record());
        assert!(record.is_complete(&schema));
    }

    #[test]
    fn test_simulator_applies_commands() {
        let mut device = DeviceSimulator::new();

        let elev = Command::ElevationMotor(MotorMove::new(MotorDirection::Positive, 60));
        device.handle(&elev.encode().unwrap()).unwrap();
        assert_eq!(device.state().get("angle_elev"), Some(90));

        let azim = Command::AzimuthMotor(MotorMove::new(MotorDirection::Negative, 90));
        device.handle(&azim.encode().unwrap()).unwrap();
        assert_eq!(device.state().get("angle_azim"), Some(90));

        device.handle(&Command::park(5).encode().unwrap()).unwrap();
        assert_eq!(device.state().get("angle_elev"), Some(0));

        let corr = Command::AutoCorrection {
            mode: CorrectionMode::Manual,
            threshold: 4,
            period_minutes: 30,
        };
        device.handle(&corr.encode().unwrap()).unwrap();
        assert_eq!(device.state().get("corr_mode"), Some(0));
        assert_eq!(device.state().get("corr_interval"), Some(30));
    }

    #[test]
    fn test_simulator_silent_opcode() {
        let mut device = DeviceSimulator::new().silent_on(Opcode::Lighting);
        let cmd = Command::Lighting {
            button: helios_core::LightingButton::All,
            level: 15,
        };
        assert!(device.handle(&cmd.encode().unwrap()).is_none());
        assert_eq!(device.state().get("light_lvl"), Some(15));
        assert!(device.handle(b"R\r").is_some());
    }
}
