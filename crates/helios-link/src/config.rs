//! Session configuration
//!
//! Port, baud rate and read timeout for the serial session, plus the period
//! of the background poller.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{LinkError, Result};
use crate::ports::PortResolver;

/// Default baud rate of the panel controller
pub const DEFAULT_BAUD_RATE: u32 = 9600;

/// Default read timeout in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Upper bound for the read timeout in milliseconds
pub const MAX_TIMEOUT_MS: u64 = 60_000;

/// Default poll period in milliseconds
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 2000;

/// Shortest accepted poll period in milliseconds
pub const MIN_POLL_INTERVAL_MS: u64 = 1000;

/// Longest accepted poll period in milliseconds
pub const MAX_POLL_INTERVAL_MS: u64 = 10_000;

/// Baud rates offered for the controller, fastest first
pub const SUPPORTED_BAUD_RATES: [u32; 7] = [115_200, 57_600, 38_400, 19_200, 9600, 1200, 300];

/// Serial session configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Port identifier (e.g. `/dev/ttyUSB0` or `COM3`)
    #[serde(default)]
    pub port: Option<String>,

    /// Baud rate
    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    /// Maximum wait for a complete reply frame
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// Period of the background poller
    #[serde(with = "humantime_serde", default = "default_poll_interval")]
    pub poll_interval: Duration,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}

fn default_timeout() -> Duration {
    Duration::from_millis(DEFAULT_TIMEOUT_MS)
}

fn default_poll_interval() -> Duration {
    Duration::from_millis(DEFAULT_POLL_INTERVAL_MS)
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            port: None,
            baud_rate: default_baud_rate(),
            timeout: default_timeout(),
            poll_interval: default_poll_interval(),
        }
    }
}

impl SessionConfig {
    /// Create a builder
    pub fn builder() -> SessionConfigBuilder {
        SessionConfigBuilder::new()
    }

    /// Defaults, with the port chosen by `resolver`
    pub fn from_resolver(resolver: &dyn PortResolver) -> Self {
        Self {
            port: resolver.default_port(),
            ..Self::default()
        }
    }

    /// Whether `other` opens the port the same way
    ///
    /// The poll period is not a port setting, so changing it alone never
    /// reopens the link.
    pub fn same_link(&self, other: &SessionConfig) -> bool {
        self.port == other.port
            && self.baud_rate == other.baud_rate
            && self.timeout == other.timeout
    }

    /// Check the settings before they are applied to a session
    ///
    /// Baud rates outside [`SUPPORTED_BAUD_RATES`] are accepted with a
    /// warning since some controller firmwares run at other speeds.
    pub fn validate(&self) -> Result<()> {
        if let Some(port) = &self.port {
            if port.trim().is_empty() {
                return Err(LinkError::InvalidConfig("port name is empty".into()));
            }
        }
        if self.baud_rate == 0 {
            return Err(LinkError::InvalidConfig(
                "baud rate must be positive".into(),
            ));
        }
        if !SUPPORTED_BAUD_RATES.contains(&self.baud_rate) {
            tracing::warn!(baud_rate = self.baud_rate, "Non-standard baud rate");
        }
        if self.timeout > Duration::from_millis(MAX_TIMEOUT_MS) {
            return Err(LinkError::InvalidConfig(format!(
                "timeout {} exceeds {}ms",
                humantime::format_duration(self.timeout),
                MAX_TIMEOUT_MS
            )));
        }
        let poll = self.poll_interval.as_millis();
        if poll < u128::from(MIN_POLL_INTERVAL_MS) || poll > u128::from(MAX_POLL_INTERVAL_MS) {
            return Err(LinkError::InvalidConfig(format!(
                "poll interval must be within {MIN_POLL_INTERVAL_MS}..={MAX_POLL_INTERVAL_MS}ms"
            )));
        }
        Ok(())
    }
}

/// Builder for SessionConfig
#[derive(Debug, Default)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the serial port
    pub fn port(mut self, port: impl Into<String>) -> Self {
        self.config.port = Some(port.into());
        self
    }

    /// Set the baud rate
    pub fn baud_rate(mut self, baud_rate: u32) -> Self {
        self.config.baud_rate = baud_rate;
        self
    }

    /// Set the read timeout (clamped to 60s)
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout.min(Duration::from_millis(MAX_TIMEOUT_MS));
        self
    }

    /// Set the poll period (clamped to 1s..=10s)
    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval.clamp(
            Duration::from_millis(MIN_POLL_INTERVAL_MS),
            Duration::from_millis(MAX_POLL_INTERVAL_MS),
        );
        self
    }

    /// Build the configuration
    pub fn build(self) -> SessionConfig {
        self.config
    }
}

/// Serde adapter writing a `Duration` as a humantime string (`"1s 500ms"`)
///
/// Use with `#[serde(with = "helios_link::config::humantime_serde")]`.
pub mod humantime_serde {
    use serde::{self, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    /// Serialize as a humantime string
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let s = humantime::format_duration(*duration).to_string();
        serializer.serialize_str(&s)
    }

    /// Parse a humantime string such as `250ms` or `2s`
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        humantime::parse_duration(&s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::StaticPortResolver;

    #[test]
    fn test_default_config() {
        let config = SessionConfig::default();
        assert_eq!(config.port, None);
        assert_eq!(config.baud_rate, 9600);
        assert_eq!(config.timeout, Duration::from_secs(1));
        assert_eq!(config.poll_interval, Duration::from_secs(2));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder_clamps() {
        let config = SessionConfig::builder()
            .port("/dev/ttyUSB0")
            .baud_rate(115_200)
            .timeout(Duration::from_secs(120))
            .poll_interval(Duration::from_millis(10))
            .build();

        assert_eq!(config.port.as_deref(), Some("/dev/ttyUSB0"));
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_same_link_ignores_poll_interval() {
        let base = SessionConfig::builder().port("/dev/ttyUSB0").build();

        let mut slower = base.clone();
        slower.poll_interval = Duration::from_secs(5);
        assert!(base.same_link(&slower));

        let mut faster_port = base.clone();
        faster_port.baud_rate = 115_200;
        assert!(!base.same_link(&faster_port));

        let mut longer = base.clone();
        longer.timeout = Duration::from_secs(3);
        assert!(!base.same_link(&longer));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = SessionConfig::default();
        config.baud_rate = 0;
        assert!(matches!(config.validate(), Err(LinkError::InvalidConfig(_))));

        let mut config = SessionConfig::default();
        config.timeout = Duration::from_secs(61);
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.poll_interval = Duration::from_millis(500);
        assert!(config.validate().is_err());

        let mut config = SessionConfig::default();
        config.port = Some("  ".into());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_is_valid() {
        let mut config = SessionConfig::default();
        config.timeout = Duration::ZERO;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_resolver_picks_highest_port() {
        let resolver = StaticPortResolver::new(["COM1", "COM10", "COM3"]);
        let config = SessionConfig::from_resolver(&resolver);
        assert_eq!(config.port.as_deref(), Some("COM10"));
    }

    #[test]
    fn test_serde_humantime() {
        let json = r#"{"port":"/dev/ttyACM0","timeout":"500ms","poll_interval":"5s"}"#;
        let config: SessionConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.baud_rate, DEFAULT_BAUD_RATE);
        assert_eq!(config.timeout, Duration::from_millis(500));
        assert_eq!(config.poll_interval, Duration::from_secs(5));

        let out = serde_json::to_string(&config).unwrap();
        assert!(out.contains(r#""timeout":"500ms""#));
    }
}
