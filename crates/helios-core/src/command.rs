//! Outbound commands
//!
//! Every command is one opcode byte followed by fixed-width, zero-padded
//! ASCII decimal parameters and the `0x0D` terminator.
//!
//! | Command | Opcode | Parameters (digits) |
//! |---------|--------|---------------------|
//! | Lighting | `0x45` (`E`) | button (2), level (2) |
//! | Elevation motor | `0x4A` (`J`) | direction (2), duration (2), parking (1) |
//! | Azimuth motor | `0x4B` (`K`) | direction (2), duration (2), parking (1) |
//! | Auto-correction | `0x4C` (`L`) | mode (2), threshold (2), period (2) |
//! | Data request | `0x52` (`R`) | none |

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::codec;
use crate::error::EncodingError;

/// Command opcode byte
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Opcode {
    /// Lighting update
    Lighting = 0x45,
    /// Elevation motor move
    ElevationMotor = 0x4A,
    /// Azimuth motor move
    AzimuthMotor = 0x4B,
    /// Automatic correction settings
    AutoCorrection = 0x4C,
    /// Telemetry request
    DataRequest = 0x52,
}

impl Opcode {
    /// All opcodes
    pub const ALL: [Opcode; 5] = [
        Opcode::Lighting,
        Opcode::ElevationMotor,
        Opcode::AzimuthMotor,
        Opcode::AutoCorrection,
        Opcode::DataRequest,
    ];

    /// Raw byte value
    pub fn as_byte(self) -> u8 {
        self as u8
    }

    /// Digit width of each positional parameter
    pub fn param_widths(self) -> &'static [usize] {
        match self {
            Opcode::Lighting => &[2, 2],
            Opcode::ElevationMotor | Opcode::AzimuthMotor => &[2, 2, 1],
            Opcode::AutoCorrection => &[2, 2, 2],
            Opcode::DataRequest => &[],
        }
    }
}

impl TryFrom<u8> for Opcode {
    type Error = EncodingError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Opcode::ALL
            .into_iter()
            .find(|op| op.as_byte() == value)
            .ok_or(EncodingError::UnknownOpcode(value))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Opcode::Lighting => "lighting",
            Opcode::ElevationMotor => "elevation-motor",
            Opcode::AzimuthMotor => "azimuth-motor",
            Opcode::AutoCorrection => "auto-correction",
            Opcode::DataRequest => "data-request",
        };
        write!(f, "{name} (0x{:02X})", self.as_byte())
    }
}

/// Which light the lighting command targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "ButtonRepr")]
pub enum LightingButton {
    /// No light selected (all off)
    None,
    /// Single LED group, 1 to 4
    Led(u8),
    /// All LEDs, dimmed by the level parameter
    All,
}

impl LightingButton {
    /// Single LED group button, rejecting groups outside 1 to 4
    pub fn led(group: u8) -> Result<Self, EncodingError> {
        match group {
            1..=4 => Ok(LightingButton::Led(group)),
            other => Err(EncodingError::InvalidLed(other)),
        }
    }

    /// Wire value of the button parameter
    pub fn code(self) -> u32 {
        match self {
            LightingButton::None => 0,
            LightingButton::Led(n) => u32::from(n),
            LightingButton::All => 5,
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "snake_case")]
enum ButtonRepr {
    None,
    Led(u8),
    All,
}

impl TryFrom<ButtonRepr> for LightingButton {
    type Error = EncodingError;

    fn try_from(repr: ButtonRepr) -> Result<Self, Self::Error> {
        match repr {
            ButtonRepr::None => Ok(LightingButton::None),
            ButtonRepr::Led(group) => LightingButton::led(group),
            ButtonRepr::All => Ok(LightingButton::All),
        }
    }
}

/// Motor direction parameter
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotorDirection {
    /// No movement (used by the parking command)
    Hold = 0,
    /// Up for elevation, right/east for azimuth
    Positive = 1,
    /// Down for elevation, left/west for azimuth
    Negative = 2,
}

/// Parameters shared by both motor commands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotorMove {
    /// Direction of travel
    pub direction: MotorDirection,
    /// Run time in seconds
    pub duration_secs: u32,
    /// Drive to the parking position
    pub parking: bool,
}

impl MotorMove {
    /// Plain move in `direction` for `duration_secs`
    pub fn new(direction: MotorDirection, duration_secs: u32) -> Self {
        Self {
            direction,
            duration_secs,
            parking: false,
        }
    }
}

/// Automatic correction mode
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrectionMode {
    /// Panel is only moved by explicit motor commands
    Manual = 0,
    /// Controller tracks the light source on its own
    Automatic = 2,
}

/// A typed outbound command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum Command {
    /// Switch lights and set their level
    Lighting {
        /// Target light(s)
        button: LightingButton,
        /// Brightness level
        level: u32,
    },
    /// Move the elevation motor
    ElevationMotor(MotorMove),
    /// Move the azimuth motor
    AzimuthMotor(MotorMove),
    /// Configure automatic correction
    AutoCorrection {
        /// Correction mode
        mode: CorrectionMode,
        /// Luminosity deviation threshold
        threshold: u32,
        /// Correction period in minutes
        period_minutes: u32,
    },
    /// Ask the controller for a telemetry frame
    DataRequest,
}

impl Command {
    /// Send the panel to its parking position
    pub fn park(duration_secs: u32) -> Self {
        Command::ElevationMotor(MotorMove {
            direction: MotorDirection::Hold,
            duration_secs,
            parking: true,
        })
    }

    /// Opcode of this command
    pub fn opcode(&self) -> Opcode {
        match self {
            Command::Lighting { .. } => Opcode::Lighting,
            Command::ElevationMotor(_) => Opcode::ElevationMotor,
            Command::AzimuthMotor(_) => Opcode::AzimuthMotor,
            Command::AutoCorrection { .. } => Opcode::AutoCorrection,
            Command::DataRequest => Opcode::DataRequest,
        }
    }

    /// Positional parameter values, in wire order
    pub fn params(&self) -> Vec<u32> {
        match *self {
            Command::Lighting { button, level } => vec![button.code(), level],
            Command::ElevationMotor(m) | Command::AzimuthMotor(m) => vec![
                m.direction as u32,
                m.duration_secs,
                u32::from(m.parking),
            ],
            Command::AutoCorrection {
                mode,
                threshold,
                period_minutes,
            } => vec![mode as u32, threshold, period_minutes],
            Command::DataRequest => Vec::new(),
        }
    }

    /// Encode into the exact byte sequence the controller expects
    pub fn encode(&self) -> Result<Bytes, EncodingError> {
        if let Command::Lighting {
            button: LightingButton::Led(group),
            ..
        } = *self
        {
            LightingButton::led(group)?;
        }
        codec::encode(self.opcode(), &self.params())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opcode_roundtrip_byte() {
        for op in Opcode::ALL {
            assert_eq!(Opcode::try_from(op.as_byte()).unwrap(), op);
        }
        assert_eq!(
            Opcode::try_from(0x00),
            Err(EncodingError::UnknownOpcode(0x00))
        );
    }

    #[test]
    fn test_park_command_params() {
        let cmd = Command::park(5);
        assert_eq!(cmd.opcode(), Opcode::ElevationMotor);
        assert_eq!(cmd.params(), vec![0, 5, 1]);
    }

    #[test]
    fn test_correction_params() {
        let cmd = Command::AutoCorrection {
            mode: CorrectionMode::Automatic,
            threshold: 4,
            period_minutes: 15,
        };
        assert_eq!(cmd.params(), vec![2, 4, 15]);
    }

    #[test]
    fn test_led_group_range() {
        assert_eq!(LightingButton::led(4), Ok(LightingButton::Led(4)));
        assert_eq!(LightingButton::led(0), Err(EncodingError::InvalidLed(0)));
        assert_eq!(LightingButton::led(5), Err(EncodingError::InvalidLed(5)));
    }

    #[test]
    fn test_out_of_range_led_rejected() {
        let json = r#"{"command":"lighting","button":{"led":5},"level":3}"#;
        assert!(serde_json::from_str::<Command>(json).is_err());
        assert!(serde_json::from_str::<LightingButton>(r#"{"led":0}"#).is_err());
        assert_eq!(
            serde_json::from_str::<LightingButton>(r#"{"led":2}"#).unwrap(),
            LightingButton::Led(2)
        );
        assert_eq!(
            serde_json::from_str::<LightingButton>(r#""all""#).unwrap(),
            LightingButton::All
        );

        let cmd = Command::Lighting {
            button: LightingButton::Led(0),
            level: 3,
        };
        assert_eq!(cmd.encode(), Err(EncodingError::InvalidLed(0)));
    }

    #[test]
    fn test_opcode_display() {
        assert_eq!(Opcode::Lighting.to_string(), "lighting (0x45)");
    }
}
