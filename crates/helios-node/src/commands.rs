//! One-shot panel commands as CLI subcommands

use clap::{Subcommand, ValueEnum};
use helios_core::{Command, CorrectionMode, LightingButton, MotorDirection, MotorMove};

/// Command sent by `helios-node send`
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum PanelCommand {
    /// Switch lights and set their level
    Light {
        /// 1-4 for one LED group, `all`, or `off`
        #[arg(long, value_parser = parse_button)]
        button: LightingButton,
        /// Brightness level (0-15)
        #[arg(long, default_value_t = 15)]
        level: u32,
    },
    /// Move the elevation motor
    Elevation {
        /// Direction of travel
        #[arg(long, value_enum)]
        direction: Vertical,
        /// Run time in seconds
        #[arg(long, default_value_t = 1)]
        duration: u32,
    },
    /// Move the azimuth motor
    Azimuth {
        /// Direction of travel
        #[arg(long, value_enum)]
        direction: Horizontal,
        /// Run time in seconds
        #[arg(long, default_value_t = 1)]
        duration: u32,
    },
    /// Drive the panel to its parking position
    Park {
        /// Run time in seconds
        #[arg(long, default_value_t = 1)]
        duration: u32,
    },
    /// Configure automatic correction
    Correction {
        /// Correction mode
        #[arg(long, value_enum)]
        mode: Mode,
        /// Luminosity deviation threshold
        #[arg(long, default_value_t = 0)]
        threshold: u32,
        /// Correction period in minutes
        #[arg(long, default_value_t = 0)]
        period: u32,
    },
    /// Request one telemetry frame
    Request,
}

/// Elevation direction
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Vertical {
    /// Raise the panel
    Up,
    /// Lower the panel
    Down,
}

/// Azimuth direction
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Horizontal {
    /// Turn east
    Right,
    /// Turn west
    Left,
}

/// Correction mode
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Only explicit motor commands move the panel
    Manual,
    /// Controller tracks the light on its own
    Auto,
}

impl PanelCommand {
    /// Typed command for the wire
    pub fn to_command(&self) -> Command {
        match *self {
            PanelCommand::Light { button, level } => Command::Lighting { button, level },
            PanelCommand::Elevation {
                direction,
                duration,
            } => {
                let direction = match direction {
                    Vertical::Up => MotorDirection::Positive,
                    Vertical::Down => MotorDirection::Negative,
                };
                Command::ElevationMotor(MotorMove::new(direction, duration))
            }
            PanelCommand::Azimuth {
                direction,
                duration,
            } => {
                let direction = match direction {
                    Horizontal::Right => MotorDirection::Positive,
                    Horizontal::Left => MotorDirection::Negative,
                };
                Command::AzimuthMotor(MotorMove::new(direction, duration))
            }
            PanelCommand::Park { duration } => Command::park(duration),
            PanelCommand::Correction {
                mode,
                threshold,
                period,
            } => Command::AutoCorrection {
                mode: match mode {
                    Mode::Manual => CorrectionMode::Manual,
                    Mode::Auto => CorrectionMode::Automatic,
                },
                threshold,
                period_minutes: period,
            },
            PanelCommand::Request => Command::DataRequest,
        }
    }
}

fn parse_button(text: &str) -> Result<LightingButton, String> {
    match text.to_ascii_lowercase().as_str() {
        "all" => Ok(LightingButton::All),
        "off" | "none" | "0" => Ok(LightingButton::None),
        other => other
            .parse::<u8>()
            .ok()
            .and_then(|n| LightingButton::led(n).ok())
            .ok_or_else(|| format!("expected 1-4, `all` or `off`, got `{text}`")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_button() {
        assert_eq!(parse_button("ALL"), Ok(LightingButton::All));
        assert_eq!(parse_button("off"), Ok(LightingButton::None));
        assert_eq!(parse_button("3"), Ok(LightingButton::Led(3)));
        assert!(parse_button("5").is_err());
        assert!(parse_button("left").is_err());
    }

    #[test]
    fn test_motor_directions() {
        let cmd = PanelCommand::Azimuth {
            direction: Horizontal::Left,
            duration: 4,
        }
        .to_command();
        assert_eq!(cmd.encode().unwrap().as_ref(), b"K02040\r");

        let cmd = PanelCommand::Park { duration: 2 }.to_command();
        assert_eq!(cmd.encode().unwrap().as_ref(), b"J00021\r");
    }

    #[test]
    fn test_correction_mode() {
        let cmd = PanelCommand::Correction {
            mode: Mode::Auto,
            threshold: 5,
            period: 10,
        }
        .to_command();
        assert_eq!(cmd.encode().unwrap().as_ref(), b"L020510\r");
    }
}
