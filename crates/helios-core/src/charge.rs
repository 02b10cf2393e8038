//! Battery charge state remap
//!
//! The controller reports charge as three independent flags. Consumers that
//! care about charge (the remote mirror in particular) want a single value,
//! so the flags are collapsed here.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::record::TelemetryRecord;

/// Keys of the raw charge flags, in wire order
pub const CHARGE_FLAG_KEYS: [&str; 3] = ["charging", "full", "empty"];

/// Collapsed battery charge state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeState {
    /// Battery is charging
    Charging,
    /// Battery is full
    Full,
    /// Battery is empty
    Empty,
    /// No flag set, several flags set, or flags not reported
    #[default]
    Unknown,
}

impl ChargeState {
    /// Collapse the three flags; `None` means the flag was not reported
    ///
    /// Exactly one set flag selects its state. Anything else is `Unknown`.
    pub fn from_flags(charging: Option<bool>, full: Option<bool>, empty: Option<bool>) -> Self {
        let set = |flag: Option<bool>| flag.unwrap_or(false);
        match (set(charging), set(full), set(empty)) {
            (true, false, false) => ChargeState::Charging,
            (false, true, false) => ChargeState::Full,
            (false, false, true) => ChargeState::Empty,
            _ => ChargeState::Unknown,
        }
    }

    /// Collapse the flags carried by a record (non-zero means set)
    pub fn from_record(record: &TelemetryRecord) -> Self {
        let flag = |key: &str| record.get(key).map(|v| v != 0);
        Self::from_flags(flag("charging"), flag("full"), flag("empty"))
    }

    /// Lowercase wire name
    pub fn as_str(self) -> &'static str {
        match self {
            ChargeState::Charging => "charging",
            ChargeState::Full => "full",
            ChargeState::Empty => "empty",
            ChargeState::Unknown => "unknown",
        }
    }
}

impl fmt::Display for ChargeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_flag_combinations() {
        for bits in 0u8..8 {
            let charging = bits & 0b001 != 0;
            let full = bits & 0b010 != 0;
            let empty = bits & 0b100 != 0;
            let state = ChargeState::from_flags(Some(charging), Some(full), Some(empty));

            let expected = match bits.count_ones() {
                1 if charging => ChargeState::Charging,
                1 if full => ChargeState::Full,
                1 => ChargeState::Empty,
                _ => ChargeState::Unknown,
            };
            assert_eq!(state, expected, "flags {bits:03b}");
        }
    }

    #[test]
    fn test_absent_flags_are_unknown() {
        assert_eq!(ChargeState::from_flags(None, None, None), ChargeState::Unknown);
        assert_eq!(
            ChargeState::from_record(&TelemetryRecord::new()),
            ChargeState::Unknown
        );
    }

    #[test]
    fn test_from_record() {
        let record = TelemetryRecord::from_pairs([("charging", 0), ("full", 1), ("empty", 0)]);
        assert_eq!(ChargeState::from_record(&record), ChargeState::Full);
    }

    #[test]
    fn test_serde_lowercase() {
        assert_eq!(
            serde_json::to_string(&ChargeState::Charging).unwrap(),
            r#""charging""#
        );
        let state: ChargeState = serde_json::from_str(r#""unknown""#).unwrap();
        assert_eq!(state, ChargeState::Unknown);
    }
}
