//! Mirror wire format
//!
//! A flat JSON object: the telemetry fields plus `charge_state`, with the
//! three raw charge flags removed. Records read back from the mirror also
//! carry `id` and `date`. The mirror stores rows in a SQL table and returns
//! numeric columns as strings, so reading accepts both.

use std::collections::BTreeMap;

use helios_core::{ChargeState, TelemetryRecord, CHARGE_FLAG_KEYS};
use helios_link::TelemetryUpdate;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One telemetry record as stored by the mirror
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawMirrorRecord")]
pub struct MirrorRecord {
    /// Row id assigned by the mirror
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<u64>,
    /// Insert timestamp assigned by the mirror
    #[serde(skip_serializing_if = "Option::is_none")]
    pub date: Option<String>,
    /// Collapsed charge flags
    pub charge_state: ChargeState,
    /// Remaining numeric fields
    #[serde(flatten)]
    pub fields: BTreeMap<String, i64>,
}

impl MirrorRecord {
    /// Build the outbound record for a distributed update
    pub fn from_update(update: &TelemetryUpdate) -> Self {
        Self::with_charge(&update.record, update.charge_state)
    }

    /// Build the outbound record, collapsing the flags carried by `record`
    pub fn from_record(record: &TelemetryRecord) -> Self {
        Self::with_charge(record, ChargeState::from_record(record))
    }

    fn with_charge(record: &TelemetryRecord, charge_state: ChargeState) -> Self {
        let fields = record
            .iter()
            .filter(|(key, _)| !CHARGE_FLAG_KEYS.contains(key))
            .map(|(key, value)| (key.to_string(), value))
            .collect();
        Self {
            id: None,
            date: None,
            charge_state,
            fields,
        }
    }

    /// Value of a numeric field
    pub fn get(&self, key: &str) -> Option<i64> {
        self.fields.get(key).copied()
    }

    /// Expand back into a telemetry record
    ///
    /// A known charge state becomes the three flags again; `unknown` leaves
    /// them absent since the original combination cannot be recovered.
    pub fn to_record(&self) -> TelemetryRecord {
        let mut record =
            TelemetryRecord::from_pairs(self.fields.iter().map(|(k, v)| (k.as_str(), *v)));
        let set = match self.charge_state {
            ChargeState::Charging => Some(0),
            ChargeState::Full => Some(1),
            ChargeState::Empty => Some(2),
            ChargeState::Unknown => None,
        };
        if let Some(set) = set {
            for (index, key) in CHARGE_FLAG_KEYS.iter().enumerate() {
                record.insert(*key, i64::from(index == set));
            }
        }
        record
    }
}

/// Reply to a successful `POST /frames`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorAck {
    /// Id of the stored row
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<u64>,
    /// Human readable status
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Deserialize)]
struct RawMirrorRecord {
    #[serde(default)]
    id: Option<Value>,
    #[serde(default)]
    date: Option<Value>,
    #[serde(default)]
    charge_state: Option<Value>,
    #[serde(flatten)]
    rest: Map<String, Value>,
}

impl TryFrom<RawMirrorRecord> for MirrorRecord {
    type Error = String;

    fn try_from(raw: RawMirrorRecord) -> Result<Self, Self::Error> {
        let id = match raw.id {
            None | Some(Value::Null) => None,
            Some(value) => Some(as_u64(&value).ok_or_else(|| format!("invalid id {value}"))?),
        };
        let date = match raw.date {
            Some(Value::String(date)) => Some(date),
            _ => None,
        };
        let charge_state = match raw.charge_state {
            Some(Value::String(state)) => parse_charge_state(&state),
            _ => ChargeState::Unknown,
        };

        // Columns that are not numeric are not telemetry
        let fields = raw
            .rest
            .iter()
            .filter(|(key, _)| !CHARGE_FLAG_KEYS.contains(&key.as_str()))
            .filter_map(|(key, value)| as_i64(value).map(|v| (key.clone(), v)))
            .collect();

        Ok(Self {
            id,
            date,
            charge_state,
            fields,
        })
    }
}

fn parse_charge_state(text: &str) -> ChargeState {
    match text {
        "charging" => ChargeState::Charging,
        "full" => ChargeState::Full,
        "empty" => ChargeState::Empty,
        _ => ChargeState::Unknown,
    }
}

fn as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(as_u64))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> TelemetryRecord {
        TelemetryRecord::from_pairs([
            ("east", 512),
            ("v_panel", 182),
            ("charging", 0),
            ("full", 0),
            ("empty", 1),
            ("angle_elev", 45),
        ])
    }

    #[test]
    fn test_flags_are_collapsed() {
        let mirror = MirrorRecord::from_record(&record());
        assert_eq!(mirror.charge_state, ChargeState::Empty);
        assert_eq!(mirror.fields.len(), 3);
        assert!(CHARGE_FLAG_KEYS.iter().all(|k| mirror.get(k).is_none()));

        let json = serde_json::to_value(&mirror).unwrap();
        assert_eq!(
            json,
            json!({
                "charge_state": "empty",
                "east": 512,
                "v_panel": 182,
                "angle_elev": 45,
            })
        );
    }

    #[test]
    fn test_from_update_uses_update_charge() {
        let update = TelemetryUpdate::new(record());
        let mirror = MirrorRecord::from_update(&update);
        assert_eq!(mirror.charge_state, ChargeState::Empty);
        assert_eq!(mirror.get("east"), Some(512));
    }

    #[test]
    fn test_reads_stringly_rows() {
        let row = json!({
            "id": "17",
            "date": "2025-03-02 10:15:00",
            "east": "512",
            "v_panel": 182,
            "charge_state": "charging",
            "note": "hand entered",
        });
        let mirror: MirrorRecord = serde_json::from_value(row).unwrap();
        assert_eq!(mirror.id, Some(17));
        assert_eq!(mirror.date.as_deref(), Some("2025-03-02 10:15:00"));
        assert_eq!(mirror.charge_state, ChargeState::Charging);
        assert_eq!(mirror.get("east"), Some(512));
        assert_eq!(mirror.get("v_panel"), Some(182));
        assert_eq!(mirror.get("note"), None);
    }

    #[test]
    fn test_unknown_charge_state_text() {
        let mirror: MirrorRecord =
            serde_json::from_value(json!({"charge_state": "draining"})).unwrap();
        assert_eq!(mirror.charge_state, ChargeState::Unknown);
    }

    #[test]
    fn test_invalid_id_is_rejected() {
        let result = serde_json::from_value::<MirrorRecord>(json!({"id": "abc"}));
        assert!(result.is_err());
    }

    #[test]
    fn test_to_record_restores_flags() {
        let restored = MirrorRecord::from_record(&record()).to_record();
        assert_eq!(restored.get("empty"), Some(1));
        assert_eq!(restored.get("charging"), Some(0));
        assert_eq!(ChargeState::from_record(&restored), ChargeState::Empty);

        let mut unknown = MirrorRecord::from_record(&record());
        unknown.charge_state = ChargeState::Unknown;
        assert!(!unknown.to_record().contains("full"));
    }

    #[test]
    fn test_ack_accepts_string_id() {
        let ack: MirrorAck =
            serde_json::from_value(json!({"message": "Data created", "id": "42"})).unwrap();
        assert_eq!(ack.id, Some(42));
    }
}
