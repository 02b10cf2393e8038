//! Decoded telemetry snapshot

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::schema::FieldSchema;

/// One snapshot of panel state, decoded from a single frame
///
/// Fields keep wire order. A key that is absent means "unknown"; it is never
/// filled in with a default value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TelemetryRecord {
    fields: Vec<(String, i64)>,
}

impl TelemetryRecord {
    /// Empty record
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a record from `(key, value)` pairs, keeping their order
    pub fn from_pairs<K, I>(pairs: I) -> Self
    where
        K: Into<String>,
        I: IntoIterator<Item = (K, i64)>,
    {
        let mut record = Self::new();
        for (key, value) in pairs {
            record.insert(key, value);
        }
        record
    }

    /// Set `key`, replacing an existing value in place
    pub fn insert(&mut self, key: impl Into<String>, value: i64) {
        let key = key.into();
        match self.fields.iter_mut().find(|(k, _)| *k == key) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((key, value)),
        }
    }

    /// Value of `key`, or `None` when the field was not decoded
    pub fn get(&self, key: &str) -> Option<i64> {
        self.fields
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, value)| *value)
    }

    /// Whether `key` was decoded
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Number of decoded fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether no field was decoded
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Decoded keys in wire order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|(k, _)| k.as_str())
    }

    /// `(key, value)` pairs in wire order
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Schema keys that this record does not carry
    pub fn missing_keys<'a>(&self, schema: &'a FieldSchema) -> Vec<&'a str> {
        schema.keys().filter(|key| !self.contains(key)).collect()
    }

    /// Whether every schema key was decoded
    pub fn is_complete(&self, schema: &FieldSchema) -> bool {
        schema.keys().all(|key| self.contains(key))
    }
}

impl Serialize for TelemetryRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}
