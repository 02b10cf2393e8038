//! Telemetry field schema
//!
//! The telemetry payload carries no field names and no length prefix: each
//! value is identified purely by its position. A [`FieldSchema`] is the
//! ordered list of `(key, width, skip)` entries that maps byte offsets to
//! semantic keys.
//!
//! # Layout versions
//!
//! Several payload layouts have shipped on the controller over time and the
//! wire carries no version tag. [`FieldSchema::standard`] is the current
//! (richest) layout; older layouts can be described with [`FieldSchema::new`].
//! A payload whose length does not match the configured schema is still
//! decoded positionally, so a controller running a different firmware will
//! produce wrong values rather than an error.

use std::collections::HashSet;
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::error::SchemaError;

/// One positional field of the telemetry payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Semantic key (e.g. `east`, `angle_azim`)
    pub key: String,
    /// Width of the value in bytes
    pub width: usize,
    /// Reserved bytes following the value
    #[serde(default)]
    pub skip: usize,
}

impl FieldSpec {
    /// Field with no trailing reserved bytes
    pub fn new(key: impl Into<String>, width: usize) -> Self {
        Self {
            key: key.into(),
            width,
            skip: 0,
        }
    }

    /// Field followed by `skip` reserved bytes
    pub fn with_skip(key: impl Into<String>, width: usize, skip: usize) -> Self {
        Self {
            key: key.into(),
            width,
            skip,
        }
    }
}

/// Standard layout: (key, width, skip)
const STANDARD_LAYOUT: &[(&str, usize, usize)] = &[
    // luminosity sensors
    ("east", 3, 0),
    ("west", 3, 0),
    ("north", 3, 0),
    ("south", 3, 0),
    ("average", 3, 8),
    // energy
    ("v_panel", 3, 0),
    ("v_battery", 3, 0),
    ("c_panel", 3, 0),
    ("c_battery", 3, 0),
    ("charging", 2, 0),
    ("full", 2, 0),
    ("empty", 2, 0),
    // lighting
    ("light_on", 3, 0),
    ("light_lvl", 3, 0),
    // motors
    ("curr_elev", 3, 0),
    ("curr_azim", 3, 6),
    ("angle_azim", 3, 0),
    ("angle_elev", 3, 2),
    // automatic correction
    ("corr_mode", 2, 0),
    ("corr_interval", 3, 0),
    ("corr_threshold", 3, 0),
];

/// Ordered positional layout of the telemetry payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<FieldSpec>", into = "Vec<FieldSpec>")]
pub struct FieldSchema {
    fields: Vec<FieldSpec>,
}

impl FieldSchema {
    /// Build a schema from an ordered list of fields
    pub fn new(fields: Vec<FieldSpec>) -> Result<Self, SchemaError> {
        if fields.is_empty() {
            return Err(SchemaError::Empty);
        }

        let mut seen = HashSet::with_capacity(fields.len());
        for (index, field) in fields.iter().enumerate() {
            if field.key.is_empty() {
                return Err(SchemaError::EmptyKey(index));
            }
            if field.width == 0 {
                return Err(SchemaError::ZeroWidth(field.key.clone()));
            }
            if !seen.insert(field.key.as_str()) {
                return Err(SchemaError::DuplicateKey(field.key.clone()));
            }
        }

        Ok(Self { fields })
    }

    /// The current controller layout (21 fields, 75 payload bytes)
    pub fn standard() -> Self {
        Self {
            fields: STANDARD_LAYOUT
                .iter()
                .map(|&(key, width, skip)| FieldSpec::with_skip(key, width, skip))
                .collect(),
        }
    }

    /// Fields in wire order
    pub fn fields(&self) -> &[FieldSpec] {
        &self.fields
    }

    /// Number of fields
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Whether the schema has no fields (never true for a validated schema)
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Keys in wire order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.iter().map(|f| f.key.as_str())
    }

    /// Whether the schema declares `key`
    pub fn contains(&self, key: &str) -> bool {
        self.fields.iter().any(|f| f.key == key)
    }

    /// Total payload length: sum of `width + skip` over all fields
    pub fn payload_len(&self) -> usize {
        self.fields.iter().map(|f| f.width + f.skip).sum()
    }

    /// Byte range of each field's value within the payload
    ///
    /// Computed in one walk, accumulating `width + skip`. Skip bytes are not
    /// part of any range.
    pub fn decode_offsets(&self) -> Vec<(&str, Range<usize>)> {
        let mut offset = 0;
        self.fields
            .iter()
            .map(|field| {
                let range = offset..offset + field.width;
                offset += field.width + field.skip;
                (field.key.as_str(), range)
            })
            .collect()
    }
}

impl Default for FieldSchema {
    fn default() -> Self {
        Self::standard()
    }
}

impl TryFrom<Vec<FieldSpec>> for FieldSchema {
    type Error = SchemaError;

    fn try_from(fields: Vec<FieldSpec>) -> Result<Self, Self::Error> {
        Self::new(fields)
    }
}

impl From<FieldSchema> for Vec<FieldSpec> {
    fn from(schema: FieldSchema) -> Self {
        schema.fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_payload_len() {
        let schema = FieldSchema::standard();
        assert_eq!(schema.len(), 21);
        assert_eq!(schema.payload_len(), 75);
    }

    #[test]
    fn test_offsets_account_for_skip() {
        let schema = FieldSchema::standard();
        let offsets = schema.decode_offsets();

        assert_eq!(offsets[0], ("east", 0..3));
        assert_eq!(offsets[4], ("average", 12..15));
        // 8 reserved bytes after `average`
        assert_eq!(offsets[5], ("v_panel", 23..26));

        let (key, last) = offsets.last().unwrap();
        assert_eq!(*key, "corr_threshold");
        assert_eq!(last.end, schema.payload_len());
    }

    #[test]
    fn test_rejects_duplicate_key() {
        let err = FieldSchema::new(vec![FieldSpec::new("a", 2), FieldSpec::new("a", 3)]);
        assert_eq!(err, Err(SchemaError::DuplicateKey("a".to_string())));
    }

    #[test]
    fn test_rejects_zero_width_and_empty() {
        assert_eq!(FieldSchema::new(vec![]), Err(SchemaError::Empty));
        assert_eq!(
            FieldSchema::new(vec![FieldSpec::new("x", 0)]),
            Err(SchemaError::ZeroWidth("x".to_string()))
        );
        assert_eq!(
            FieldSchema::new(vec![FieldSpec::new("", 1)]),
            Err(SchemaError::EmptyKey(0))
        );
    }

    #[test]
    fn test_schema_serde_validates() {
        let json = r#"[{"key":"a","width":2},{"key":"b","width":3,"skip":1}]"#;
        let schema: FieldSchema = serde_json::from_str(json).unwrap();
        assert_eq!(schema.payload_len(), 6);

        let bad = r#"[{"key":"a","width":0}]"#;
        assert!(serde_json::from_str::<FieldSchema>(bad).is_err());
    }
}
