//! Parsed feature records.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::geometry::FeatureGeometry;
use crate::value::FieldValue;

/// A typed feature ready for persistence.
///
/// Records only exist with an identifier and a valid geometry; the parser
/// drops anything else before a record is built.
#[derive(Debug, Clone, PartialEq)]
pub struct FeatureRecord {
    /// Primary identifier, also present in `fields` under the layer's
    /// identifier column.
    pub id: i64,
    /// Converted attributes keyed by target column.
    pub fields: BTreeMap<&'static str, FieldValue>,
    /// Assembled geometry.
    pub geometry: FeatureGeometry,
}

impl FeatureRecord {
    /// Value stored under `column`, if the source supplied a convertible one.
    #[must_use]
    pub fn get(&self, column: &str) -> Option<&FieldValue> {
        self.fields.get(column)
    }

    /// Timestamp stored under `column`.
    #[must_use]
    pub fn timestamp(&self, column: &str) -> Option<&DateTime<Utc>> {
        self.get(column).and_then(FieldValue::as_timestamp)
    }
}
