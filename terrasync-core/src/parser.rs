//! Convert decoded feature elements into [`FeatureRecord`]s.
//!
//! Parsing never fails. Field conversion problems drop the field; a missing
//! identifier or an unusable geometry drops the feature with a
//! [`DropReason`]. Both are reported back so callers can count them.

use std::collections::BTreeMap;

use log::warn;

use crate::geometry::{GeometryError, RawGeometry, assemble_geometry};
use crate::layer::LayerSchema;
use crate::record::FeatureRecord;
use crate::value::{FieldValue, clean_value};

/// One decoded feature element before conversion.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawFeature {
    /// Scalar children as `(local name, text)` in document order.
    pub fields: Vec<(String, String)>,
    /// Geometry markup, when the feature carried a geometry property.
    pub geometry: Option<RawGeometry>,
}

impl RawFeature {
    /// Text of the first scalar child called `name`.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// Why a feature was dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DropReason {
    /// No convertible identifier was present.
    MissingIdentifier,
    /// No geometry property or coordinate list was present.
    MissingGeometry,
    /// Geometry was present but unusable.
    InvalidGeometry(GeometryError),
}

impl DropReason {
    /// Whether the drop is attributable to bad geometry.
    #[must_use]
    pub const fn is_invalid_geometry(&self) -> bool {
        matches!(self, Self::InvalidGeometry(_))
    }
}

/// Result of parsing one feature.
#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    /// The feature produced a record.
    Accepted(FeatureRecord),
    /// The feature was discarded.
    Dropped(DropReason),
}

/// Parse outcome plus the number of fields that failed conversion.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedFeature {
    /// Accepted record or drop reason.
    pub outcome: ParseOutcome,
    /// Fields dropped because their text did not convert.
    pub dropped_fields: usize,
}

/// Applies a layer's field table and geometry rules to raw features.
#[derive(Debug, Clone, Copy)]
pub struct FeatureParser {
    schema: LayerSchema,
}

impl FeatureParser {
    /// Create a parser for `schema`.
    #[must_use]
    pub const fn new(schema: LayerSchema) -> Self {
        Self { schema }
    }

    /// Layer this parser targets.
    #[must_use]
    pub const fn schema(&self) -> &LayerSchema {
        &self.schema
    }

    /// Convert one raw feature.
    ///
    /// # Examples
    ///
    /// ```
    /// use terrasync_core::{
    ///     FeatureParser, FieldMapping, LayerSchema, ParseOutcome, RawFeature, RawGeometry,
    /// };
    ///
    /// static FIELDS: &[FieldMapping] = &[
    ///     FieldMapping::integer("ident", "id"),
    ///     FieldMapping::timestamp("updated", "updated_at"),
    /// ];
    /// let parser = FeatureParser::new(LayerSchema {
    ///     table: "parcels",
    ///     id_field: "id",
    ///     version_field: "updated_at",
    ///     srid: 25832,
    ///     fields: FIELDS,
    /// });
    /// let raw = RawFeature {
    ///     fields: vec![("ident".into(), "7".into()), ("updated".into(), "soon".into())],
    ///     geometry: Some(RawGeometry {
    ///         srs_name: None,
    ///         pos_lists: vec!["0 0 0 1 0 0 1 1 0 0 1 0 0 0 0".into()],
    ///     }),
    /// };
    /// let parsed = parser.parse(&raw);
    /// assert_eq!(parsed.dropped_fields, 1);
    /// assert!(matches!(parsed.outcome, ParseOutcome::Accepted(record) if record.id == 7));
    /// ```
    #[must_use]
    pub fn parse(&self, raw: &RawFeature) -> ParsedFeature {
        let (fields, dropped_fields) = self.convert_fields(raw);
        let outcome = self.build_record(fields, raw.geometry.as_ref());
        ParsedFeature {
            outcome,
            dropped_fields,
        }
    }

    fn convert_fields(&self, raw: &RawFeature) -> (BTreeMap<&'static str, FieldValue>, usize) {
        let mut fields = BTreeMap::new();
        let mut dropped = 0;
        for mapping in self.schema.fields {
            let Some(text) = raw.field(mapping.source).and_then(clean_value) else {
                continue;
            };
            match (mapping.convert)(text) {
                Ok(value) => {
                    fields.insert(mapping.target, value);
                }
                Err(err) => {
                    warn!("dropping field {}: {err}", mapping.source);
                    dropped += 1;
                }
            }
        }
        (fields, dropped)
    }

    fn build_record(
        &self,
        fields: BTreeMap<&'static str, FieldValue>,
        geometry: Option<&RawGeometry>,
    ) -> ParseOutcome {
        let Some(id) = fields
            .get(self.schema.id_field)
            .and_then(FieldValue::as_integer)
        else {
            return ParseOutcome::Dropped(DropReason::MissingIdentifier);
        };
        let Some(raw_geometry) = geometry else {
            return ParseOutcome::Dropped(DropReason::MissingGeometry);
        };
        match assemble_geometry(raw_geometry, self.schema.srid) {
            Ok(geometry) => ParseOutcome::Accepted(FeatureRecord {
                id,
                fields,
                geometry,
            }),
            Err(GeometryError::Empty) => ParseOutcome::Dropped(DropReason::MissingGeometry),
            Err(err) => ParseOutcome::Dropped(DropReason::InvalidGeometry(err)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layer::FieldMapping;
    use crate::value::FieldValue;
    use rstest::{fixture, rstest};

    static FIELDS: &[FieldMapping] = &[
        FieldMapping::integer("BFEnummer", "bfe_number"),
        FieldMapping::text("virkningsaktoer", "authority"),
        FieldMapping::boolean("udskiltVej", "is_separated_road"),
        FieldMapping::timestamp("registreringFra", "registration_from"),
    ];

    const VALID_RING: &str = "0 0 0 5 0 0 5 5 0 0 5 0 0 0 0";

    #[fixture]
    fn parser() -> FeatureParser {
        FeatureParser::new(LayerSchema {
            table: "parcels",
            id_field: "bfe_number",
            version_field: "registration_from",
            srid: 25832,
            fields: FIELDS,
        })
    }

    fn feature(fields: &[(&str, &str)], rings: &[&str]) -> RawFeature {
        RawFeature {
            fields: fields
                .iter()
                .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
                .collect(),
            geometry: Some(RawGeometry {
                srs_name: Some("EPSG:25832".into()),
                pos_lists: rings.iter().map(|r| (*r).to_owned()).collect(),
            }),
        }
    }

    fn accepted(parsed: ParsedFeature) -> FeatureRecord {
        match parsed.outcome {
            ParseOutcome::Accepted(record) => record,
            ParseOutcome::Dropped(reason) => panic!("feature dropped: {reason:?}"),
        }
    }

    #[rstest]
    fn converts_mapped_fields(parser: FeatureParser) {
        let raw = feature(
            &[
                ("BFEnummer", " 100 "),
                ("virkningsaktoer", "Registrator"),
                ("udskiltVej", "false"),
                ("ignored", "x"),
            ],
            &[VALID_RING],
        );
        let parsed = parser.parse(&raw);
        assert_eq!(parsed.dropped_fields, 0);
        let record = accepted(parsed);
        assert_eq!(record.id, 100);
        assert_eq!(
            record.get("authority"),
            Some(&FieldValue::Text("Registrator".into()))
        );
        assert_eq!(
            record.get("is_separated_road"),
            Some(&FieldValue::Boolean(false))
        );
        assert_eq!(record.get("ignored"), None);
    }

    #[rstest]
    fn bad_field_is_dropped_feature_kept(parser: FeatureParser) {
        let raw = feature(
            &[
                ("BFEnummer", "100"),
                ("udskiltVej", "maybe"),
                ("registreringFra", "not a date"),
            ],
            &[VALID_RING],
        );
        let parsed = parser.parse(&raw);
        assert_eq!(parsed.dropped_fields, 2);
        let record = accepted(parsed);
        assert_eq!(record.get("is_separated_road"), None);
        assert_eq!(record.timestamp("registration_from"), None);
    }

    #[rstest]
    fn empty_text_counts_as_absent(parser: FeatureParser) {
        let raw = feature(&[("BFEnummer", "1"), ("virkningsaktoer", "  ")], &[VALID_RING]);
        let parsed = parser.parse(&raw);
        assert_eq!(parsed.dropped_fields, 0);
        assert_eq!(accepted(parsed).get("authority"), None);
    }

    #[rstest]
    #[case(&[("virkningsaktoer", "x")])]
    #[case(&[("BFEnummer", "abc")])]
    #[case(&[("BFEnummer", "")])]
    fn missing_identifier_drops_feature(parser: FeatureParser, #[case] fields: &[(&str, &str)]) {
        let parsed = parser.parse(&feature(fields, &[VALID_RING]));
        assert_eq!(
            parsed.outcome,
            ParseOutcome::Dropped(DropReason::MissingIdentifier)
        );
    }

    #[rstest]
    fn missing_geometry_drops_feature(parser: FeatureParser) {
        let mut raw = feature(&[("BFEnummer", "5")], &[]);
        assert_eq!(
            parser.parse(&raw).outcome,
            ParseOutcome::Dropped(DropReason::MissingGeometry)
        );
        raw.geometry = None;
        assert_eq!(
            parser.parse(&raw).outcome,
            ParseOutcome::Dropped(DropReason::MissingGeometry)
        );
    }

    #[rstest]
    fn three_vertex_ring_drops_feature(parser: FeatureParser) {
        let raw = feature(&[("BFEnummer", "5")], &["0 0 0 1 0 0 1 1 0"]);
        let parsed = parser.parse(&raw);
        assert!(matches!(
            parsed.outcome,
            ParseOutcome::Dropped(ref reason) if reason.is_invalid_geometry()
        ));
    }
}
