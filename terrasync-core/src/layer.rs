//! Static description of a synchronised layer.
//!
//! A [`LayerSchema`] names the target table, its identifier and version
//! columns, the fixed spatial reference, and the declarative field table used
//! by [`crate::FeatureParser`] and the stores.

use thiserror::Error;

use crate::value::{
    Converter, FieldKind, convert_boolean, convert_integer, convert_text, convert_timestamp,
};

/// One row of a layer's field table: source attribute, target column and the
/// converter applied to the cleaned text.
#[derive(Debug, Clone, Copy)]
pub struct FieldMapping {
    /// Local name of the attribute in the source document.
    pub source: &'static str,
    /// Target column name.
    pub target: &'static str,
    /// Storage class produced by `convert`.
    pub kind: FieldKind,
    /// Pure converter from cleaned text.
    pub convert: Converter,
}

impl FieldMapping {
    /// Map an integer attribute.
    #[must_use]
    pub const fn integer(source: &'static str, target: &'static str) -> Self {
        Self {
            source,
            target,
            kind: FieldKind::Integer,
            convert: convert_integer,
        }
    }

    /// Map a text attribute.
    #[must_use]
    pub const fn text(source: &'static str, target: &'static str) -> Self {
        Self {
            source,
            target,
            kind: FieldKind::Text,
            convert: convert_text,
        }
    }

    /// Map a boolean attribute.
    #[must_use]
    pub const fn boolean(source: &'static str, target: &'static str) -> Self {
        Self {
            source,
            target,
            kind: FieldKind::Boolean,
            convert: convert_boolean,
        }
    }

    /// Map a timestamp attribute.
    #[must_use]
    pub const fn timestamp(source: &'static str, target: &'static str) -> Self {
        Self {
            source,
            target,
            kind: FieldKind::Timestamp,
            convert: convert_timestamp,
        }
    }
}

/// Table-level description of a layer.
///
/// # Examples
///
/// ```
/// use terrasync_core::{FieldMapping, LayerSchema};
///
/// static FIELDS: &[FieldMapping] = &[
///     FieldMapping::integer("ident", "id"),
///     FieldMapping::timestamp("updated", "updated_at"),
/// ];
/// let schema = LayerSchema {
///     table: "parcels",
///     id_field: "id",
///     version_field: "updated_at",
///     srid: 25832,
///     fields: FIELDS,
/// };
/// assert!(schema.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LayerSchema {
    /// Target table name.
    pub table: &'static str,
    /// Target column holding the integer primary identifier.
    pub id_field: &'static str,
    /// Target column holding the effective-from timestamp that guards
    /// overwrites.
    pub version_field: &'static str,
    /// EPSG code of the fixed spatial reference.
    pub srid: u32,
    /// Declarative field table.
    pub fields: &'static [FieldMapping],
}

impl LayerSchema {
    /// Look up the mapping that targets `column`.
    #[must_use]
    pub fn field(&self, column: &str) -> Option<&FieldMapping> {
        self.fields.iter().find(|mapping| mapping.target == column)
    }

    /// Check that the schema is usable by parsers and stores.
    ///
    /// Identifiers must be plain SQL names, targets must be unique, the
    /// identifier must be an integer field and the version field a timestamp.
    pub fn validate(&self) -> Result<(), LayerSchemaError> {
        ensure_identifier(self.table)?;
        let mut seen = Vec::with_capacity(self.fields.len());
        for mapping in self.fields {
            ensure_identifier(mapping.target)?;
            if RESERVED_COLUMNS.contains(&mapping.target) || seen.contains(&mapping.target) {
                return Err(LayerSchemaError::DuplicateColumn {
                    column: mapping.target,
                });
            }
            seen.push(mapping.target);
        }
        self.ensure_kind(self.id_field, FieldKind::Integer)?;
        self.ensure_kind(self.version_field, FieldKind::Timestamp)
    }

    fn ensure_kind(&self, column: &'static str, expected: FieldKind) -> Result<(), LayerSchemaError> {
        match self.field(column) {
            None => Err(LayerSchemaError::MissingColumn { column }),
            Some(mapping) if mapping.kind != expected => Err(LayerSchemaError::WrongKind {
                column,
                expected,
                found: mapping.kind,
            }),
            Some(_) => Ok(()),
        }
    }
}

/// Columns every store adds next to the mapped fields.
pub const RESERVED_COLUMNS: &[&str] = &["geometry", "srid", "min_x", "min_y", "max_x", "max_y"];

fn ensure_identifier(name: &'static str) -> Result<(), LayerSchemaError> {
    let mut chars = name.chars();
    let valid_start = chars
        .next()
        .is_some_and(|first| first.is_ascii_alphabetic() || first == '_');
    if valid_start && chars.all(|c| c.is_ascii_alphanumeric() || c == '_') {
        Ok(())
    } else {
        Err(LayerSchemaError::InvalidIdentifier { name })
    }
}

/// Problems detected by [`LayerSchema::validate`].
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum LayerSchemaError {
    /// A table or column name is not a plain SQL identifier.
    #[error("'{name}' is not a plain identifier")]
    InvalidIdentifier {
        /// Offending name.
        name: &'static str,
    },
    /// Two mappings target the same column, or a mapping shadows a reserved
    /// geometry column.
    #[error("column '{column}' is declared more than once")]
    DuplicateColumn {
        /// Duplicated column.
        column: &'static str,
    },
    /// The identifier or version column is absent from the field table.
    #[error("column '{column}' is not mapped")]
    MissingColumn {
        /// Missing column.
        column: &'static str,
    },
    /// The identifier or version column has the wrong storage class.
    #[error("column '{column}' must be {expected:?} but is {found:?}")]
    WrongKind {
        /// Column name.
        column: &'static str,
        /// Required kind.
        expected: FieldKind,
        /// Declared kind.
        found: FieldKind,
    },
}
