//! Core domain types for terrasync.
//!
//! The crate describes layers declaratively ([`LayerSchema`] and its
//! [`FieldMapping`] table), turns decoded feature elements into typed
//! [`FeatureRecord`]s with WKT geometry, counts what happens along the way
//! ([`SyncStats`]) and defines the [`BatchWriter`] seam that persistence
//! backends implement. Nothing here performs network I/O.

mod geometry;
mod layer;
mod parser;
mod record;
mod stats;
pub mod store;
mod value;
mod writer;

#[cfg(any(test, feature = "test-support"))]
pub mod test_support;

pub use geometry::{
    FeatureGeometry, GeometryError, MIN_RING_VERTICES, RawGeometry, assemble_geometry,
    srid_from_srs_name,
};
pub use layer::{FieldMapping, LayerSchema, LayerSchemaError, RESERVED_COLUMNS};
pub use parser::{DropReason, FeatureParser, ParseOutcome, ParsedFeature, RawFeature};
pub use record::FeatureRecord;
pub use stats::{PageTally, SyncStats, SyncStatsSnapshot};
pub use value::{
    ConversionError, Converter, FieldKind, FieldValue, clean_value, convert_boolean,
    convert_integer, convert_text, convert_timestamp, format_timestamp,
};
pub use writer::{BatchWriter, supersedes};

#[cfg(feature = "store-sqlite")]
pub use store::{FeatureStoreError, SqliteFeatureStore};
