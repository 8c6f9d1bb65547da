//! Facade crate for terrasync.
//!
//! This crate re-exports the core domain types and exposes the WFS
//! pipeline and SQLite store behind feature flags.

#![forbid(unsafe_code)]

pub use terrasync_core::{
    BatchWriter, DropReason, FeatureGeometry, FeatureParser, FeatureRecord, FieldKind,
    FieldMapping, FieldValue, LayerSchema, LayerSchemaError, ParseOutcome, RawFeature,
    RawGeometry, SyncStats, SyncStatsSnapshot,
};

#[cfg(feature = "store-sqlite")]
pub use terrasync_core::{FeatureStoreError, SqliteFeatureStore};

#[cfg(feature = "wfs")]
pub use terrasync_data::layers::{CADASTRAL, CADASTRAL_ENDPOINT, WfsLayer};
#[cfg(feature = "wfs")]
pub use terrasync_data::sync::{LayerSync, SyncError, SyncReport, SyncSettings};
#[cfg(feature = "wfs")]
pub use terrasync_data::wfs::{
    Credentials, FeatureSource, HttpFeatureSource, HttpSourceConfig, RequestGate, WfsQuery,
};

#[cfg(all(feature = "wfs", feature = "store-sqlite"))]
pub use terrasync_data::sync::sync_to_path;
