//! Persistence backends for synchronised layers.
//!
//! The [`crate::BatchWriter`] trait is the seam the pipeline writes through.
//! With the `store-sqlite` feature this module provides
//! [`SqliteFeatureStore`], which keeps one table per layer together with an
//! R\*Tree index over each geometry's bounding box.

#[cfg(feature = "store-sqlite")]
mod schema;
#[cfg(feature = "store-sqlite")]
mod sqlite;

#[cfg(feature = "store-sqlite")]
pub use schema::{FeatureSchemaError, SCHEMA_VERSION, index_name};
#[cfg(feature = "store-sqlite")]
pub use sqlite::{FeatureStoreError, SqliteFeatureStore};

#[cfg(all(test, feature = "store-sqlite"))]
mod tests;
