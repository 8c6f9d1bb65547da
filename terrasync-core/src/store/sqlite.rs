//! SQLite-backed [`BatchWriter`] for synchronised layers.

use std::{
    fmt,
    path::{Path, PathBuf},
};

use rusqlite::{Connection, params_from_iter, types::Value};
use thiserror::Error;

use crate::layer::{LayerSchema, LayerSchemaError, RESERVED_COLUMNS};
use crate::record::FeatureRecord;
use crate::value::{FieldValue, format_timestamp};
use crate::writer::BatchWriter;

use super::schema::{FeatureSchemaError, initialise_layer, quote};

/// SQLite limits bound parameters per statement to 999 by default. The store
/// splits batches so each `INSERT` stays below that ceiling.
const SQLITE_MAX_VARIABLE_NUMBER: usize = 999;

/// Error raised by [`SqliteFeatureStore`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FeatureStoreError {
    /// Opening the SQLite database failed.
    #[error("failed to open SQLite database at {path:?}: {source}")]
    Open {
        /// Location of the database.
        path: PathBuf,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// The layer description cannot be mapped onto a table.
    #[error(transparent)]
    InvalidLayer(#[from] LayerSchemaError),
    /// Creating or checking the layer table failed.
    #[error(transparent)]
    Schema(#[from] FeatureSchemaError),
    /// A statement failed while persisting or counting features.
    #[error("failed to {operation}")]
    Sqlite {
        /// Operation being performed.
        operation: &'static str,
        /// Source error returned by `rusqlite`.
        #[source]
        source: rusqlite::Error,
    },
    /// SQLite reported a negative row count.
    #[error("row count {count} is out of range")]
    RowCountOutOfRange {
        /// Reported count.
        count: i64,
    },
}

/// Layer table writer backed by a single SQLite connection.
///
/// # Examples
///
/// ```
/// use terrasync_core::{BatchWriter, FieldMapping, LayerSchema, SqliteFeatureStore};
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
/// let mut store = SqliteFeatureStore::open_in_memory(schema)?;
/// store.prepare()?;
/// assert_eq!(store.count_rows()?, 0);
/// # Ok::<(), terrasync_core::FeatureStoreError>(())
/// ```
pub struct SqliteFeatureStore {
    connection: Connection,
    schema: LayerSchema,
}

impl fmt::Debug for SqliteFeatureStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteFeatureStore")
            .field("table", &self.schema.table)
            .field("path", &self.connection.path())
            .finish_non_exhaustive()
    }
}

impl SqliteFeatureStore {
    /// Open (or create) the database at `path` for `schema`.
    pub fn open<P: AsRef<Path>>(path: P, schema: LayerSchema) -> Result<Self, FeatureStoreError> {
        let path = path.as_ref();
        let connection = Connection::open(path).map_err(|source| FeatureStoreError::Open {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_connection(connection, schema)
    }

    /// Open a private in-memory database for `schema`.
    pub fn open_in_memory(schema: LayerSchema) -> Result<Self, FeatureStoreError> {
        let connection =
            Connection::open_in_memory().map_err(|source| FeatureStoreError::Open {
                path: PathBuf::from(":memory:"),
                source,
            })?;
        Self::from_connection(connection, schema)
    }

    /// Wrap an existing connection.
    pub fn from_connection(
        connection: Connection,
        schema: LayerSchema,
    ) -> Result<Self, FeatureStoreError> {
        schema.validate()?;
        Ok(Self { connection, schema })
    }

    /// Layer written by this store.
    #[must_use]
    pub const fn schema(&self) -> &LayerSchema {
        &self.schema
    }

    /// Borrow the underlying connection for read queries.
    #[must_use]
    pub const fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Release the store and return its connection.
    #[must_use]
    pub fn into_connection(self) -> Connection {
        self.connection
    }
}

impl BatchWriter for SqliteFeatureStore {
    type Error = FeatureStoreError;

    fn prepare(&mut self) -> Result<(), Self::Error> {
        let transaction =
            self.connection
                .transaction()
                .map_err(|source| FeatureStoreError::Sqlite {
                    operation: "begin schema transaction",
                    source,
                })?;
        initialise_layer(&transaction, &self.schema)?;
        transaction
            .commit()
            .map_err(|source| FeatureStoreError::Sqlite {
                operation: "commit schema transaction",
                source,
            })
    }

    fn write_batch(&mut self, batch: &[FeatureRecord]) -> Result<u64, Self::Error> {
        if batch.is_empty() {
            return Ok(0);
        }
        let columns = column_order(&self.schema);
        let rows_per_statement = (SQLITE_MAX_VARIABLE_NUMBER / columns.len()).max(1);

        let transaction =
            self.connection
                .transaction()
                .map_err(|source| FeatureStoreError::Sqlite {
                    operation: "begin upsert transaction",
                    source,
                })?;
        let mut affected = 0_u64;
        for chunk in batch.chunks(rows_per_statement) {
            let sql = upsert_sql(&self.schema, &columns, chunk.len());
            let mut statement =
                transaction
                    .prepare_cached(&sql)
                    .map_err(|source| FeatureStoreError::Sqlite {
                        operation: "prepare upsert",
                        source,
                    })?;
            let values: Vec<Value> = chunk
                .iter()
                .flat_map(|record| row_values(&self.schema, record))
                .collect();
            let changed = statement
                .execute(params_from_iter(values.iter()))
                .map_err(|source| FeatureStoreError::Sqlite {
                    operation: "upsert features",
                    source,
                })?;
            affected += u64::try_from(changed).unwrap_or(u64::MAX);
        }
        transaction
            .commit()
            .map_err(|source| FeatureStoreError::Sqlite {
                operation: "commit upsert transaction",
                source,
            })?;
        Ok(affected)
    }

    fn count_rows(&mut self) -> Result<u64, Self::Error> {
        let count: i64 = self
            .connection
            .query_row(
                &format!("SELECT COUNT(*) FROM {}", quote(self.schema.table)),
                [],
                |row| row.get(0),
            )
            .map_err(|source| FeatureStoreError::Sqlite {
                operation: "count stored features",
                source,
            })?;
        u64::try_from(count).map_err(|_| FeatureStoreError::RowCountOutOfRange { count })
    }
}

fn column_order(schema: &LayerSchema) -> Vec<&'static str> {
    schema
        .fields
        .iter()
        .map(|mapping| mapping.target)
        .chain(RESERVED_COLUMNS.iter().copied())
        .collect()
}

/// Multi-row upsert that only overwrites when the incoming version is not
/// older than the stored one, or nothing is stored yet.
fn upsert_sql(schema: &LayerSchema, columns: &[&str], rows: usize) -> String {
    let table = quote(schema.table);
    let id = quote(schema.id_field);
    let version = quote(schema.version_field);
    let column_list = columns
        .iter()
        .map(|column| quote(column))
        .collect::<Vec<_>>()
        .join(", ");
    let row = format!("({})", vec!["?"; columns.len()].join(", "));
    let values = vec![row.as_str(); rows].join(", ");
    let assignments = columns
        .iter()
        .filter(|column| **column != schema.id_field)
        .map(|column| format!("{0} = excluded.{0}", quote(column)))
        .collect::<Vec<_>>()
        .join(", ");
    format!(
        "INSERT INTO {table} ({column_list}) VALUES {values}
         ON CONFLICT ({id}) DO UPDATE SET {assignments}
         WHERE excluded.{version} >= {table}.{version} OR {table}.{version} IS NULL"
    )
}

fn row_values<'a>(
    schema: &'a LayerSchema,
    record: &'a FeatureRecord,
) -> impl Iterator<Item = Value> + 'a {
    let bounds = record.geometry.bounds;
    schema
        .fields
        .iter()
        .map(|mapping| record.get(mapping.target).map_or(Value::Null, sql_value))
        .chain([
            Value::Text(record.geometry.wkt.clone()),
            Value::Integer(i64::from(record.geometry.srid)),
            Value::Real(bounds.min().x),
            Value::Real(bounds.min().y),
            Value::Real(bounds.max().x),
            Value::Real(bounds.max().y),
        ])
}

fn sql_value(value: &FieldValue) -> Value {
    match value {
        FieldValue::Integer(number) => Value::Integer(*number),
        FieldValue::Text(text) => Value::Text(text.clone()),
        FieldValue::Boolean(flag) => Value::Integer(i64::from(*flag)),
        FieldValue::Timestamp(instant) => Value::Text(format_timestamp(instant)),
    }
}
