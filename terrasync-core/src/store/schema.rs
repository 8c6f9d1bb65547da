#![forbid(unsafe_code)]

use rusqlite::{Error as SqliteError, OptionalExtension, Transaction};
use thiserror::Error;

use crate::layer::LayerSchema;
use crate::value::FieldKind;

/// Version of the layer table layout created by this build.
pub const SCHEMA_VERSION: i64 = 1;

/// Create the layer table, its R\*Tree spatial index and the triggers that
/// keep the index current, then record the layout version.
///
/// Existing tables must already carry [`SCHEMA_VERSION`] and the layer's SRID;
/// mismatches are rejected rather than migrated.
pub(super) fn initialise_layer(
    transaction: &Transaction<'_>,
    schema: &LayerSchema,
) -> Result<(), FeatureSchemaError> {
    run_migration_step(transaction, "create layer table", &create_table_sql(schema))?;
    run_migration_step(
        transaction,
        "create spatial index",
        &format!(
            "CREATE VIRTUAL TABLE IF NOT EXISTS {index} USING rtree(id, min_x, max_x, min_y, max_y)",
            index = quote(&index_name(schema)),
        ),
    )?;
    for (step, sql) in trigger_sql(schema) {
        run_migration_step(transaction, step, &sql)?;
    }
    ensure_layer_version(transaction, schema)
}

/// Name of the R\*Tree table indexing `schema`'s geometries.
#[must_use]
pub fn index_name(schema: &LayerSchema) -> String {
    format!("{}_geometry_idx", schema.table)
}

pub(super) fn quote(identifier: &str) -> String {
    format!("\"{identifier}\"")
}

fn column_definition(column: &str, kind: FieldKind) -> String {
    match kind {
        FieldKind::Integer => format!("{column} INTEGER"),
        FieldKind::Boolean => format!("{column} INTEGER CHECK ({column} IN (0, 1))"),
        // Timestamps are stored as fixed-width UTC text so they compare in order.
        FieldKind::Text | FieldKind::Timestamp => format!("{column} TEXT"),
    }
}

fn create_table_sql(schema: &LayerSchema) -> String {
    let mut columns: Vec<String> = schema
        .fields
        .iter()
        .map(|mapping| {
            let definition = column_definition(&quote(mapping.target), mapping.kind);
            if mapping.target == schema.id_field {
                format!("{definition} PRIMARY KEY")
            } else {
                definition
            }
        })
        .collect();
    columns.extend([
        "geometry TEXT NOT NULL".to_owned(),
        "srid INTEGER NOT NULL".to_owned(),
        "min_x REAL NOT NULL".to_owned(),
        "min_y REAL NOT NULL".to_owned(),
        "max_x REAL NOT NULL".to_owned(),
        "max_y REAL NOT NULL".to_owned(),
    ]);
    format!(
        "CREATE TABLE IF NOT EXISTS {table} (\n    {columns}\n)",
        table = quote(schema.table),
        columns = columns.join(",\n    "),
    )
}

fn trigger_sql(schema: &LayerSchema) -> [(&'static str, String); 3] {
    let table = quote(schema.table);
    let index = quote(&index_name(schema));
    let id = quote(schema.id_field);
    let trigger = |suffix: &str| quote(&format!("{}_geometry_{suffix}", schema.table));
    [
        (
            "create spatial insert trigger",
            format!(
                "CREATE TRIGGER IF NOT EXISTS {name} AFTER INSERT ON {table} BEGIN
                    INSERT INTO {index} (id, min_x, max_x, min_y, max_y)
                    VALUES (NEW.{id}, NEW.min_x, NEW.max_x, NEW.min_y, NEW.max_y);
                END",
                name = trigger("ai"),
            ),
        ),
        (
            "create spatial update trigger",
            format!(
                "CREATE TRIGGER IF NOT EXISTS {name} AFTER UPDATE ON {table} BEGIN
                    UPDATE {index}
                    SET min_x = NEW.min_x, max_x = NEW.max_x, min_y = NEW.min_y, max_y = NEW.max_y
                    WHERE id = NEW.{id};
                END",
                name = trigger("au"),
            ),
        ),
        (
            "create spatial delete trigger",
            format!(
                "CREATE TRIGGER IF NOT EXISTS {name} AFTER DELETE ON {table} BEGIN
                    DELETE FROM {index} WHERE id = OLD.{id};
                END",
                name = trigger("ad"),
            ),
        ),
    ]
}

fn ensure_layer_version(
    transaction: &Transaction<'_>,
    schema: &LayerSchema,
) -> Result<(), FeatureSchemaError> {
    run_migration_step(
        transaction,
        "create layer registry",
        "CREATE TABLE IF NOT EXISTS terrasync_layers (
            table_name TEXT PRIMARY KEY,
            schema_version INTEGER NOT NULL CHECK (schema_version > 0),
            srid INTEGER NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
        ) WITHOUT ROWID",
    )?;

    let existing: Option<(i64, u32)> = transaction
        .query_row(
            "SELECT schema_version, srid FROM terrasync_layers WHERE table_name = ?1",
            [schema.table],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()
        .map_err(|source| FeatureSchemaError::Migration {
            step: "read layer registry",
            source,
        })?;

    match existing {
        Some((version, _)) if version != SCHEMA_VERSION => {
            Err(FeatureSchemaError::VersionMismatch {
                table: schema.table,
                expected: SCHEMA_VERSION,
                found: version,
            })
        }
        Some((_, srid)) if srid != schema.srid => Err(FeatureSchemaError::SridMismatch {
            table: schema.table,
            expected: schema.srid,
            found: srid,
        }),
        Some(_) => Ok(()),
        None => transaction
            .execute(
                "INSERT INTO terrasync_layers (table_name, schema_version, srid) VALUES (?1, ?2, ?3)",
                (schema.table, SCHEMA_VERSION, schema.srid),
            )
            .map(|_| ())
            .map_err(|source| FeatureSchemaError::Migration {
                step: "record layer version",
                source,
            }),
    }
}

fn run_migration_step(
    transaction: &Transaction<'_>,
    step: &'static str,
    sql: &str,
) -> Result<(), FeatureSchemaError> {
    transaction
        .execute(sql, [])
        .map(|_| ())
        .map_err(|source| FeatureSchemaError::Migration { step, source })
}

/// Errors raised while preparing a layer table.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum FeatureSchemaError {
    /// A DDL statement failed.
    #[error("failed to execute migration step '{step}'")]
    Migration {
        /// Step being executed.
        step: &'static str,
        /// SQLite failure.
        #[source]
        source: SqliteError,
    },
    /// The table was created by an incompatible layout version.
    #[error(
        "expected layer table {table} at schema version {expected} but found {found}; migrate it before syncing"
    )]
    VersionMismatch {
        /// Layer table.
        table: &'static str,
        /// Version this build writes.
        expected: i64,
        /// Version recorded in the database.
        found: i64,
    },
    /// The table stores geometry in a different spatial reference.
    #[error("layer table {table} stores EPSG:{found} geometry but the layer uses EPSG:{expected}")]
    SridMismatch {
        /// Layer table.
        table: &'static str,
        /// Configured EPSG code.
        expected: u32,
        /// EPSG code recorded in the database.
        found: u32,
    },
}
