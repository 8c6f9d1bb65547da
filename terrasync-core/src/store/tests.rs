//! Unit tests for the SQLite feature store.

use super::{FeatureSchemaError, FeatureStoreError, SCHEMA_VERSION, SqliteFeatureStore, index_name};
use crate::test_support::{TEST_LAYER, square_record};
use crate::{BatchWriter, FieldMapping, LayerSchema, LayerSchemaError};
use rstest::{fixture, rstest};
use tempfile::TempDir;

#[fixture]
fn store() -> SqliteFeatureStore {
    let mut store = SqliteFeatureStore::open_in_memory(TEST_LAYER).expect("open in-memory store");
    store.prepare().expect("prepare layer table");
    store
}

fn stored_name(store: &SqliteFeatureStore, id: i64) -> Option<String> {
    store
        .connection()
        .query_row("SELECT name FROM parcels WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .ok()
}

fn stored_version(store: &SqliteFeatureStore, id: i64) -> Option<String> {
    store
        .connection()
        .query_row("SELECT updated_at FROM parcels WHERE id = ?1", [id], |row| {
            row.get(0)
        })
        .expect("row present")
}

#[rstest]
fn prepare_records_layer_version(store: SqliteFeatureStore) -> Result<(), FeatureStoreError> {
    let (version, srid): (i64, u32) = store
        .connection()
        .query_row(
            "SELECT schema_version, srid FROM terrasync_layers WHERE table_name = 'parcels'",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .expect("layer registered");
    assert_eq!(version, SCHEMA_VERSION);
    assert_eq!(srid, TEST_LAYER.srid);
    Ok(())
}

#[rstest]
fn prepare_is_repeatable(mut store: SqliteFeatureStore) -> Result<(), FeatureStoreError> {
    store.prepare()?;
    assert_eq!(store.count_rows()?, 0);
    Ok(())
}

#[rstest]
fn inserts_new_rows(mut store: SqliteFeatureStore) -> Result<(), FeatureStoreError> {
    let batch = [
        square_record(1, "one", Some("2021-01-01T00:00:00Z")),
        square_record(2, "two", None),
    ];
    assert_eq!(store.write_batch(&batch)?, 2);
    assert_eq!(store.count_rows()?, 2);
    assert_eq!(stored_name(&store, 2).as_deref(), Some("two"));
    assert_eq!(
        stored_version(&store, 1).as_deref(),
        Some("2021-01-01T00:00:00.000000Z")
    );
    Ok(())
}

#[rstest]
fn empty_batch_is_a_no_op(mut store: SqliteFeatureStore) -> Result<(), FeatureStoreError> {
    assert_eq!(store.write_batch(&[])?, 0);
    Ok(())
}

#[rstest]
fn older_version_never_overwrites(mut store: SqliteFeatureStore) -> Result<(), FeatureStoreError> {
    store.write_batch(&[square_record(7, "current", Some("2022-05-01T00:00:00Z"))])?;

    let affected = store.write_batch(&[square_record(7, "stale", Some("2022-04-30T23:59:59Z"))])?;

    assert_eq!(affected, 0);
    assert_eq!(stored_name(&store, 7).as_deref(), Some("current"));
    Ok(())
}

#[rstest]
fn equal_or_newer_version_overwrites(
    mut store: SqliteFeatureStore,
) -> Result<(), FeatureStoreError> {
    store.write_batch(&[square_record(7, "first", Some("2022-05-01T00:00:00Z"))])?;
    assert_eq!(
        store.write_batch(&[square_record(7, "same", Some("2022-05-01T00:00:00Z"))])?,
        1
    );
    assert_eq!(
        store.write_batch(&[square_record(7, "later", Some("2023-01-01T00:00:00Z"))])?,
        1
    );
    assert_eq!(stored_name(&store, 7).as_deref(), Some("later"));
    Ok(())
}

#[rstest]
fn null_stored_version_always_loses(
    mut store: SqliteFeatureStore,
) -> Result<(), FeatureStoreError> {
    store.write_batch(&[square_record(3, "bootstrap", None)])?;
    store.write_batch(&[square_record(3, "dated", Some("1990-01-01T00:00:00Z"))])?;
    assert_eq!(stored_name(&store, 3).as_deref(), Some("dated"));
    Ok(())
}

#[rstest]
fn null_incoming_version_keeps_dated_row(
    mut store: SqliteFeatureStore,
) -> Result<(), FeatureStoreError> {
    store.write_batch(&[square_record(3, "dated", Some("1990-01-01T00:00:00Z"))])?;
    assert_eq!(store.write_batch(&[square_record(3, "undated", None)])?, 0);
    assert_eq!(stored_name(&store, 3).as_deref(), Some("dated"));
    Ok(())
}

#[rstest]
#[case::later_second(&["2020-01-01T00:00:00Z", "2021-01-01T00:00:00Z"], "v1")]
#[case::later_first(&["2021-01-01T00:00:00Z", "2020-01-01T00:00:00Z"], "v0")]
fn conflicting_records_in_one_batch_keep_latest(
    mut store: SqliteFeatureStore,
    #[case] versions: &[&str],
    #[case] expected: &str,
) -> Result<(), FeatureStoreError> {
    let batch: Vec<_> = versions
        .iter()
        .enumerate()
        .map(|(i, version)| square_record(9, &format!("v{i}"), Some(version)))
        .collect();
    store.write_batch(&batch)?;
    assert_eq!(store.count_rows()?, 1);
    assert_eq!(stored_name(&store, 9).as_deref(), Some(expected));
    Ok(())
}

#[rstest]
fn large_batches_span_statements(mut store: SqliteFeatureStore) -> Result<(), FeatureStoreError> {
    let batch: Vec<_> = (0..250).map(|id| square_record(id, "bulk", None)).collect();
    assert_eq!(store.write_batch(&batch)?, 250);
    assert_eq!(store.count_rows()?, 250);
    Ok(())
}

#[rstest]
fn spatial_index_tracks_upserts(mut store: SqliteFeatureStore) -> Result<(), FeatureStoreError> {
    store.write_batch(&[square_record(4, "a", None), square_record(40, "b", None)])?;
    let query = format!(
        "SELECT id FROM {} WHERE min_x <= 5 AND max_x >= 4 AND min_y <= 5 AND max_y >= 4",
        index_name(&TEST_LAYER)
    );
    let hits: Vec<i64> = {
        let mut statement = store.connection().prepare(&query).expect("prepare");
        statement
            .query_map([], |row| row.get(0))
            .expect("query index")
            .collect::<Result<_, _>>()
            .expect("collect ids")
    };
    assert_eq!(hits, vec![4]);
    Ok(())
}

#[rstest]
fn reopening_with_other_srid_is_rejected() {
    let dir = TempDir::new().expect("temp dir");
    let path = dir.path().join("layers.db");
    let mut first = SqliteFeatureStore::open(&path, TEST_LAYER).expect("open store");
    first.prepare().expect("prepare");
    drop(first);

    let mut second = SqliteFeatureStore::open(
        &path,
        LayerSchema {
            srid: 4326,
            ..TEST_LAYER
        },
    )
    .expect("reopen store");
    assert!(matches!(
        second.prepare(),
        Err(FeatureStoreError::Schema(FeatureSchemaError::SridMismatch {
            found: 25832,
            expected: 4326,
            ..
        }))
    ));
}

#[rstest]
fn invalid_layer_is_rejected_on_open() {
    static FIELDS: &[FieldMapping] = &[FieldMapping::text("ident", "id")];
    let layer = LayerSchema {
        fields: FIELDS,
        ..TEST_LAYER
    };
    assert!(matches!(
        SqliteFeatureStore::open_in_memory(layer),
        Err(FeatureStoreError::InvalidLayer(
            LayerSchemaError::WrongKind { .. }
        ))
    ));
}
