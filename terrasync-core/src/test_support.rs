//! In-memory doubles and fixtures used by unit and behaviour tests.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use geo::{Coord, Rect};
use thiserror::Error;

use crate::geometry::FeatureGeometry;
use crate::layer::{FieldMapping, LayerSchema};
use crate::record::FeatureRecord;
use crate::value::{FieldValue, convert_timestamp};
use crate::writer::{BatchWriter, supersedes};

const TEST_FIELDS: &[FieldMapping] = &[
    FieldMapping::integer("ident", "id"),
    FieldMapping::text("name", "name"),
    FieldMapping::boolean("flag", "flag"),
    FieldMapping::timestamp("updated", "updated_at"),
];

/// Small layer used throughout the tests.
pub const TEST_LAYER: LayerSchema = LayerSchema {
    table: "parcels",
    id_field: "id",
    version_field: "updated_at",
    srid: 25832,
    fields: TEST_FIELDS,
};

/// Build a record for [`TEST_LAYER`] with a unit square placed at `id`.
///
/// `updated_at` must be an RFC 3339 timestamp; unparseable values are
/// stored as absent.
#[must_use]
pub fn square_record(id: i64, name: &str, updated_at: Option<&str>) -> FeatureRecord {
    let mut fields = BTreeMap::new();
    fields.insert("id", FieldValue::Integer(id));
    fields.insert("name", FieldValue::Text(name.to_owned()));
    if let Some(value) = updated_at.and_then(|raw| convert_timestamp(raw).ok()) {
        fields.insert("updated_at", value);
    }
    let offset = f64::from(i32::try_from(id).unwrap_or(0));
    let (x0, y0, x1, y1) = (offset, offset, offset + 1.0, offset + 1.0);
    FeatureRecord {
        id,
        fields,
        geometry: FeatureGeometry {
            wkt: format!("POLYGON(({x0} {y0},{x1} {y0},{x1} {y1},{x0} {y1},{x0} {y0}))"),
            srid: TEST_LAYER.srid,
            bounds: Rect::new(Coord { x: x0, y: y0 }, Coord { x: x1, y: y1 }),
            polygons: 1,
        },
    }
}

/// Error injected by [`MemoryWriter`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("injected failure writing batch {batch}")]
pub struct InjectedWriteError {
    /// Zero-based index of the failing batch.
    pub batch: usize,
}

#[derive(Debug, Default)]
struct MemoryState {
    prepared: bool,
    rows: BTreeMap<i64, FeatureRecord>,
    batch_sizes: Vec<usize>,
    fail_on_batch: Option<usize>,
}

/// [`BatchWriter`] that keeps rows in memory and applies the same version
/// guard as the SQL stores.
///
/// Clones share state, so a test can keep a handle while the pipeline owns
/// the writer.
#[derive(Debug, Clone)]
pub struct MemoryWriter {
    version_field: &'static str,
    state: Arc<Mutex<MemoryState>>,
}

impl Default for MemoryWriter {
    fn default() -> Self {
        Self::new(TEST_LAYER.version_field)
    }
}

impl MemoryWriter {
    /// Create a writer guarding on `version_field`.
    #[must_use]
    pub fn new(version_field: &'static str) -> Self {
        Self {
            version_field,
            state: Arc::default(),
        }
    }

    /// Fail when asked to write the batch with zero-based index `batch`.
    #[must_use]
    pub fn failing_on_batch(self, batch: usize) -> Self {
        self.lock().fail_on_batch = Some(batch);
        self
    }

    /// Whether [`BatchWriter::prepare`] ran.
    #[must_use]
    pub fn prepared(&self) -> bool {
        self.lock().prepared
    }

    /// Stored rows ordered by identifier.
    #[must_use]
    pub fn rows(&self) -> Vec<FeatureRecord> {
        self.lock().rows.values().cloned().collect()
    }

    /// Stored row with identifier `id`.
    #[must_use]
    pub fn row(&self, id: i64) -> Option<FeatureRecord> {
        self.lock().rows.get(&id).cloned()
    }

    /// Sizes of every batch written so far, in order.
    #[must_use]
    pub fn batch_sizes(&self) -> Vec<usize> {
        self.lock().batch_sizes.clone()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl BatchWriter for MemoryWriter {
    type Error = InjectedWriteError;

    fn prepare(&mut self) -> Result<(), Self::Error> {
        self.lock().prepared = true;
        Ok(())
    }

    fn write_batch(&mut self, batch: &[FeatureRecord]) -> Result<u64, Self::Error> {
        let version_field = self.version_field;
        let mut state = self.lock();
        let index = state.batch_sizes.len();
        if state.fail_on_batch == Some(index) {
            return Err(InjectedWriteError { batch: index });
        }
        state.batch_sizes.push(batch.len());

        let mut affected = 0;
        for record in batch {
            let replace = state.rows.get(&record.id).is_none_or(|stored| {
                supersedes(
                    record.timestamp(version_field),
                    stored.timestamp(version_field),
                )
            });
            if replace {
                state.rows.insert(record.id, record.clone());
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn count_rows(&mut self) -> Result<u64, Self::Error> {
        Ok(u64::try_from(self.lock().rows.len()).unwrap_or(u64::MAX))
    }
}
