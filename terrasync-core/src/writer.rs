//! Persistence seam used by the pipeline's persist stage.
//!
//! Implementations upsert batches keyed by [`FeatureRecord::id`]. An existing
//! row is only replaced when the incoming record's version timestamp is not
//! older than the stored one; a stored `NULL` always loses.

use chrono::{DateTime, Utc};

use crate::record::FeatureRecord;

/// Conflict-resolving batch writer.
///
/// Writers are owned by a single stage and driven sequentially, so methods
/// take `&mut self`. Errors are fatal to the run.
///
/// # Examples
///
/// ```rust
/// use terrasync_core::{BatchWriter, FeatureRecord};
///
/// #[derive(Default)]
/// struct Counting(u64);
///
/// impl BatchWriter for Counting {
///     type Error = std::convert::Infallible;
///
///     fn prepare(&mut self) -> Result<(), Self::Error> {
///         Ok(())
///     }
///
///     fn write_batch(&mut self, batch: &[FeatureRecord]) -> Result<u64, Self::Error> {
///         self.0 += batch.len() as u64;
///         Ok(batch.len() as u64)
///     }
///
///     fn count_rows(&mut self) -> Result<u64, Self::Error> {
///         Ok(self.0)
///     }
/// }
///
/// let mut writer = Counting::default();
/// assert_eq!(writer.write_batch(&[]).unwrap(), 0);
/// ```
pub trait BatchWriter: Send {
    /// Failure raised by the backing store.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Create the target table and spatial index if they are missing.
    fn prepare(&mut self) -> Result<(), Self::Error>;

    /// Upsert `batch`, returning the number of rows inserted or updated.
    fn write_batch(&mut self, batch: &[FeatureRecord]) -> Result<u64, Self::Error>;

    /// Number of rows currently stored.
    fn count_rows(&mut self) -> Result<u64, Self::Error>;
}

/// Decide whether an incoming version replaces a stored one.
///
/// Mirrors the SQL guard
/// `incoming >= stored OR stored IS NULL`, where a `NULL` incoming value
/// compares as unknown and therefore never replaces a stored timestamp.
///
/// # Examples
///
/// ```
/// use chrono::{TimeZone, Utc};
/// use terrasync_core::supersedes;
///
/// let older = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();
/// let newer = Utc.with_ymd_and_hms(2021, 1, 1, 0, 0, 0).unwrap();
/// assert!(supersedes(Some(&newer), Some(&older)));
/// assert!(!supersedes(Some(&older), Some(&newer)));
/// assert!(supersedes(None, None));
/// ```
#[must_use]
pub fn supersedes(incoming: Option<&DateTime<Utc>>, stored: Option<&DateTime<Utc>>) -> bool {
    match (incoming, stored) {
        (_, None) => true,
        (Some(incoming), Some(stored)) => incoming >= stored,
        (None, Some(_)) => false,
    }
}
