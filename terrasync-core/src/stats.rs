//! Run counters shared by every pipeline stage.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::parser::{ParseOutcome, ParsedFeature};

/// Per-page parse tally, accumulated without synchronisation and folded into
/// [`SyncStats`] once the page settles.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageTally {
    /// Feature elements encountered.
    pub features_seen: u64,
    /// Features turned into records.
    pub features_accepted: u64,
    /// Features dropped for any reason.
    pub features_dropped: u64,
    /// Features dropped because of their geometry.
    pub invalid_geometries: u64,
    /// Individual fields dropped during conversion.
    pub fields_dropped: u64,
}

impl PageTally {
    /// Count one parsed feature.
    pub fn record(&mut self, parsed: &ParsedFeature) {
        self.features_seen += 1;
        self.fields_dropped += u64::try_from(parsed.dropped_fields).unwrap_or(u64::MAX);
        match &parsed.outcome {
            ParseOutcome::Accepted(_) => self.features_accepted += 1,
            ParseOutcome::Dropped(reason) => {
                self.features_dropped += 1;
                if reason.is_invalid_geometry() {
                    self.invalid_geometries += 1;
                }
            }
        }
    }
}

/// Running counters for one synchronisation run.
///
/// All methods take `&self` so the structure can sit behind an `Arc` and be
/// updated concurrently by fetch tasks and stages.
#[derive(Debug, Default)]
pub struct SyncStats {
    features_seen: AtomicU64,
    features_accepted: AtomicU64,
    features_dropped: AtomicU64,
    invalid_geometries: AtomicU64,
    fields_dropped: AtomicU64,
    pages_fetched: AtomicU64,
    pages_skipped: AtomicU64,
    duplicate_pages: AtomicU64,
    batches_written: AtomicU64,
    rows_affected: AtomicU64,
}

impl SyncStats {
    /// Fold a fetched page's tally into the run totals.
    pub fn record_page(&self, tally: &PageTally) {
        self.pages_fetched.fetch_add(1, Ordering::Relaxed);
        self.features_seen
            .fetch_add(tally.features_seen, Ordering::Relaxed);
        self.features_accepted
            .fetch_add(tally.features_accepted, Ordering::Relaxed);
        self.features_dropped
            .fetch_add(tally.features_dropped, Ordering::Relaxed);
        self.invalid_geometries
            .fetch_add(tally.invalid_geometries, Ordering::Relaxed);
        self.fields_dropped
            .fetch_add(tally.fields_dropped, Ordering::Relaxed);
    }

    /// Count a page abandoned after retries or a malformed response.
    pub fn record_skipped_page(&self) {
        self.pages_skipped.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a page delivered more than once to the merge stage.
    pub fn record_duplicate_page(&self) {
        self.duplicate_pages.fetch_add(1, Ordering::Relaxed);
    }

    /// Count a persisted batch and the rows it changed.
    pub fn record_batch(&self, rows_affected: u64) {
        self.batches_written.fetch_add(1, Ordering::Relaxed);
        self.rows_affected
            .fetch_add(rows_affected, Ordering::Relaxed);
    }

    /// Copy the counters into a plain value.
    #[must_use]
    pub fn snapshot(&self) -> SyncStatsSnapshot {
        SyncStatsSnapshot {
            features_seen: self.features_seen.load(Ordering::Relaxed),
            features_accepted: self.features_accepted.load(Ordering::Relaxed),
            features_dropped: self.features_dropped.load(Ordering::Relaxed),
            invalid_geometries: self.invalid_geometries.load(Ordering::Relaxed),
            fields_dropped: self.fields_dropped.load(Ordering::Relaxed),
            pages_fetched: self.pages_fetched.load(Ordering::Relaxed),
            pages_skipped: self.pages_skipped.load(Ordering::Relaxed),
            duplicate_pages: self.duplicate_pages.load(Ordering::Relaxed),
            batches_written: self.batches_written.load(Ordering::Relaxed),
            rows_affected: self.rows_affected.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`SyncStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct SyncStatsSnapshot {
    /// Feature elements encountered.
    pub features_seen: u64,
    /// Features turned into records.
    pub features_accepted: u64,
    /// Features dropped for any reason.
    pub features_dropped: u64,
    /// Features dropped because of their geometry.
    pub invalid_geometries: u64,
    /// Fields dropped during conversion.
    pub fields_dropped: u64,
    /// Pages fetched and parsed.
    pub pages_fetched: u64,
    /// Pages abandoned.
    pub pages_skipped: u64,
    /// Duplicate page deliveries discarded by the merge stage.
    pub duplicate_pages: u64,
    /// Batches persisted.
    pub batches_written: u64,
    /// Rows inserted or updated.
    pub rows_affected: u64,
}
