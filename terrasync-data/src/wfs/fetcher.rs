//! Page fetching with pacing, retries and per-page decoding.

use std::sync::Arc;

use terrasync_core::{FeatureParser, FeatureRecord, PageTally, ParseOutcome};
use tokio::time::{Instant, sleep};

use super::error::{ProbeError, SkipReason, TransportError};
use super::gate::RequestGate;
use super::gml::{FeaturePage, decode_page};
use super::retry::RetryPolicy;
use super::source::FeatureSource;
use crate::layers::WfsLayer;

/// Records decoded from one successfully fetched page.
#[derive(Debug, Clone)]
pub struct PageResult {
    /// Zero-based position of the page in the plan.
    pub page_index: u64,
    /// Offset requested through `startIndex`.
    pub start_index: u64,
    /// Accepted records in document order.
    pub records: Vec<FeatureRecord>,
    /// Parse counters for the page.
    pub tally: PageTally,
}

/// What became of one planned page.
#[derive(Debug)]
pub enum PageOutcome {
    /// The page was fetched and decoded.
    Fetched(PageResult),
    /// The page was abandoned.
    Skipped {
        /// Zero-based position of the page in the plan.
        page_index: u64,
        /// Offset requested through `startIndex`.
        start_index: u64,
        /// Why it was abandoned.
        reason: SkipReason,
    },
}

/// Fetches and decodes pages of one layer.
///
/// Clones share the source and gate, so a clone can be moved into each
/// spawned fetch task.
#[derive(Clone)]
pub struct ChunkFetcher {
    source: Arc<dyn FeatureSource>,
    layer: WfsLayer,
    parser: FeatureParser,
    gate: RequestGate,
    retry: RetryPolicy,
    page_size: u64,
}

impl std::fmt::Debug for ChunkFetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChunkFetcher")
            .field("layer", &self.layer.type_name)
            .field("gate", &self.gate)
            .field("retry", &self.retry)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl ChunkFetcher {
    /// Create a fetcher requesting `page_size` features per page.
    #[must_use]
    pub fn new(
        source: Arc<dyn FeatureSource>,
        layer: WfsLayer,
        gate: RequestGate,
        retry: RetryPolicy,
        page_size: u64,
    ) -> Self {
        Self {
            source,
            layer,
            parser: FeatureParser::new(layer.schema),
            gate,
            retry,
            page_size,
        }
    }

    /// Gate shared by every request of this fetcher.
    #[must_use]
    pub const fn gate(&self) -> &RequestGate {
        &self.gate
    }

    /// Features requested per page.
    #[must_use]
    pub const fn page_size(&self) -> u64 {
        self.page_size
    }

    /// Ask the service how many features the layer holds.
    ///
    /// # Errors
    ///
    /// Returns [`ProbeError`] when the request fails after retries, the
    /// response cannot be decoded, or it does not declare `numberMatched`.
    pub async fn probe_total(&self) -> Result<u64, ProbeError> {
        let body = self
            .request(0, 1)
            .await
            .map_err(ProbeError::Unavailable)?;
        let page = decode_page(&body, &self.layer)
            .map_err(|err| ProbeError::Unavailable(SkipReason::MalformedResponse(err)))?;
        let total = page.number_matched.ok_or(ProbeError::MissingTotal)?;
        log::info!("{} reports {total} features", self.layer.type_name);
        Ok(total)
    }

    /// Fetch, decode and parse the page starting at `start_index`.
    ///
    /// Never fails: unavailable or malformed pages come back as
    /// [`PageOutcome::Skipped`].
    pub async fn fetch_page(&self, page_index: u64, start_index: u64) -> PageOutcome {
        let skipped = |reason: SkipReason| {
            log::warn!("skipping page {page_index} (startIndex {start_index}): {reason}");
            PageOutcome::Skipped {
                page_index,
                start_index,
                reason,
            }
        };

        let body = match self.request(start_index, self.page_size).await {
            Ok(body) => body,
            Err(reason) => return skipped(reason),
        };
        let page = match decode_page(&body, &self.layer) {
            Ok(page) => page,
            Err(err) => return skipped(SkipReason::MalformedResponse(err)),
        };
        log::info!(
            "page {page_index} (startIndex {start_index}): numberMatched={:?} numberReturned={:?} decoded={}",
            page.number_matched,
            page.number_returned,
            page.features.len()
        );
        PageOutcome::Fetched(self.parse_page(page_index, start_index, page))
    }

    fn parse_page(&self, page_index: u64, start_index: u64, page: FeaturePage) -> PageResult {
        let mut tally = PageTally::default();
        let mut records = Vec::with_capacity(page.features.len());
        for raw in &page.features {
            let parsed = self.parser.parse(raw);
            tally.record(&parsed);
            match parsed.outcome {
                ParseOutcome::Accepted(record) => records.push(record),
                ParseOutcome::Dropped(reason) => {
                    log::debug!("page {page_index}: dropped feature: {reason:?}");
                }
            }
        }
        PageResult {
            page_index,
            start_index,
            records,
            tally,
        }
    }

    /// Issue one request under the gate, retrying transient failures.
    ///
    /// A 429 answer holds the permit through the requested delay so the
    /// lane stays quiet; backoff delays are spent without a permit.
    async fn request(&self, start_index: u64, count: u64) -> Result<String, SkipReason> {
        let started = Instant::now();
        let mut attempts = 0;
        loop {
            attempts += 1;
            let permit = self
                .gate
                .acquire()
                .await
                .map_err(|_| SkipReason::GateClosed)?;
            let error = match self.source.get_page(start_index, count).await {
                Ok(body) => return Ok(body),
                Err(error) => error,
            };
            if let TransportError::RateLimited { retry_after, .. } = &error {
                log::warn!("rate limited at startIndex {start_index}; waiting {retry_after:?}");
                sleep(*retry_after).await;
            }
            drop(permit);

            let delay = error
                .is_retryable()
                .then(|| self.retry.next_delay(attempts, started.elapsed()))
                .flatten();
            let Some(delay) = delay else {
                return Err(SkipReason::ChunkUnavailable {
                    attempts,
                    last_error: error,
                });
            };
            log::warn!(
                "attempt {attempts} at startIndex {start_index} failed: {error}; retrying in {delay:?}"
            );
            sleep(delay).await;
        }
    }
}
