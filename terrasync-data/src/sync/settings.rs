//! Tunables for one synchronisation run.

use std::num::{NonZeroU32, NonZeroUsize};
use std::time::Duration;

use thiserror::Error;

use crate::wfs::RetryPolicy;

/// Default features requested per page.
pub const DEFAULT_PAGE_SIZE: u64 = 1000;
/// Default records written per batch.
pub const DEFAULT_BATCH_SIZE: usize = 5000;
/// Default concurrent page requests.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;
/// Default request rate per lane.
pub const DEFAULT_REQUESTS_PER_SECOND: u32 = 2;
/// Default queue poll timeout for the merge and persist stages.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Settings rejected before any request is issued.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    /// `page_size` was zero.
    #[error("page size must be positive")]
    ZeroPageSize,
    /// `batch_size` was zero.
    #[error("batch size must be positive")]
    ZeroBatchSize,
    /// `max_concurrent` was zero.
    #[error("max concurrent requests must be positive")]
    ZeroConcurrency,
    /// `requests_per_second` was zero.
    #[error("requests per second must be positive")]
    ZeroRate,
    /// `poll_interval` was zero.
    #[error("poll interval must be positive")]
    ZeroPollInterval,
    /// The retry policy allows no attempt at all.
    #[error("retry policy must allow at least one attempt")]
    NoAttempts,
}

/// Immutable settings for [`crate::sync::LayerSync`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncSettings {
    /// Features requested per page.
    pub page_size: u64,
    /// Records per persisted batch.
    pub batch_size: usize,
    /// Page requests in flight at once, and the number of rate lanes.
    pub max_concurrent: usize,
    /// Requests per second allowed on each lane.
    pub requests_per_second: u32,
    /// How long the merge and persist stages wait on their queue before
    /// re-checking completion.
    pub poll_interval: Duration,
    /// Retry budget for each page request.
    pub retry: RetryPolicy,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            page_size: DEFAULT_PAGE_SIZE,
            batch_size: DEFAULT_BATCH_SIZE,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            poll_interval: DEFAULT_POLL_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

impl SyncSettings {
    /// Set the page size.
    #[must_use]
    pub const fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    /// Set the batch size.
    #[must_use]
    pub const fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }

    /// Set the concurrency limit.
    #[must_use]
    pub const fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.max_concurrent = max_concurrent;
        self
    }

    /// Set the per-lane request rate.
    #[must_use]
    pub const fn with_requests_per_second(mut self, requests_per_second: u32) -> Self {
        self.requests_per_second = requests_per_second;
        self
    }

    /// Set the queue poll timeout.
    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Set the retry policy.
    #[must_use]
    pub const fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Capacity of each inter-stage queue.
    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.max_concurrent.saturating_mul(2)
    }

    /// Check every limit is usable.
    ///
    /// # Errors
    ///
    /// Returns the first [`SettingsError`] found.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.page_size == 0 {
            return Err(SettingsError::ZeroPageSize);
        }
        if self.batch_size == 0 {
            return Err(SettingsError::ZeroBatchSize);
        }
        if self.poll_interval.is_zero() {
            return Err(SettingsError::ZeroPollInterval);
        }
        if self.retry.max_attempts == 0 {
            return Err(SettingsError::NoAttempts);
        }
        self.concurrency()?;
        self.rate()?;
        Ok(())
    }

    pub(crate) fn concurrency(&self) -> Result<NonZeroUsize, SettingsError> {
        NonZeroUsize::new(self.max_concurrent).ok_or(SettingsError::ZeroConcurrency)
    }

    pub(crate) fn rate(&self) -> Result<NonZeroU32, SettingsError> {
        NonZeroU32::new(self.requests_per_second).ok_or(SettingsError::ZeroRate)
    }
}
