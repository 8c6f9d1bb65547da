//! Concurrency and request-rate gate shared by all page fetches.
//!
//! A [`RequestGate`] combines a semaphore bounding in-flight requests with a
//! fixed set of lanes, one per concurrency slot. Each lane remembers when its
//! previous request started and paces the next one to at most
//! `requests_per_second`. Lane state therefore never grows beyond
//! `max_concurrent` entries, however many pages are fetched.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedSemaphorePermit, Semaphore};
use tokio::time::{Instant, sleep_until};

/// The gate was closed; no further permits are granted.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("request gate closed")]
pub struct GateClosed;

type Lane = Arc<Mutex<Option<Instant>>>;

#[derive(Debug)]
struct GateInner {
    semaphore: Arc<Semaphore>,
    lanes: Vec<Lane>,
    min_interval: Duration,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Bounds concurrent requests and paces each lane.
///
/// Clones share the same limits.
///
/// # Examples
///
/// ```
/// use std::num::NonZeroU32;
/// use std::num::NonZeroUsize;
/// use terrasync_data::wfs::RequestGate;
///
/// # tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap().block_on(async {
/// let gate = RequestGate::new(
///     NonZeroUsize::new(2).unwrap(),
///     NonZeroU32::new(10).unwrap(),
/// );
/// let permit = gate.acquire().await.expect("gate open");
/// assert_eq!(gate.in_flight(), 1);
/// drop(permit);
/// assert_eq!(gate.in_flight(), 0);
/// # });
/// ```
#[derive(Debug, Clone)]
pub struct RequestGate {
    inner: Arc<GateInner>,
}

impl RequestGate {
    /// Create a gate with `max_concurrent` lanes, each limited to
    /// `requests_per_second`.
    #[must_use]
    pub fn new(max_concurrent: std::num::NonZeroUsize, requests_per_second: NonZeroU32) -> Self {
        let lanes = (0..max_concurrent.get())
            .map(|_| Arc::new(Mutex::new(None)))
            .collect();
        Self {
            inner: Arc::new(GateInner {
                semaphore: Arc::new(Semaphore::new(max_concurrent.get())),
                lanes,
                min_interval: Duration::from_secs(1) / requests_per_second.get(),
                in_flight: AtomicUsize::new(0),
                peak_in_flight: AtomicUsize::new(0),
            }),
        }
    }

    /// Wait for a free concurrency slot on any lane.
    ///
    /// # Errors
    ///
    /// Returns [`GateClosed`] once [`RequestGate::close`] has been called.
    pub async fn acquire(&self) -> Result<GatePermit, GateClosed> {
        let slot = self.slot().await?;
        // Every lane holder also holds a slot, so a free lane exists unless
        // another caller claims it between our probes.
        loop {
            for (index, lane) in self.inner.lanes.iter().enumerate() {
                if let Ok(guard) = Arc::clone(lane).try_lock_owned() {
                    return Ok(self.pace(slot, guard, index).await);
                }
            }
            tokio::task::yield_now().await;
        }
    }

    /// Wait for a slot on a specific lane. Lanes wrap modulo the lane count.
    ///
    /// # Errors
    ///
    /// Returns [`GateClosed`] once [`RequestGate::close`] has been called.
    pub async fn acquire_lane(&self, lane: usize) -> Result<GatePermit, GateClosed> {
        let index = lane % self.inner.lanes.len();
        let slot = self.slot().await?;
        let guard = Arc::clone(&self.inner.lanes[index]).lock_owned().await;
        Ok(self.pace(slot, guard, index).await)
    }

    /// Refuse all pending and future acquisitions.
    pub fn close(&self) {
        self.inner.semaphore.close();
    }

    /// Number of lanes, equal to the concurrency limit.
    #[must_use]
    pub fn lanes(&self) -> usize {
        self.inner.lanes.len()
    }

    /// Minimum spacing between two requests on the same lane.
    #[must_use]
    pub fn min_interval(&self) -> Duration {
        self.inner.min_interval
    }

    /// Permits currently held.
    #[must_use]
    pub fn in_flight(&self) -> usize {
        self.inner.in_flight.load(Ordering::Relaxed)
    }

    /// Highest number of permits held at once.
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.inner.peak_in_flight.load(Ordering::Relaxed)
    }

    async fn slot(&self) -> Result<OwnedSemaphorePermit, GateClosed> {
        Arc::clone(&self.inner.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| GateClosed)
    }

    async fn pace(
        &self,
        slot: OwnedSemaphorePermit,
        mut lane: OwnedMutexGuard<Option<Instant>>,
        index: usize,
    ) -> GatePermit {
        if let Some(previous) = *lane {
            sleep_until(previous + self.inner.min_interval).await;
        }
        *lane = Some(Instant::now());

        let current = self.inner.in_flight.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner
            .peak_in_flight
            .fetch_max(current, Ordering::Relaxed);

        GatePermit {
            _slot: slot,
            _lane: lane,
            lane: index,
            gate: Arc::clone(&self.inner),
        }
    }
}

/// Right to issue one request. Dropping it frees the slot and the lane.
#[derive(Debug)]
pub struct GatePermit {
    _slot: OwnedSemaphorePermit,
    _lane: OwnedMutexGuard<Option<Instant>>,
    lane: usize,
    gate: Arc<GateInner>,
}

impl GatePermit {
    /// Lane this permit paces.
    #[must_use]
    pub const fn lane(&self) -> usize {
        self.lane
    }
}

impl Drop for GatePermit {
    fn drop(&mut self) {
        self.gate.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
