//! Fetch, merge and persist pipeline for one layer.
//!
//! [`LayerSync::sync`] prepares the writer, probes the total once, then runs
//! three stages joined by bounded queues of `2 * max_concurrent` entries:
//!
//! 1. the fetch stage keeps up to `max_concurrent` page fetches running and
//!    pushes each decoded page on the feature queue;
//! 2. the merge stage discards repeated pages and cuts records into batches
//!    of exactly `batch_size`, flushing the remainder at the end;
//! 3. the persist stage writes each batch on the blocking pool.
//!
//! Downstream stages poll their queue with a timeout and stop once the
//! upstream completion flag is set and the queue is empty. A stage failure
//! aborts the others; a stage that only stopped because its downstream queue
//! closed is reported when no other failure explains the stop.

mod error;
mod plan;
mod settings;
mod stages;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use terrasync_core::{BatchWriter, SyncStats, SyncStatsSnapshot};
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

pub use error::{BoxError, Stage, SyncError};
pub use plan::PagePlan;
pub use settings::{
    DEFAULT_BATCH_SIZE, DEFAULT_MAX_CONCURRENT, DEFAULT_PAGE_SIZE, DEFAULT_POLL_INTERVAL,
    DEFAULT_REQUESTS_PER_SECOND, SettingsError, SyncSettings,
};

use error::StageError;
use stages::{CompletionFlag, FetchStage, MergeStage, PersistStage, StageExit};

use crate::layers::WfsLayer;
use crate::wfs::{ChunkFetcher, FeatureSource, RequestGate};

/// Outcome of a finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    /// Features the service reported through the probe.
    pub total_available: u64,
    /// Pages planned from the probed total.
    pub pages_planned: u64,
    /// Rows in the store after the run.
    pub stored_rows: u64,
    /// Counters gathered during the run.
    pub stats: SyncStatsSnapshot,
    /// Wall-clock time of the run.
    pub duration: Duration,
    /// Whether shutdown stopped the run before every planned page was
    /// scheduled, including a shutdown during the probe.
    pub cancelled: bool,
}

impl SyncReport {
    /// Whether every planned page was fetched.
    #[must_use]
    pub const fn is_complete(&self) -> bool {
        !self.cancelled && self.stats.pages_fetched == self.pages_planned
    }
}

type StageResult<W> = Result<StageExit<W>, StageError>;

/// Writer and early-stop flag handed back by a finished pipeline.
struct StagesFinished<W> {
    writer: W,
    stopped_early: bool,
}

/// Synchronises one layer from a [`FeatureSource`] into a [`BatchWriter`].
#[derive(Debug)]
pub struct LayerSync {
    fetcher: ChunkFetcher,
    layer: WfsLayer,
    settings: SyncSettings,
}

impl LayerSync {
    /// Validate `settings` and `layer` and build the shared request gate.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::InvalidSettings`] or [`SyncError::InvalidLayer`].
    pub fn new(
        source: Arc<dyn FeatureSource>,
        layer: WfsLayer,
        settings: SyncSettings,
    ) -> Result<Self, SyncError> {
        settings.validate()?;
        layer.schema.validate()?;
        let gate = RequestGate::new(settings.concurrency()?, settings.rate()?);
        let fetcher = ChunkFetcher::new(source, layer, gate, settings.retry, settings.page_size);
        Ok(Self {
            fetcher,
            layer,
            settings,
        })
    }

    /// Gate pacing every request of this pipeline.
    #[must_use]
    pub const fn gate(&self) -> &RequestGate {
        self.fetcher.gate()
    }

    /// Settings in effect.
    #[must_use]
    pub const fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Run the pipeline to completion.
    ///
    /// Cancelling `shutdown` stops new pages from being scheduled; pages
    /// already in flight are fetched, merged and persisted before the call
    /// returns. A shutdown during the probe ends the run with nothing
    /// planned.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError`] when the writer cannot prepare, the probe
    /// fails, a batch cannot be written, or a stage stops unexpectedly.
    pub async fn sync<W>(
        &self,
        writer: W,
        shutdown: CancellationToken,
    ) -> Result<SyncReport, SyncError>
    where
        W: BatchWriter + 'static,
    {
        let started = Instant::now();
        let (writer, ()) = on_blocking_pool(writer, W::prepare)
            .await
            .map_err(|source| SyncError::Prepare { source })?;

        let total = tokio::select! {
            biased;
            () = shutdown.cancelled() => None,
            probed = self.fetcher.probe_total() => Some(probed?),
        };
        let stats = Arc::new(SyncStats::default());
        let Some(total) = total else {
            log::info!("shutdown requested before the total was probed");
            return self
                .finish(writer, PagePlan::new(0, self.settings.page_size), &stats, started, true)
                .await;
        };

        let plan = PagePlan::new(total, self.settings.page_size);
        log::info!(
            "syncing {} into {}: {total} features in {} pages of {}",
            self.layer.type_name,
            self.layer.schema.table,
            plan.pages(),
            self.settings.page_size
        );

        let finished = self.run_stages(writer, plan, &stats, &shutdown).await?;
        self.finish(finished.writer, plan, &stats, started, finished.stopped_early)
            .await
    }

    async fn finish<W>(
        &self,
        writer: W,
        plan: PagePlan,
        stats: &Arc<SyncStats>,
        started: Instant,
        cancelled: bool,
    ) -> Result<SyncReport, SyncError>
    where
        W: BatchWriter + 'static,
    {
        let (_, stored_rows) = on_blocking_pool(writer, W::count_rows)
            .await
            .map_err(|err| SyncError::StageFailure {
                stage: Stage::Persist,
                message: format!("counting stored rows: {err}"),
                stats: stats.snapshot(),
            })?;

        let report = SyncReport {
            total_available: plan.total(),
            pages_planned: plan.pages(),
            stored_rows,
            stats: stats.snapshot(),
            duration: started.elapsed(),
            cancelled,
        };
        log::info!(
            "sync of {} finished in {:?}: {} accepted, {} dropped, {} pages skipped, {} rows affected, {} rows stored",
            self.layer.type_name,
            report.duration,
            report.stats.features_accepted,
            report.stats.features_dropped,
            report.stats.pages_skipped,
            report.stats.rows_affected,
            report.stored_rows
        );
        Ok(report)
    }

    async fn run_stages<W>(
        &self,
        writer: W,
        plan: PagePlan,
        stats: &Arc<SyncStats>,
        shutdown: &CancellationToken,
    ) -> Result<StagesFinished<W>, SyncError>
    where
        W: BatchWriter + 'static,
    {
        let capacity = self.settings.queue_capacity();
        let (pages_tx, pages_rx) = mpsc::channel(capacity);
        let (batches_tx, batches_rx) = mpsc::channel(capacity);
        let fetch_complete = CompletionFlag::default();
        let processing_complete = CompletionFlag::default();

        let mut stages: JoinSet<StageResult<W>> = JoinSet::new();
        let mut handles = Vec::with_capacity(3);
        let fetch = FetchStage {
            fetcher: self.fetcher.clone(),
            plan,
            max_concurrent: self.settings.max_concurrent,
            stats: Arc::clone(stats),
            pages: pages_tx,
            done: fetch_complete.clone(),
            shutdown: shutdown.clone(),
        };
        spawn_stage(&mut stages, &mut handles, Stage::Fetch, fetch.run::<W>());
        let merge = MergeStage {
            batch_size: self.settings.batch_size,
            poll_interval: self.settings.poll_interval,
            stats: Arc::clone(stats),
            pages: pages_rx,
            batches: batches_tx,
            fetch_done: fetch_complete,
            done: processing_complete.clone(),
        };
        spawn_stage(&mut stages, &mut handles, Stage::Merge, merge.run::<W>());
        let persist = PersistStage {
            writer,
            poll_interval: self.settings.poll_interval,
            stats: Arc::clone(stats),
            batches: batches_rx,
            merge_done: processing_complete,
        };
        spawn_stage(&mut stages, &mut handles, Stage::Persist, persist.run());

        let mut writer = None;
        let mut stopped_early = false;
        let mut knock_on = None;
        while let Some(joined) = stages.join_next().await {
            let result =
                joined.unwrap_or_else(|err| Err(StageError::Supervisor(err.to_string())));
            match result {
                Ok(StageExit::Persisted(returned)) => writer = Some(returned),
                Ok(StageExit::Fetched { stopped_early: early }) => {
                    stopped_early = early;
                    log::debug!("fetch stage finished");
                }
                Ok(StageExit::Merged) => log::debug!("merge stage finished"),
                Err(err) => {
                    if let Some(stage) = err.secondary_stage() {
                        // Upstream stages can only fail the same way now.
                        log::debug!("{stage} stage stopped after a downstream stage: {err:?}");
                        handles
                            .iter()
                            .filter(|(upstream, _)| *upstream < stage)
                            .for_each(|(_, handle)| handle.abort());
                        knock_on.get_or_insert(err);
                        continue;
                    }
                    handles.iter().for_each(|(_, handle)| handle.abort());
                    stages.abort_all();
                    let err = err.into_sync_error(stats.snapshot());
                    log::error!("{err}");
                    return Err(err);
                }
            }
        }

        if let Some(err) = knock_on {
            let err = err.into_sync_error(stats.snapshot());
            log::error!("{err}");
            return Err(err);
        }
        let writer = writer.ok_or_else(|| SyncError::StageFailure {
            stage: Stage::Persist,
            message: "persist stage returned no writer".to_owned(),
            stats: stats.snapshot(),
        })?;
        Ok(StagesFinished {
            writer,
            stopped_early,
        })
    }
}

/// Run `body` as its own task and report which stage it was, so a panic
/// still names its stage. Aborting the task through its handle surfaces as
/// [`StageError::Aborted`].
fn spawn_stage<W, F>(
    stages: &mut JoinSet<StageResult<W>>,
    handles: &mut Vec<(Stage, AbortHandle)>,
    stage: Stage,
    body: F,
) where
    W: Send + 'static,
    F: Future<Output = StageResult<W>> + Send + 'static,
{
    let task = tokio::spawn(body);
    handles.push((stage, task.abort_handle()));
    stages.spawn(async move {
        task.await.unwrap_or_else(|err| {
            if err.is_cancelled() {
                Err(StageError::Aborted(stage))
            } else {
                Err(StageError::failed(stage, err))
            }
        })
    });
}

async fn on_blocking_pool<W, T>(
    mut writer: W,
    op: fn(&mut W) -> Result<T, W::Error>,
) -> Result<(W, T), BoxError>
where
    W: BatchWriter + 'static,
    T: Send + 'static,
{
    let (writer, result) = tokio::task::spawn_blocking(move || {
        let result = op(&mut writer);
        (writer, result)
    })
    .await
    .map_err(|err| Box::new(err) as BoxError)?;
    let value = result.map_err(|err| Box::new(err) as BoxError)?;
    Ok((writer, value))
}

/// Open (or create) a SQLite store at `path` and sync `layer` into it.
///
/// # Errors
///
/// Returns [`SyncError::OpenStore`] when the database cannot be opened, and
/// any error of [`LayerSync::sync`].
#[cfg(feature = "store-sqlite")]
pub async fn sync_to_path(
    path: impl AsRef<std::path::Path>,
    source: Arc<dyn FeatureSource>,
    layer: WfsLayer,
    settings: SyncSettings,
    shutdown: CancellationToken,
) -> Result<SyncReport, SyncError> {
    let pipeline = LayerSync::new(source, layer, settings)?;
    let store = terrasync_core::SqliteFeatureStore::open(path, layer.schema)
        .map_err(SyncError::OpenStore)?;
    pipeline.sync(store, shutdown).await
}
