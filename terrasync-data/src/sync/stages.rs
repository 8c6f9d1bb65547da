//! The three long-lived pipeline stages and their completion flags.

use std::collections::HashSet;
use std::mem;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use terrasync_core::{BatchWriter, FeatureRecord, SyncStats};
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use super::error::{Stage, StageError};
use super::plan::PagePlan;
use crate::wfs::{ChunkFetcher, PageOutcome, PageResult};

/// One-shot flag set by an upstream stage once it will send nothing more.
#[derive(Debug, Clone, Default)]
pub(crate) struct CompletionFlag(Arc<AtomicBool>);

impl CompletionFlag {
    pub(crate) fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What a stage hands back when it finishes cleanly.
pub(crate) enum StageExit<W> {
    /// `stopped_early` is set when shutdown left planned pages unscheduled.
    Fetched { stopped_early: bool },
    Merged,
    Persisted(W),
}

pub(crate) struct FetchStage {
    pub(crate) fetcher: ChunkFetcher,
    pub(crate) plan: PagePlan,
    pub(crate) max_concurrent: usize,
    pub(crate) stats: Arc<SyncStats>,
    pub(crate) pages: Sender<PageResult>,
    pub(crate) done: CompletionFlag,
    pub(crate) shutdown: CancellationToken,
}

impl FetchStage {
    pub(crate) async fn run<W>(self) -> Result<StageExit<W>, StageError> {
        let planned = self.plan.pages();
        let mut offsets = self.plan.iter();
        let mut tasks = JoinSet::new();
        let mut settled = 0_u64;
        let mut scheduled = 0_u64;

        loop {
            while tasks.len() < self.max_concurrent && !self.shutdown.is_cancelled() {
                let Some((page_index, start_index)) = offsets.next() else {
                    break;
                };
                scheduled += 1;
                let fetcher = self.fetcher.clone();
                tasks.spawn(async move { fetcher.fetch_page(page_index, start_index).await });
            }
            let Some(joined) = tasks.join_next().await else {
                break;
            };
            let outcome = joined.map_err(|err| StageError::failed(Stage::Fetch, err))?;
            settled += 1;
            match outcome {
                PageOutcome::Fetched(page) => {
                    self.stats.record_page(&page.tally);
                    self.pages
                        .send(page)
                        .await
                        .map_err(|_| StageError::DownstreamClosed {
                            stage: Stage::Fetch,
                            downstream: Stage::Merge,
                        })?;
                }
                PageOutcome::Skipped { .. } => self.stats.record_skipped_page(),
            }
            let stats = self.stats.snapshot();
            log::info!(
                "fetched {settled}/{planned} pages; {} of {} features accepted",
                stats.features_accepted,
                self.plan.total()
            );
        }

        let stopped_early = scheduled < planned;
        if stopped_early {
            log::info!("shutdown requested; stopped after {settled}/{planned} pages");
        }
        self.done.set();
        Ok(StageExit::Fetched { stopped_early })
    }
}

pub(crate) struct MergeStage {
    pub(crate) batch_size: usize,
    pub(crate) poll_interval: Duration,
    pub(crate) stats: Arc<SyncStats>,
    pub(crate) pages: Receiver<PageResult>,
    pub(crate) batches: Sender<Vec<FeatureRecord>>,
    pub(crate) fetch_done: CompletionFlag,
    pub(crate) done: CompletionFlag,
}

impl MergeStage {
    pub(crate) async fn run<W>(mut self) -> Result<StageExit<W>, StageError> {
        let mut merged = HashSet::new();
        let mut batch = Vec::with_capacity(self.batch_size);

        loop {
            let page = match timeout(self.poll_interval, self.pages.recv()).await {
                Ok(Some(page)) => page,
                Ok(None) => break,
                Err(_) if self.fetch_done.is_set() && self.pages.is_empty() => break,
                Err(_) => continue,
            };
            if !merged.insert(page.page_index) {
                log::warn!("discarding repeated page {}", page.page_index);
                self.stats.record_duplicate_page();
                continue;
            }
            for record in page.records {
                batch.push(record);
                if batch.len() == self.batch_size {
                    let full = mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                    self.emit(full).await?;
                }
            }
        }

        if !batch.is_empty() {
            self.emit(batch).await?;
        }
        self.done.set();
        Ok(StageExit::Merged)
    }

    async fn emit(&self, batch: Vec<FeatureRecord>) -> Result<(), StageError> {
        self.batches
            .send(batch)
            .await
            .map_err(|_| StageError::DownstreamClosed {
                stage: Stage::Merge,
                downstream: Stage::Persist,
            })
    }
}

pub(crate) struct PersistStage<W> {
    pub(crate) writer: W,
    pub(crate) poll_interval: Duration,
    pub(crate) stats: Arc<SyncStats>,
    pub(crate) batches: Receiver<Vec<FeatureRecord>>,
    pub(crate) merge_done: CompletionFlag,
}

impl<W: BatchWriter + 'static> PersistStage<W> {
    pub(crate) async fn run(self) -> Result<StageExit<W>, StageError> {
        let Self {
            mut writer,
            poll_interval,
            stats,
            mut batches,
            merge_done,
        } = self;
        let mut index = 0_usize;

        loop {
            let batch = match timeout(poll_interval, batches.recv()).await {
                Ok(Some(batch)) => batch,
                Ok(None) => break,
                Err(_) if merge_done.is_set() && batches.is_empty() => break,
                Err(_) => continue,
            };
            let records = batch.len();
            let (returned, result) = tokio::task::spawn_blocking(move || {
                let result = writer.write_batch(&batch);
                (writer, result)
            })
            .await
            .map_err(|err| StageError::failed(Stage::Persist, err))?;
            writer = returned;
            let rows = result.map_err(|err| StageError::Persist {
                batch: index,
                source: Box::new(err),
            })?;
            stats.record_batch(rows);
            log::info!("wrote batch {index}: {records} records, {rows} rows affected");
            index += 1;
        }

        Ok(StageExit::Persisted(writer))
    }
}
