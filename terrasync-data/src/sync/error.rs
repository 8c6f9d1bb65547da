//! Errors that end a synchronisation run.

use std::fmt;

use terrasync_core::{LayerSchemaError, SyncStatsSnapshot};
use thiserror::Error;

use super::settings::SettingsError;
use crate::wfs::ProbeError;

/// Boxed writer error.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Pipeline stage names used in errors and logs, ordered upstream first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Stage {
    /// Schedules page fetches and feeds the feature queue.
    Fetch,
    /// Deduplicates pages and assembles batches.
    Merge,
    /// Writes batches through the writer.
    Persist,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Merge => "merge",
            Self::Persist => "persist",
        })
    }
}

/// Fatal failure of [`crate::sync::LayerSync::sync`].
///
/// Skipped pages and dropped features are not errors; they are counted in
/// the report. Failures after the stages start carry the counters gathered
/// so far.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SyncError {
    /// Settings were rejected before any request.
    #[error("invalid settings: {0}")]
    InvalidSettings(#[from] SettingsError),
    /// The layer description is unusable.
    #[error("invalid layer: {0}")]
    InvalidLayer(#[from] LayerSchemaError),
    /// The target store could not be opened.
    #[cfg(feature = "store-sqlite")]
    #[error("failed to open store: {0}")]
    OpenStore(#[source] terrasync_core::FeatureStoreError),
    /// The writer could not prepare its schema.
    #[error("failed to prepare store: {source}")]
    Prepare {
        /// Writer error.
        source: BoxError,
    },
    /// The total-count probe failed.
    #[error(transparent)]
    Probe(#[from] ProbeError),
    /// A batch could not be persisted.
    #[error("failed to persist batch {batch}: {source}")]
    Persist {
        /// Zero-based batch index.
        batch: usize,
        /// Writer error.
        source: BoxError,
        /// Counters at the time of failure.
        stats: SyncStatsSnapshot,
    },
    /// A stage stopped unexpectedly.
    #[error("{stage} stage failed: {message}")]
    StageFailure {
        /// Failing stage.
        stage: Stage,
        /// Description of the failure.
        message: String,
        /// Counters at the time of failure.
        stats: SyncStatsSnapshot,
    },
    /// The task supervising the stages failed.
    #[error("pipeline supervisor failed: {message}")]
    Supervisor {
        /// Description of the failure.
        message: String,
        /// Counters at the time of failure.
        stats: SyncStatsSnapshot,
    },
}

impl SyncError {
    /// Counters captured when a running pipeline failed.
    #[must_use]
    pub fn stats(&self) -> Option<&SyncStatsSnapshot> {
        match self {
            Self::Persist { stats, .. }
            | Self::StageFailure { stats, .. }
            | Self::Supervisor { stats, .. } => Some(stats),
            _ => None,
        }
    }
}

/// Stage-local failure, completed with counters by the orchestrator.
///
/// `DownstreamClosed` and `Aborted` are consequences of another stage
/// stopping; the orchestrator reports them only when no root cause arrives.
#[derive(Debug)]
pub(crate) enum StageError {
    Failed { stage: Stage, message: String },
    Persist { batch: usize, source: BoxError },
    DownstreamClosed { stage: Stage, downstream: Stage },
    Aborted(Stage),
    Supervisor(String),
}

impl StageError {
    pub(crate) fn failed(stage: Stage, message: impl fmt::Display) -> Self {
        Self::Failed {
            stage,
            message: message.to_string(),
        }
    }

    /// Stage that stopped because of another stage, if this is such a
    /// failure.
    pub(crate) const fn secondary_stage(&self) -> Option<Stage> {
        match self {
            Self::DownstreamClosed { stage, .. } | Self::Aborted(stage) => Some(*stage),
            Self::Failed { .. } | Self::Persist { .. } | Self::Supervisor(_) => None,
        }
    }

    pub(crate) fn into_sync_error(self, stats: SyncStatsSnapshot) -> SyncError {
        match self {
            Self::Failed { stage, message } => SyncError::StageFailure {
                stage,
                message,
                stats,
            },
            Self::Persist { batch, source } => SyncError::Persist {
                batch,
                source,
                stats,
            },
            Self::DownstreamClosed { stage, downstream } => SyncError::StageFailure {
                stage,
                message: format!("{downstream} stage stopped"),
                stats,
            },
            Self::Aborted(stage) => SyncError::StageFailure {
                stage,
                message: "aborted".to_owned(),
                stats,
            },
            Self::Supervisor(message) => SyncError::Supervisor { message, stats },
        }
    }
}
