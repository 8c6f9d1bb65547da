//! Error types emitted by the terrasync CLI.
//!
//! Keep this error type reasonably small, as many CLI helpers return
//! `Result<_, CliError>` and the workspace enables `clippy::result_large_err`.

use std::sync::Arc;

use camino::Utf8PathBuf;
use terrasync_data::sync::{SettingsError, SyncError};
use terrasync_data::wfs::SourceBuildError;
use thiserror::Error;

/// Errors emitted by the terrasync CLI.
#[derive(Debug, Error)]
pub enum CliError {
    /// Provided arguments failed Clap validation.
    #[error(transparent)]
    ArgumentParsing(#[from] clap::Error),
    /// Configuration layering failed (files, env, CLI).
    #[error("failed to load configuration: {0}")]
    Configuration(#[from] Arc<ortho_config::OrthoError>),
    /// A required option is missing after configuration merging.
    #[error("missing {field} (set --{field} or {env})")]
    MissingArgument {
        field: &'static str,
        env: &'static str,
    },
    /// Only one half of the service credentials was supplied.
    #[error("--{present} was given without --{missing}")]
    IncompleteCredentials {
        present: &'static str,
        missing: &'static str,
    },
    /// A numeric option is out of range.
    #[error("--{field} must be greater than zero")]
    ZeroValue { field: &'static str },
    /// Pipeline settings were rejected.
    #[error("invalid sync settings: {0}")]
    InvalidSettings(#[from] SettingsError),
    /// The database path names a directory.
    #[error("database path {path:?} is a directory")]
    DatabaseIsDirectory { path: Utf8PathBuf },
    /// The requested operation requires a missing compile-time feature.
    #[error("{action} requires the `{feature}` feature to be enabled")]
    MissingFeature {
        feature: &'static str,
        action: &'static str,
    },
    /// Constructing the WFS client failed.
    #[error("failed to build WFS client for {endpoint:?}: {source}")]
    BuildSource {
        endpoint: String,
        #[source]
        source: SourceBuildError,
    },
    /// The async runtime could not start.
    #[error("failed to start async runtime: {0}")]
    Runtime(#[source] std::io::Error),
    /// The sync pipeline failed.
    #[error("sync failed: {0}")]
    Sync(#[from] SyncError),
    /// Writing the run summary failed.
    #[error("failed to write sync summary: {0}")]
    WriteSummary(#[source] serde_json::Error),
}
