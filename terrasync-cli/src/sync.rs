//! Sync command implementation for the terrasync CLI.

use std::fmt;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use clap::Parser;
use ortho_config::{OrthoConfig, SubcmdConfigMerge};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use terrasync_core::SyncStatsSnapshot;
use terrasync_data::layers::{CADASTRAL, CADASTRAL_ENDPOINT};
use terrasync_data::sync::{SyncReport, SyncSettings};
use terrasync_data::wfs::{Credentials, HttpFeatureSource, HttpSourceConfig, WfsQuery};
use tokio_util::sync::CancellationToken;

use crate::{
    ARG_BATCH_SIZE, ARG_DATABASE, ARG_ENDPOINT, ARG_MAX_CONCURRENT, ARG_PAGE_SIZE, ARG_PASSWORD,
    ARG_REQUEST_TIMEOUT_SECS, ARG_REQUESTS_PER_SECOND, ARG_USERNAME, CliError, ENV_DATABASE,
};

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;

/// CLI arguments for the `sync` subcommand.
#[derive(Clone, Parser, Deserialize, Serialize, OrthoConfig, Default)]
#[command(
    long_about = "Mirror the cadastral WFS layer into a SQLite database. \
                 Each feature is upserted by its identifier and only \
                 replaces a stored row when its registration timestamp is \
                 newer. Options can come from CLI flags, configuration \
                 files, or environment variables.",
    about = "Synchronise the cadastral layer into SQLite"
)]
#[ortho_config(prefix = "TERRASYNC")]
pub(crate) struct SyncArgs {
    /// Path to the SQLite database to create or update.
    #[arg(long = ARG_DATABASE, value_name = "path")]
    #[serde(default)]
    pub(crate) database: Option<Utf8PathBuf>,
    /// WFS endpoint (defaults to the public cadastral service).
    #[arg(long = ARG_ENDPOINT, value_name = "url")]
    #[serde(default)]
    pub(crate) endpoint: Option<String>,
    /// Service account name.
    #[arg(long = ARG_USERNAME, value_name = "name")]
    #[serde(default)]
    pub(crate) username: Option<String>,
    /// Service account password.
    #[arg(long = ARG_PASSWORD, value_name = "password")]
    #[serde(default)]
    pub(crate) password: Option<String>,
    /// Features requested per page.
    #[arg(long = ARG_PAGE_SIZE, value_name = "count")]
    #[serde(default)]
    pub(crate) page_size: Option<u64>,
    /// Records written per database transaction.
    #[arg(long = ARG_BATCH_SIZE, value_name = "count")]
    #[serde(default)]
    pub(crate) batch_size: Option<usize>,
    /// Maximum number of pages fetched at once.
    #[arg(long = ARG_MAX_CONCURRENT, value_name = "count")]
    #[serde(default)]
    pub(crate) max_concurrent: Option<usize>,
    /// Requests per second allowed on each connection lane.
    #[arg(long = ARG_REQUESTS_PER_SECOND, value_name = "rate")]
    #[serde(default)]
    pub(crate) requests_per_second: Option<u32>,
    /// Seconds allowed for a single request, body included.
    #[arg(long = ARG_REQUEST_TIMEOUT_SECS, value_name = "seconds")]
    #[serde(default)]
    pub(crate) request_timeout_secs: Option<u64>,
}

impl fmt::Debug for SyncArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncArgs")
            .field("database", &self.database)
            .field("endpoint", &self.endpoint)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("page_size", &self.page_size)
            .field("batch_size", &self.batch_size)
            .field("max_concurrent", &self.max_concurrent)
            .field("requests_per_second", &self.requests_per_second)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .finish()
    }
}

impl SyncArgs {
    pub(crate) fn into_config(self) -> Result<SyncConfig, CliError> {
        let merged = self.load_and_merge().map_err(CliError::Configuration)?;
        SyncConfig::try_from(merged)
    }
}

/// Resolved `sync` command configuration.
#[derive(Debug, Clone)]
pub(crate) struct SyncConfig {
    /// SQLite database receiving the layer.
    pub(crate) database: Utf8PathBuf,
    /// WFS endpoint.
    pub(crate) endpoint: String,
    /// Service credentials, when the endpoint needs them.
    pub(crate) credentials: Option<Credentials>,
    /// Pipeline settings.
    pub(crate) settings: SyncSettings,
    /// Per-request timeout.
    pub(crate) request_timeout: Duration,
}

impl SyncConfig {
    pub(crate) fn validate_destination(&self) -> Result<(), CliError> {
        Self::require_not_directory(&self.database)
    }

    fn require_not_directory(path: &Utf8Path) -> Result<(), CliError> {
        if path.is_dir() {
            Err(CliError::DatabaseIsDirectory {
                path: path.to_path_buf(),
            })
        } else {
            Ok(())
        }
    }
}

impl TryFrom<SyncArgs> for SyncConfig {
    type Error = CliError;

    fn try_from(args: SyncArgs) -> Result<Self, Self::Error> {
        let database = args.database.ok_or(CliError::MissingArgument {
            field: ARG_DATABASE,
            env: ENV_DATABASE,
        })?;
        let endpoint = args
            .endpoint
            .unwrap_or_else(|| CADASTRAL_ENDPOINT.to_owned());
        let credentials = match (args.username, args.password) {
            (Some(username), Some(password)) => Some(Credentials::from_secret(
                username,
                SecretString::new(password),
            )),
            (Some(_), None) => {
                return Err(CliError::IncompleteCredentials {
                    present: ARG_USERNAME,
                    missing: ARG_PASSWORD,
                });
            }
            (None, Some(_)) => {
                return Err(CliError::IncompleteCredentials {
                    present: ARG_PASSWORD,
                    missing: ARG_USERNAME,
                });
            }
            (None, None) => None,
        };

        let mut settings = SyncSettings::default();
        if let Some(page_size) = args.page_size {
            settings = settings.with_page_size(page_size);
        }
        if let Some(batch_size) = args.batch_size {
            settings = settings.with_batch_size(batch_size);
        }
        if let Some(max_concurrent) = args.max_concurrent {
            settings = settings.with_max_concurrent(max_concurrent);
        }
        if let Some(rate) = args.requests_per_second {
            settings = settings.with_requests_per_second(rate);
        }
        settings.validate()?;

        let timeout_secs = args
            .request_timeout_secs
            .unwrap_or(DEFAULT_REQUEST_TIMEOUT_SECS);
        if timeout_secs == 0 {
            return Err(CliError::ZeroValue {
                field: ARG_REQUEST_TIMEOUT_SECS,
            });
        }

        Ok(Self {
            database,
            endpoint,
            credentials,
            settings,
            request_timeout: Duration::from_secs(timeout_secs),
        })
    }
}

/// Machine-readable outcome printed after a run.
#[derive(Debug, Clone, Serialize)]
pub(crate) struct SyncSummary {
    pub(crate) total_available: u64,
    pub(crate) pages_planned: u64,
    pub(crate) stored_rows: u64,
    pub(crate) duration_secs: f64,
    pub(crate) cancelled: bool,
    pub(crate) complete: bool,
    pub(crate) stats: SyncStatsSnapshot,
}

impl From<&SyncReport> for SyncSummary {
    fn from(report: &SyncReport) -> Self {
        Self {
            total_available: report.total_available,
            pages_planned: report.pages_planned,
            stored_rows: report.stored_rows,
            duration_secs: report.duration.as_secs_f64(),
            cancelled: report.cancelled,
            complete: report.is_complete(),
            stats: report.stats,
        }
    }
}

pub(crate) fn build_source(config: &SyncConfig) -> Result<HttpFeatureSource, CliError> {
    let mut query = WfsQuery::for_layer(&CADASTRAL);
    if let Some(credentials) = &config.credentials {
        query = query.with_credentials(credentials.clone());
    }
    let source_config =
        HttpSourceConfig::new(config.endpoint.clone()).with_request_timeout(config.request_timeout);
    HttpFeatureSource::new(source_config, query).map_err(|source| CliError::BuildSource {
        endpoint: config.endpoint.clone(),
        source,
    })
}

/// Run the pipeline described by `config` until it finishes or `shutdown`
/// is cancelled and the in-flight pages have drained.
#[cfg(feature = "store-sqlite")]
pub(crate) async fn execute(
    config: SyncConfig,
    shutdown: CancellationToken,
) -> Result<SyncSummary, CliError> {
    use std::sync::Arc;

    let source = build_source(&config)?;
    tracing::info!(
        endpoint = source.endpoint(),
        database = %config.database,
        authenticated = config.credentials.is_some(),
        "starting sync"
    );
    let report = terrasync_data::sync::sync_to_path(
        config.database.as_std_path(),
        Arc::new(source),
        CADASTRAL,
        config.settings,
        shutdown,
    )
    .await?;
    Ok(SyncSummary::from(&report))
}

#[cfg(not(feature = "store-sqlite"))]
pub(crate) async fn execute(
    config: SyncConfig,
    shutdown: CancellationToken,
) -> Result<SyncSummary, CliError> {
    build_source(&config)?;
    drop(shutdown);
    Err(CliError::MissingFeature {
        feature: "store-sqlite",
        action: "sync",
    })
}
