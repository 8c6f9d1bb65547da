//! Command-line interface for terrasync.
#![forbid(unsafe_code)]

use std::io::{self, Write};

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

mod error;
mod sync;

pub use error::CliError;
use sync::{SyncArgs, SyncConfig, SyncSummary};

const ARG_DATABASE: &str = "database";
const ARG_ENDPOINT: &str = "endpoint";
const ARG_USERNAME: &str = "username";
const ARG_PASSWORD: &str = "password";
const ARG_PAGE_SIZE: &str = "page-size";
const ARG_BATCH_SIZE: &str = "batch-size";
const ARG_MAX_CONCURRENT: &str = "max-concurrent";
const ARG_REQUESTS_PER_SECOND: &str = "requests-per-second";
const ARG_REQUEST_TIMEOUT_SECS: &str = "request-timeout-secs";
const ENV_DATABASE: &str = "TERRASYNC_CMDS_SYNC_DATABASE";

/// Run the terrasync CLI with the current process arguments and environment.
///
/// # Errors
///
/// Returns [`CliError`] when arguments or configuration are invalid, or the
/// sync itself fails.
pub fn run() -> Result<(), CliError> {
    let cli = Cli::try_parse().map_err(CliError::ArgumentParsing)?;
    match cli.command {
        Command::Sync(args) => {
            let config = resolve_sync_config(args)?;
            let summary = run_sync(config)?;
            write_summary(&mut io::stdout().lock(), &summary)?;
        }
    }
    Ok(())
}

fn resolve_sync_config(args: SyncArgs) -> Result<SyncConfig, CliError> {
    let config = args.into_config()?;
    config.validate_destination()?;
    Ok(config)
}

fn run_sync(config: SyncConfig) -> Result<SyncSummary, CliError> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(CliError::Runtime)?;
    runtime.block_on(async {
        let shutdown = CancellationToken::new();
        let listener = tokio::spawn(cancel_on_interrupt(shutdown.clone()));
        let outcome = sync::execute(config, shutdown).await;
        listener.abort();
        outcome
    })
}

async fn cancel_on_interrupt(shutdown: CancellationToken) {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::warn!("interrupt received; finishing pages already in flight");
            shutdown.cancel();
        }
        Err(err) => tracing::error!(error = %err, "failed to listen for interrupts"),
    }
}

fn write_summary(out: &mut impl Write, summary: &SyncSummary) -> Result<(), CliError> {
    serde_json::to_writer_pretty(&mut *out, summary).map_err(CliError::WriteSummary)?;
    writeln!(out).map_err(|err| CliError::WriteSummary(serde_json::Error::io(err)))
}

#[derive(Debug, Parser)]
#[command(
    name = "terrasync",
    about = "Mirror WFS feature layers into a local spatial database",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Fetch the cadastral layer and upsert it into SQLite.
    Sync(SyncArgs),
}

#[cfg(test)]
mod tests;
