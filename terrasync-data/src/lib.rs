//! WFS acquisition and synchronisation for terrasync.
//!
//! [`wfs`] fetches and decodes `GetFeature` pages under a shared
//! [`wfs::RequestGate`]; [`sync`] runs the fetch, merge and persist pipeline
//! that keeps a [`terrasync_core::BatchWriter`] up to date; [`layers`] holds
//! the built-in layer descriptions.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use terrasync_data::layers::{CADASTRAL, CADASTRAL_ENDPOINT};
//! use terrasync_data::sync::{SyncSettings, sync_to_path};
//! use terrasync_data::wfs::{Credentials, HttpFeatureSource, HttpSourceConfig, WfsQuery};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let query = WfsQuery::for_layer(&CADASTRAL).with_credentials(Credentials::new("user", "secret"));
//! let source = HttpFeatureSource::new(HttpSourceConfig::new(CADASTRAL_ENDPOINT), query)?;
//! let report = sync_to_path(
//!     "cadastral.sqlite",
//!     Arc::new(source),
//!     CADASTRAL,
//!     SyncSettings::default(),
//!     CancellationToken::new(),
//! )
//! .await?;
//! println!("{} rows stored", report.stored_rows);
//! # Ok(())
//! # }
//! ```

pub mod layers;
pub mod sync;
pub mod wfs;

#[doc(hidden)]
pub mod test_support;
