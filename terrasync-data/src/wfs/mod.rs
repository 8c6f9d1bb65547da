//! WFS 2.0 client: transport, response decoding, pacing and retries.
//!
//! A [`ChunkFetcher`] turns one planned page into a [`PageOutcome`]. It
//! asks the shared [`RequestGate`] for a permit, calls a [`FeatureSource`]
//! (normally [`HttpFeatureSource`]), retries transient failures under a
//! [`RetryPolicy`], and decodes the body with [`decode_page`] before handing
//! each feature to the layer's parser.

mod error;
mod fetcher;
mod gate;
mod gml;
mod query;
mod retry;
mod source;

pub use error::{GmlError, ProbeError, SkipReason, TransportError};
pub use fetcher::{ChunkFetcher, PageOutcome, PageResult};
pub use gate::{GateClosed, GatePermit, RequestGate};
pub use gml::{FeaturePage, decode_page};
pub use query::{Credentials, WFS_VERSION, WfsQuery};
pub use retry::RetryPolicy;
pub use source::{
    DEFAULT_RETRY_AFTER, DEFAULT_USER_AGENT, FeatureSource, HttpFeatureSource, HttpSourceConfig,
    SourceBuildError,
};
