//! Page transport: the [`FeatureSource`] seam and its HTTP implementation.

use std::{io, time::Duration};

use async_trait::async_trait;
use reqwest::header::{RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Response, StatusCode};
use thiserror::Error;
use url::Url;

use super::error::TransportError;
use super::query::WfsQuery;

/// Default user agent for WFS requests.
pub const DEFAULT_USER_AGENT: &str = "terrasync/0.1";

/// Delay assumed when a 429 response carries no usable `Retry-After`.
pub const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(5);

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 300;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 60;

/// Anything able to return the raw response document for one page.
#[async_trait]
pub trait FeatureSource: Send + Sync {
    /// Fetch the document for the `count` features starting at
    /// `start_index`.
    async fn get_page(&self, start_index: u64, count: u64) -> Result<String, TransportError>;
}

/// Connection settings for [`HttpFeatureSource`].
#[derive(Debug, Clone)]
pub struct HttpSourceConfig {
    /// Service endpoint without query parameters.
    pub endpoint: String,
    /// Total time allowed for one request, body included.
    pub request_timeout: Duration,
    /// Time allowed to establish a connection.
    pub connect_timeout: Duration,
    /// User agent string for requests.
    pub user_agent: String,
}

impl Default for HttpSourceConfig {
    fn default() -> Self {
        Self {
            endpoint: crate::layers::CADASTRAL_ENDPOINT.to_owned(),
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            user_agent: DEFAULT_USER_AGENT.to_owned(),
        }
    }
}

impl HttpSourceConfig {
    /// Create a configuration for `endpoint` with default timeouts.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            ..Default::default()
        }
    }

    /// Set the per-request timeout.
    #[must_use]
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the connect timeout.
    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the user agent string.
    #[must_use]
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }
}

/// Failures constructing an [`HttpFeatureSource`].
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SourceBuildError {
    /// The endpoint is not an absolute URL.
    #[error("invalid endpoint '{endpoint}': {source}")]
    InvalidEndpoint {
        /// Rejected endpoint.
        endpoint: String,
        /// Parser error.
        source: url::ParseError,
    },
    /// The HTTP client could not be built.
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// [`FeatureSource`] issuing `GetFeature` requests over HTTP.
pub struct HttpFeatureSource {
    client: Client,
    endpoint: Url,
    display_url: String,
    query: WfsQuery,
    user_agent: String,
}

impl std::fmt::Debug for HttpFeatureSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFeatureSource")
            .field("endpoint", &self.display_url)
            .field("query", &self.query)
            .finish_non_exhaustive()
    }
}

impl HttpFeatureSource {
    /// Build a source for `query` against the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SourceBuildError`] when the endpoint does not parse or the
    /// HTTP client cannot be built.
    pub fn new(config: HttpSourceConfig, query: WfsQuery) -> Result<Self, SourceBuildError> {
        let endpoint =
            Url::parse(&config.endpoint).map_err(|source| SourceBuildError::InvalidEndpoint {
                endpoint: config.endpoint.clone(),
                source,
            })?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(SourceBuildError::HttpClient)?;
        let mut display = endpoint.clone();
        display.set_query(None);
        Ok(Self {
            client,
            endpoint,
            display_url: display.into(),
            query,
            user_agent: config.user_agent,
        })
    }

    /// Endpoint URL with any query stripped, safe to log.
    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.display_url
    }

    fn page_url(&self, start_index: u64, count: u64) -> Url {
        let mut url = self.endpoint.clone();
        url.query_pairs_mut()
            .extend_pairs(self.query.page_params(start_index, count));
        url
    }

    async fn read_body(&self, response: Response) -> Result<String, TransportError> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited {
                url: self.endpoint().to_owned(),
                retry_after: retry_after(&response),
            });
        }
        if !status.is_success() {
            return Err(TransportError::Http {
                url: self.endpoint().to_owned(),
                status: status.as_u16(),
                message: status
                    .canonical_reason()
                    .unwrap_or("unexpected status")
                    .to_owned(),
            });
        }
        response
            .text()
            .await
            .map_err(|err| convert_reqwest_error(&err, self.endpoint()))
    }
}

#[async_trait]
impl FeatureSource for HttpFeatureSource {
    async fn get_page(&self, start_index: u64, count: u64) -> Result<String, TransportError> {
        let response = self
            .client
            .get(self.page_url(start_index, count))
            .header(USER_AGENT, self.user_agent.as_str())
            .send()
            .await
            .map_err(|err| convert_reqwest_error(&err, self.endpoint()))?;
        self.read_body(response).await
    }
}

fn retry_after(response: &Response) -> Duration {
    response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|value| value.to_str().ok())
        .and_then(parse_retry_after)
        .unwrap_or(DEFAULT_RETRY_AFTER)
}

/// Interpret a `Retry-After` header given in whole seconds.
///
/// HTTP-date values are not supported and yield `None`.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

// `url` is the endpoint only; reqwest's own message is dropped because it
// embeds the full request URL, credentials included.
fn convert_reqwest_error(error: &reqwest::Error, url: &str) -> TransportError {
    if error.is_timeout() {
        return TransportError::Timeout {
            url: url.to_owned(),
        };
    }
    if let Some(status) = error.status() {
        return TransportError::Http {
            url: url.to_owned(),
            status: status.as_u16(),
            message: status.canonical_reason().unwrap_or_default().to_owned(),
        };
    }
    let kind = if error.is_connect() {
        io::ErrorKind::ConnectionRefused
    } else {
        io::ErrorKind::Other
    };
    TransportError::Network {
        url: url.to_owned(),
        source: io::Error::new(kind, describe(error)),
    }
}

fn describe(error: &reqwest::Error) -> String {
    let mut message = if error.is_connect() {
        "connection failed".to_owned()
    } else if error.is_body() || error.is_decode() {
        "failed to read response body".to_owned()
    } else {
        "request failed".to_owned()
    };
    let mut source = std::error::Error::source(error);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
