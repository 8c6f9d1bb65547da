//! Error types produced by the WFS client.

use std::{io, time::Duration};

use thiserror::Error;

/// Transport-level errors encountered while issuing HTTP requests.
///
/// URLs carried here never include query parameters, so credentials do not
/// leak into logs.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum TransportError {
    /// The server returned an HTTP error status.
    #[error("request to {url} failed with status {status}: {message}")]
    Http {
        /// Endpoint URL.
        url: String,
        /// HTTP status code.
        status: u16,
        /// Short error description.
        message: String,
    },
    /// The server asked the client to slow down (HTTP 429).
    #[error("request to {url} was rate limited; retry after {retry_after:?}")]
    RateLimited {
        /// Endpoint URL.
        url: String,
        /// Delay requested through `Retry-After`.
        retry_after: Duration,
    },
    /// The request did not complete within the configured timeout.
    #[error("request to {url} timed out")]
    Timeout {
        /// Endpoint URL.
        url: String,
    },
    /// The request failed due to an I/O error.
    #[error("network error contacting {url}: {source}")]
    Network {
        /// Endpoint URL.
        url: String,
        /// I/O error reported by the transport.
        source: io::Error,
    },
}

impl TransportError {
    /// Whether repeating the request may succeed.
    ///
    /// Network failures, timeouts, rate limiting, `408` and `5xx` responses
    /// are transient. Other client errors (bad credentials, unknown layer)
    /// will not improve with retries.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        match self {
            Self::Http { status, .. } => *status == 408 || *status >= 500,
            Self::RateLimited { .. } | Self::Timeout { .. } | Self::Network { .. } => true,
        }
    }
}

/// Problems decoding a `GetFeature` response document.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum GmlError {
    /// The document is not well-formed XML.
    #[error("malformed XML: {0}")]
    Xml(#[from] quick_xml::Error),
    /// The document contained no root element.
    #[error("response contained no root element")]
    MissingRoot,
    /// The document ended before its root element closed.
    #[error("response ended inside <{element}>")]
    Truncated {
        /// Innermost open element.
        element: String,
    },
    /// The service answered with an OWS exception report.
    #[error("service reported an exception: {message}")]
    ServiceException {
        /// Exception text supplied by the service.
        message: String,
    },
}

/// Why a page was abandoned. Skips are counted and logged; they never abort
/// the run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SkipReason {
    /// Retries were exhausted or the failure was not retryable.
    #[error("page unavailable after {attempts} attempt(s): {last_error}")]
    ChunkUnavailable {
        /// Attempts made.
        attempts: u32,
        /// Error from the final attempt.
        #[source]
        last_error: TransportError,
    },
    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    MalformedResponse(#[source] GmlError),
    /// The request gate was closed before a permit was granted.
    #[error("request gate closed")]
    GateClosed,
}

/// Failure of the one-row total-count probe. Fatal to the run.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ProbeError {
    /// The probe request could not be completed.
    #[error("total-count probe failed: {0}")]
    Unavailable(#[source] SkipReason),
    /// The probe response did not declare `numberMatched`.
    #[error("total-count probe response did not declare numberMatched")]
    MissingTotal,
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn http(status: u16) -> TransportError {
        TransportError::Http {
            url: "https://example.test/wfs".into(),
            status,
            message: String::new(),
        }
    }

    #[rstest]
    #[case(500, true)]
    #[case(503, true)]
    #[case(408, true)]
    #[case(401, false)]
    #[case(404, false)]
    fn classifies_http_statuses(#[case] status: u16, #[case] retryable: bool) {
        assert_eq!(http(status).is_retryable(), retryable);
    }

    #[rstest]
    fn network_failures_are_retryable() {
        let error = TransportError::Network {
            url: "https://example.test/wfs".into(),
            source: io::Error::new(io::ErrorKind::ConnectionReset, "reset"),
        };
        assert!(error.is_retryable());
    }
}
