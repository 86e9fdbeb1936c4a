use std::time::Duration;
use thiserror::Error;

use crate::request::Request;
use crate::response::Response;

/// Classification of URL validation failures.
///
/// Provides programmatic matching for different failure modes without
/// relying on unstable error message strings.
///
/// # Example
///
/// ```ignore
/// match &err {
///     HttpError::InvalidUri { kind, .. } => match kind {
///         InvalidUriKind::ParseError => println!("Malformed URL syntax"),
///         InvalidUriKind::MissingHost => println!("URL needs a host"),
///         InvalidUriKind::RelativeWithoutBase => println!("relative URL on a client without base_url"),
///         _ => println!("Other URI error"),
///     },
///     _ => {}
/// }
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum InvalidUriKind {
    /// URL could not be parsed (malformed syntax)
    ParseError,
    /// URL is missing required host component
    MissingHost,
    /// URL is relative and there is no base URL to resolve it against
    RelativeWithoutBase,
}

/// HTTP client error types
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpError {
    /// Request building failed
    #[error("Failed to build request: {0}")]
    RequestBuild(#[from] http::Error),

    /// Invalid header name
    #[error("Invalid header name: {0}")]
    InvalidHeaderName(#[from] http::header::InvalidHeaderName),

    /// Invalid header value
    #[error("Invalid header value: {0}")]
    InvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    /// Invalid URL (failed to parse)
    ///
    /// Use the `kind` field for programmatic matching. The `reason` field contains
    /// a diagnostic message intended for logging only.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUri {
        /// The URL that failed to parse
        url: String,
        /// Structured failure classification for programmatic matching
        kind: InvalidUriKind,
        /// Diagnostic message (unstable format, for logging only)
        reason: String,
    },

    /// URL scheme is neither `http` nor `https`.
    ///
    /// Raised before any transport call, both for the initial request and
    /// for redirect targets.
    #[error("Request URL '{url}' has an unsupported protocol '{scheme}://'")]
    UnsupportedProtocol {
        /// The rejected scheme
        scheme: String,
        /// The full URL that carried it
        url: String,
    },

    /// The redirect chain grew beyond the configured bound.
    ///
    /// `history` holds every hop that was received, oldest first.
    #[error("Exceeded maximum allowed redirects ({max_redirects})")]
    TooManyRedirects {
        /// Configured bound
        max_redirects: usize,
        /// Responses received before giving up
        history: Vec<Response>,
    },

    /// The peer sent something that cannot be acted upon (e.g. an unusable
    /// `Location` header).
    #[error("Remote protocol error: {0}")]
    RemoteProtocol(String),

    /// Body content was accessed before the body was read.
    #[error("Attempted to access streaming response content without having called `read()`")]
    StreamNotRead,

    /// Body was already iterated manually, its content is gone.
    #[error("Attempted to read or stream content, but the content has already been streamed")]
    StreamConsumed,

    /// Body was closed without ever being read.
    #[error("Attempted to read or stream content, but the stream has been closed")]
    StreamClosed,

    /// A blocking read was attempted on a body that only has an async source.
    #[error("Attempted to read an async response body from a blocking context")]
    AsyncStreamInBlockingContext,

    /// Response body exceeded size limit
    #[error("Response body too large: limit {limit} bytes, got {actual} bytes")]
    BodyTooLarge { limit: usize, actual: usize },

    /// Transport-level read timed out
    #[error("Request timed out after {0:?}")]
    Timeout(Duration),

    /// Transport error (network, connection, etc)
    #[error("Transport error: {0}")]
    Transport(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// TLS error
    #[error("TLS error: {0}")]
    Tls(#[source] Box<dyn std::error::Error + Send + Sync>),

    /// The transport was closed and can no longer issue requests.
    #[error("Transport has been closed")]
    TransportClosed,

    /// The client was closed and can no longer send requests.
    #[error("Cannot send a request, as the client has been closed")]
    ClientClosed,

    /// A mock transport had no handler for the request.
    #[error("No route for {method} {url}")]
    UnmappedRoute {
        /// Method of the unmatched request
        method: http::Method,
        /// URL of the unmatched request
        url: String,
    },

    /// HTTP non-2xx status, produced by [`Response::error_for_status`].
    #[error("HTTP {status} for url '{url}'")]
    HttpStatus {
        status: http::StatusCode,
        url: String,
        content_type: Option<String>,
    },

    /// JSON encoding or parsing error
    #[error("JSON parsing failed: {0}")]
    Json(#[from] serde_json::Error),

    /// Form URL encoding error
    #[error("Form encoding failed: {0}")]
    FormEncode(#[from] serde_urlencoded::ser::Error),
}

impl HttpError {
    /// Error for a request that a mock handler does not serve.
    #[must_use]
    pub fn unmapped(request: &Request) -> Self {
        HttpError::UnmappedRoute {
            method: request.method().clone(),
            url: request.url().to_string(),
        }
    }

    /// Redirect history carried by [`HttpError::TooManyRedirects`], empty otherwise.
    #[must_use]
    pub fn history(&self) -> &[Response] {
        match self {
            HttpError::TooManyRedirects { history, .. } => history,
            _ => &[],
        }
    }

    pub(crate) fn invalid_uri(url: &str, kind: InvalidUriKind, reason: impl ToString) -> Self {
        HttpError::InvalidUri {
            url: url.to_owned(),
            kind,
            reason: reason.to_string(),
        }
    }
}

impl From<hyper::Error> for HttpError {
    fn from(err: hyper::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}

impl From<hyper_util::client::legacy::Error> for HttpError {
    fn from(err: hyper_util::client::legacy::Error) -> Self {
        HttpError::Transport(Box::new(err))
    }
}
