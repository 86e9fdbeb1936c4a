use bytes::Bytes;
use futures::Stream;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue, LOCATION};
use http::{Extensions, HeaderMap, StatusCode, Version};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::fmt;
use std::sync::Arc;
use url::Url;

use crate::body::{BodyState, BytesIter, OnClose, ResponseBody};
use crate::cookies::Cookies;
use crate::error::HttpError;
use crate::request::Request;

/// Status codes the redirect loop acts upon.
pub(crate) fn is_redirect_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::MOVED_PERMANENTLY
            | StatusCode::FOUND
            | StatusCode::SEE_OTHER
            | StatusCode::TEMPORARY_REDIRECT
            | StatusCode::PERMANENT_REDIRECT
    )
}

/// An inbound HTTP response.
///
/// The body is not read implicitly: `content()`, `text()` and `json()` fail
/// with [`HttpError::StreamNotRead`] until [`read`](Self::read) (or
/// [`aread`](Self::aread)) has run. Clients read the body for you unless the
/// request was sent in stream mode.
///
/// Dropping a response closes its body.
pub struct Response {
    status: StatusCode,
    reason: Option<String>,
    version: Version,
    headers: HeaderMap,
    body: ResponseBody,
    extensions: Extensions,
    request: Option<Arc<Request>>,
    history: Vec<Response>,
    next_request: Option<Request>,
}

impl Response {
    /// Response with an empty body.
    #[must_use]
    pub fn new(status: StatusCode) -> Self {
        Self::from_parts(status, Version::HTTP_11, HeaderMap::new(), ResponseBody::empty())
    }

    /// Start building a response, typically inside a mock handler.
    pub fn builder<S>(status: S) -> ResponseBuilder
    where
        StatusCode: TryFrom<S>,
        <StatusCode as TryFrom<S>>::Error: Into<http::Error>,
    {
        ResponseBuilder::new(StatusCode::try_from(status).map_err(Into::into))
    }

    pub(crate) fn from_parts(
        status: StatusCode,
        version: Version,
        headers: HeaderMap,
        body: ResponseBody,
    ) -> Self {
        Self {
            status,
            reason: None,
            version,
            headers,
            body,
            extensions: Extensions::new(),
            request: None,
            history: Vec::new(),
            next_request: None,
        }
    }

    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Reason phrase sent by the peer, or the canonical one for the status.
    #[must_use]
    pub fn reason_phrase(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or_default()
    }

    #[must_use]
    pub fn version(&self) -> Version {
        self.version
    }

    /// Protocol version as it appears on the wire, e.g. `"HTTP/1.1"`.
    #[must_use]
    pub fn http_version(&self) -> &'static str {
        match self.version {
            Version::HTTP_09 => "HTTP/0.9",
            Version::HTTP_10 => "HTTP/1.0",
            Version::HTTP_2 => "HTTP/2",
            Version::HTTP_3 => "HTTP/3",
            _ => "HTTP/1.1",
        }
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    /// The request that produced this response, once a client has sent it.
    #[must_use]
    pub fn request(&self) -> Option<&Request> {
        self.request.as_deref()
    }

    /// The caller's request at the head of the redirect chain.
    #[must_use]
    pub fn original_request(&self) -> Option<&Request> {
        self.history
            .first()
            .and_then(Response::request)
            .or_else(|| self.request())
    }

    /// URL of the request that produced this response.
    #[must_use]
    pub fn url(&self) -> Option<&Url> {
        self.request().map(Request::url)
    }

    /// Responses of earlier redirect hops, oldest first.
    #[must_use]
    pub fn history(&self) -> &[Response] {
        &self.history
    }

    /// The request a redirect-following send would have issued next.
    ///
    /// Only set when redirects were not followed.
    #[must_use]
    pub fn next_request(&self) -> Option<&Request> {
        self.next_request.as_ref()
    }

    pub fn take_next_request(&mut self) -> Option<Request> {
        self.next_request.take()
    }

    /// Cookies set by this response alone.
    #[must_use]
    pub fn cookies(&self) -> Cookies {
        let cookies = Cookies::new();
        cookies.extract_from_response(self);
        cookies
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    /// A redirect status together with a `Location` header.
    #[must_use]
    pub fn is_redirect(&self) -> bool {
        is_redirect_status(self.status) && self.headers.contains_key(LOCATION)
    }

    /// Check status and return error for non-2xx responses
    ///
    /// Does NOT read the response body.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::HttpStatus` if the response status is not 2xx.
    pub fn error_for_status(self) -> Result<Self, HttpError> {
        self.error_for_status_ref()?;
        Ok(self)
    }

    /// Borrowing variant of [`error_for_status`](Self::error_for_status).
    ///
    /// # Errors
    ///
    /// Returns `HttpError::HttpStatus` if the response status is not 2xx.
    pub fn error_for_status_ref(&self) -> Result<&Self, HttpError> {
        if self.status.is_success() {
            return Ok(self);
        }

        let content_type = self
            .headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(String::from);

        Err(HttpError::HttpStatus {
            status: self.status,
            url: self.url().map(Url::to_string).unwrap_or_default(),
            content_type,
        })
    }

    /// Charset named by the `Content-Type` header.
    #[must_use]
    pub fn encoding(&self) -> Option<String> {
        let content_type = self.headers.get(CONTENT_TYPE)?.to_str().ok()?;
        content_type.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("charset")
                .then(|| value.trim().trim_matches('"').to_ascii_lowercase())
        })
    }

    /// Buffered body.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::StreamNotRead`] before the body is read.
    pub fn content(&self) -> Result<&Bytes, HttpError> {
        self.body.content()
    }

    /// Buffered body decoded with the response charset (UTF-8 by default).
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::StreamNotRead`] before the body is read.
    pub fn text(&self) -> Result<String, HttpError> {
        let content = self.body.content()?;
        Ok(decode_text(content, self.encoding().as_deref()))
    }

    /// Buffered body parsed as JSON.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::StreamNotRead`] before the body is read, or
    /// [`HttpError::Json`] when parsing fails.
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, HttpError> {
        Ok(serde_json::from_str(&self.text()?)?)
    }

    /// Read and buffer the body, then close it.
    ///
    /// # Errors
    ///
    /// See [`ResponseBody::read`].
    pub fn read(&mut self) -> Result<&Bytes, HttpError> {
        self.body.read()
    }

    /// Async counterpart of [`read`](Self::read).
    ///
    /// # Errors
    ///
    /// See [`ResponseBody::aread`].
    pub async fn aread(&mut self) -> Result<&Bytes, HttpError> {
        self.body.aread().await
    }

    /// Iterate over body chunks without buffering them.
    pub fn iter_bytes(&mut self) -> BytesIter<'_> {
        self.body.iter_bytes()
    }

    /// Next body chunk, `Ok(None)` once the body is exhausted.
    ///
    /// # Errors
    ///
    /// See [`ResponseBody::next_chunk_async`].
    pub async fn chunk(&mut self) -> Result<Option<Bytes>, HttpError> {
        self.body.next_chunk_async().await
    }

    /// Close the body. Safe to call any number of times.
    pub fn close(&mut self) {
        self.body.close();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.body.state() == BodyState::Closed
    }

    #[must_use]
    pub fn body_state(&self) -> BodyState {
        self.body.state()
    }

    pub fn body_mut(&mut self) -> &mut ResponseBody {
        &mut self.body
    }

    pub(crate) fn set_request(&mut self, request: Arc<Request>) {
        self.request = Some(request);
    }

    pub(crate) fn set_history(&mut self, history: Vec<Response>) {
        self.history = history;
    }

    pub(crate) fn set_next_request(&mut self, request: Request) {
        self.next_request = Some(request);
    }

    pub(crate) fn set_reason(&mut self, reason: Option<String>) {
        self.reason = reason;
    }
}

fn decode_text(content: &[u8], charset: Option<&str>) -> String {
    match charset {
        Some("iso-8859-1" | "latin1" | "latin-1" | "us-ascii" | "ascii") => {
            content.iter().copied().map(char::from).collect()
        }
        _ => String::from_utf8_lossy(content).into_owned(),
    }
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("version", &self.version)
            .field("url", &self.url().map(Url::as_str))
            .field("headers", &self.headers)
            .field("history", &self.history.len())
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

/// Fluent constructor for [`Response`].
///
/// # Example
///
/// ```ignore
/// let response = Response::builder(200)
///     .header("set-cookie", "example-name=example-value")
///     .json(&serde_json::json!({"ok": true}))
///     .build()?;
/// ```
#[must_use = "ResponseBuilder does nothing until .build() is called"]
pub struct ResponseBuilder {
    status: Result<StatusCode, http::Error>,
    reason: Option<String>,
    version: Version,
    headers: HeaderMap,
    body: ResponseBody,
    content_length: Option<usize>,
    default_content_type: Option<HeaderValue>,
    extensions: Extensions,
    on_close: Option<OnClose>,
    error: Option<HttpError>,
}

impl ResponseBuilder {
    fn new(status: Result<StatusCode, http::Error>) -> Self {
        Self {
            status,
            reason: None,
            version: Version::HTTP_11,
            headers: HeaderMap::new(),
            body: ResponseBody::empty(),
            content_length: None,
            default_content_type: None,
            extensions: Extensions::new(),
            on_close: None,
            error: None,
        }
    }

    /// Append a header; errors are deferred to `build()`.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }

        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.headers.append(name, value);
            }
            (Err(e), _) => {
                self.error = Some(HttpError::InvalidHeaderName(e));
            }
            (_, Err(e)) => {
                self.error = Some(HttpError::InvalidHeaderValue(e));
            }
        }
        self
    }

    pub fn version(mut self, version: Version) -> Self {
        self.version = version;
        self
    }

    /// Non-canonical reason phrase.
    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Fixed body; `Content-Length` is derived on build.
    pub fn body(mut self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        self.content_length = Some(body.len());
        self.body = ResponseBody::from_bytes(body);
        self
    }

    /// UTF-8 text body with a `text/plain` content type.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.default_content_type = Some(HeaderValue::from_static("text/plain; charset=utf-8"));
        self.body(text.into())
    }

    /// JSON body with an `application/json` content type.
    pub fn json<T: Serialize + ?Sized>(mut self, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(bytes) => {
                self.default_content_type = Some(HeaderValue::from_static("application/json"));
                self.body(bytes)
            }
            Err(e) => {
                if self.error.is_none() {
                    self.error = Some(HttpError::Json(e));
                }
                self
            }
        }
    }

    /// Lazily produced body for blocking consumers.
    pub fn chunks<I>(mut self, chunks: I) -> Self
    where
        I: IntoIterator<Item = Result<Bytes, HttpError>>,
        I::IntoIter: Send + 'static,
    {
        self.content_length = None;
        self.body = ResponseBody::from_chunks(chunks);
        self
    }

    /// Lazily produced body for async consumers.
    pub fn stream<S>(mut self, chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, HttpError>> + Send + 'static,
    {
        self.content_length = None;
        self.body = ResponseBody::from_stream(chunks);
        self
    }

    /// Hook run once when the body closes.
    pub fn on_close(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub fn extension<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }

    /// Assemble the response.
    ///
    /// # Errors
    ///
    /// Returns the first deferred error (bad status, header or JSON).
    pub fn build(self) -> Result<Response, HttpError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        let status = self.status?;

        let mut headers = self.headers;
        if let Some(content_type) = self.default_content_type
            && !headers.contains_key(CONTENT_TYPE)
        {
            headers.insert(CONTENT_TYPE, content_type);
        }
        if let Some(len) = self.content_length
            && !headers.contains_key(CONTENT_LENGTH)
        {
            headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
        }

        let mut body = self.body;
        if let Some(hook) = self.on_close {
            body = body.on_close(hook);
        }

        let mut response = Response::from_parts(status, self.version, headers, body);
        response.reason = self.reason;
        response.extensions = self.extensions;
        Ok(response)
    }
}

impl fmt::Debug for ResponseBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBuilder")
            .field("status", &self.status.as_ref().ok())
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}
