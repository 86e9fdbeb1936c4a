use bytes::Bytes;
use futures::Stream;
use http::header::{CONTENT_LENGTH, CONTENT_TYPE, HeaderName, HeaderValue, TRANSFER_ENCODING};
use http::{Extensions, HeaderMap, Method};
use serde::Serialize;
use std::fmt;
use url::Url;

use crate::body::RequestBody;
use crate::config::Timeout;
use crate::cookies::Cookies;
use crate::error::HttpError;
use crate::urls;

/// An outbound HTTP request.
///
/// Requests are plain values: building one performs no I/O. A redirect
/// produces a fresh `Request`; the one a transport has seen is not modified
/// afterwards.
pub struct Request {
    method: Method,
    url: Url,
    headers: HeaderMap,
    body: RequestBody,
    extensions: Extensions,
    legacy_cookies: Option<Cookies>,
}

impl Request {
    /// Request with no headers and no body.
    #[must_use]
    pub fn new(method: Method, url: Url) -> Self {
        Self {
            method,
            url,
            headers: HeaderMap::new(),
            body: RequestBody::empty(),
            extensions: Extensions::new(),
            legacy_cookies: None,
        }
    }

    /// Start building a standalone request.
    ///
    /// Relative URLs are rejected at [`build`](RequestBuilder::build) time
    /// because there is no client base URL to resolve them against.
    pub fn builder(method: Method, url: impl Into<String>) -> RequestBuilder {
        RequestBuilder::new((), method, url.into(), None)
    }

    /// Replace the body and derive `Content-Length` / `Transfer-Encoding`
    /// unless the headers already carry one of them.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        apply_body_headers(&mut self.headers, &self.body);
        self
    }

    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    #[must_use]
    pub fn url(&self) -> &Url {
        &self.url
    }

    #[must_use]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    pub fn headers_mut(&mut self) -> &mut HeaderMap {
        &mut self.headers
    }

    #[must_use]
    pub fn body(&self) -> &RequestBody {
        &self.body
    }

    pub fn body_mut(&mut self) -> &mut RequestBody {
        &mut self.body
    }

    #[must_use]
    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Timeout forwarded to the transport, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<&Timeout> {
        self.extensions.get::<Timeout>()
    }

    /// Buffer a streaming body so it can be inspected or replayed.
    ///
    /// # Errors
    ///
    /// See [`RequestBody::read`].
    pub fn read(&mut self) -> Result<&Bytes, HttpError> {
        self.body.read()
    }

    /// Async counterpart of [`read`](Self::read).
    ///
    /// # Errors
    ///
    /// See [`RequestBody::aread`].
    pub async fn aread(&mut self) -> Result<&Bytes, HttpError> {
        self.body.aread().await
    }

    pub(crate) fn set_method(&mut self, method: Method) {
        self.method = method;
    }

    pub(crate) fn set_url(&mut self, url: Url) {
        self.url = url;
    }

    pub(crate) fn set_body(&mut self, body: RequestBody) {
        self.body = body;
    }

    pub(crate) fn take_legacy_cookies(&mut self) -> Option<Cookies> {
        self.legacy_cookies.take()
    }

    /// Copy of everything but the body, which the caller decides on.
    pub(crate) fn clone_head(&self) -> Self {
        Self {
            method: self.method.clone(),
            url: self.url.clone(),
            headers: self.headers.clone(),
            body: RequestBody::empty(),
            extensions: self.extensions.clone(),
            legacy_cookies: None,
        }
    }
}

impl fmt::Debug for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Request")
            .field("method", &self.method)
            .field("url", &self.url.as_str())
            .field("headers", &self.headers)
            .field("body", &self.body)
            .finish_non_exhaustive()
    }
}

fn apply_body_headers(headers: &mut HeaderMap, body: &RequestBody) {
    if headers.contains_key(CONTENT_LENGTH) || headers.contains_key(TRANSFER_ENCODING) {
        return;
    }
    if body.is_streaming() {
        headers.insert(TRANSFER_ENCODING, HeaderValue::from_static("chunked"));
    } else if let Some(len) = body.content_length()
        && len > 0
    {
        headers.insert(CONTENT_LENGTH, HeaderValue::from(len));
    }
}

/// Per-send switches that are not part of the request itself.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Overrides the client's redirect policy for this send
    pub follow_redirects: Option<bool>,
    /// Return without reading the final response body
    pub stream: bool,
}

/// HTTP request builder with fluent API
///
/// `C` is whatever will send the request: a [`Client`](crate::Client), an
/// [`AsyncClient`](crate::AsyncClient), or `()` for a standalone request
/// (which [`send`](RequestBuilder::send) dispatches through a throwaway
/// client).
///
/// Header errors are captured and reported by `build()` / `send()`.
///
/// # Example
///
/// ```ignore
/// let client = httpj::Client::new()?;
///
/// let resp = client
///     .post("https://api.example.com/users")
///     .header("x-request-id", "123")
///     .query(&[("notify", "true")])?
///     .json(&NewUser { name: "Alice" })?
///     .send()?;
/// ```
#[must_use = "RequestBuilder does nothing until .send() or .build() is called"]
pub struct RequestBuilder<C = ()> {
    sender: C,
    method: Method,
    url: String,
    base_url: Option<Url>,
    headers: HeaderMap,
    query: Vec<String>,
    body: RequestBody,
    default_content_type: Option<HeaderValue>,
    extensions: Extensions,
    legacy_cookies: Option<Cookies>,
    options: SendOptions,
    /// Error captured during building (deferred to `build()` / `send()`)
    error: Option<HttpError>,
}

impl<C> RequestBuilder<C> {
    pub(crate) fn new(sender: C, method: Method, url: String, base_url: Option<Url>) -> Self {
        Self {
            sender,
            method,
            url,
            base_url,
            headers: HeaderMap::new(),
            query: Vec::new(),
            body: RequestBody::empty(),
            default_content_type: None,
            extensions: Extensions::new(),
            legacy_cookies: None,
            options: SendOptions::default(),
            error: None,
        }
    }

    /// Append a header; repeated names keep every value in order.
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

    /// Append several headers.
    pub fn headers<I, K, V>(mut self, headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: AsRef<str>,
    {
        for (name, value) in headers {
            self = self.header(name.as_ref(), value.as_ref());
        }
        self
    }

    /// Append already-validated headers.
    pub fn header_map(mut self, headers: HeaderMap) -> Self {
        let mut last_name = None;
        for (name, value) in headers {
            if let Some(name) = name {
                last_name = Some(name);
            }
            if let Some(name) = &last_name {
                self.headers.append(name.clone(), value);
            }
        }
        self
    }

    /// Append query parameters to the URL.
    ///
    /// # Errors
    ///
    /// Returns `Err(HttpError::FormEncode)` if encoding fails.
    pub fn query<T: Serialize + ?Sized>(mut self, params: &T) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        let encoded = serde_urlencoded::to_string(params)?;
        if !encoded.is_empty() {
            self.query.push(encoded);
        }
        Ok(self)
    }

    /// Set raw request content; `Content-Length` is derived on build.
    pub fn body(mut self, body: impl Into<RequestBody>) -> Self {
        self.body = body.into();
        self
    }

    /// Set a lazy chunk sequence as the body; sent with chunked encoding.
    pub fn body_iter<I>(self, chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + Sync + 'static,
    {
        self.body(RequestBody::chunked(chunks))
    }

    /// Set a lazy async chunk sequence as the body; sent with chunked encoding.
    pub fn body_stream<S>(self, chunks: S) -> Self
    where
        S: Stream<Item = Bytes> + Send + Sync + 'static,
    {
        self.body(RequestBody::chunked_stream(chunks))
    }

    /// Set request body as JSON
    ///
    /// Sets Content-Type to application/json unless a Content-Type header
    /// is provided.
    ///
    /// # Errors
    ///
    /// Returns `Err(HttpError::Json)` if serialization fails.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        self.body = Bytes::from(serde_json::to_vec(body)?).into();
        self.default_content_type = Some(HeaderValue::from_static("application/json"));
        Ok(self)
    }

    /// Set request body as form URL-encoded
    ///
    /// Sets Content-Type to application/x-www-form-urlencoded unless a
    /// Content-Type header is provided.
    ///
    /// # Errors
    ///
    /// Returns `Err(HttpError::FormEncode)` if encoding fails.
    pub fn form<T: Serialize + ?Sized>(mut self, fields: &T) -> Result<Self, HttpError> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }

        self.body = Bytes::from(serde_urlencoded::to_string(fields)?).into();
        self.default_content_type =
            Some(HeaderValue::from_static("application/x-www-form-urlencoded"));
        Ok(self)
    }

    /// Timeout forwarded to the transport for this request only.
    pub fn timeout(self, timeout: Timeout) -> Self {
        self.extension(timeout)
    }

    /// Attach transport metadata.
    pub fn extension<T: Clone + Send + Sync + 'static>(mut self, value: T) -> Self {
        self.extensions.insert(value);
        self
    }

    /// Override the client's redirect policy for this send.
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.options.follow_redirects = Some(follow);
        self
    }

    /// Return the response without reading its body.
    pub fn stream(mut self, stream: bool) -> Self {
        self.options.stream = stream;
        self
    }

    /// Cookies sent with this request only, merged over the client's jar.
    ///
    /// Every send that carries them logs a deprecation warning.
    #[deprecated(
        note = "set cookies on the client or its jar instead; per-request cookies are not persisted"
    )]
    pub fn cookies(mut self, cookies: impl Into<Cookies>) -> Self {
        self.legacy_cookies = Some(cookies.into());
        self
    }

    /// Build the request without sending it.
    ///
    /// # Errors
    ///
    /// Returns the first deferred header error, or a URL error.
    pub fn build(self) -> Result<Request, HttpError> {
        self.into_parts().map(|(_, request, _)| request)
    }

    pub(crate) fn into_parts(self) -> Result<(C, Request, SendOptions), HttpError> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let mut url = urls::parse_target(&self.url, self.base_url.as_ref())?;
        if !self.query.is_empty() {
            let extra = self.query.join("&");
            let merged = match url.query() {
                Some(existing) if !existing.is_empty() => format!("{existing}&{extra}"),
                _ => extra,
            };
            url.set_query(Some(&merged));
        }

        let mut headers = self.headers;
        if let Some(content_type) = self.default_content_type
            && !headers.contains_key(CONTENT_TYPE)
        {
            headers.insert(CONTENT_TYPE, content_type);
        }
        apply_body_headers(&mut headers, &self.body);

        let request = Request {
            method: self.method,
            url,
            headers,
            body: self.body,
            extensions: self.extensions,
            legacy_cookies: self.legacy_cookies,
        };
        Ok((self.sender, request, self.options))
    }
}

impl<C> fmt::Debug for RequestBuilder<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestBuilder")
            .field("method", &self.method)
            .field("url", &self.url)
            .field("headers", &self.headers)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
