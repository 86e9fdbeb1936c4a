use http::Method;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::builder::ClientBuilder;
use crate::config::{ClientConfig, Timeout};
use crate::cookies::Cookies;
use crate::error::HttpError;
use crate::flow::{RedirectFlow, Step};
use crate::request::{Request, RequestBuilder, SendOptions};
use crate::response::Response;
use crate::transport::Transport;

/// Blocking HTTP client.
///
/// Owns a [`Transport`], a shared cookie jar and the configuration every
/// send starts from. Redirects are followed here, hop by hop, with cookies
/// extracted from each response before the next request is built.
///
/// # Example
///
/// ```ignore
/// let client = httpj::Client::builder()
///     .base_url("https://api.example.com/v1")?
///     .build()?;
///
/// let response = client.get("users").send()?.error_for_status()?;
/// let users: Vec<User> = response.json()?;
/// ```
pub struct Client {
    transport: Arc<dyn Transport>,
    cookies: Cookies,
    config: ClientConfig,
    closed: AtomicBool,
}

impl Client {
    /// Client with the default configuration and the network transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be created.
    pub fn new() -> Result<Self, HttpError> {
        ClientBuilder::new().build()
    }

    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn from_parts(
        config: ClientConfig,
        cookies: Cookies,
        transport: Arc<dyn Transport>,
    ) -> Self {
        Self {
            transport,
            cookies,
            config,
            closed: AtomicBool::new(false),
        }
    }

    pub fn get(&self, url: &str) -> RequestBuilder<&Self> {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: &str) -> RequestBuilder<&Self> {
        self.request(Method::POST, url)
    }

    pub fn put(&self, url: &str) -> RequestBuilder<&Self> {
        self.request(Method::PUT, url)
    }

    pub fn patch(&self, url: &str) -> RequestBuilder<&Self> {
        self.request(Method::PATCH, url)
    }

    pub fn delete(&self, url: &str) -> RequestBuilder<&Self> {
        self.request(Method::DELETE, url)
    }

    pub fn head(&self, url: &str) -> RequestBuilder<&Self> {
        self.request(Method::HEAD, url)
    }

    pub fn options(&self, url: &str) -> RequestBuilder<&Self> {
        self.request(Method::OPTIONS, url)
    }

    /// Request builder for any method.
    ///
    /// Relative URLs are appended to the configured base URL.
    pub fn request(&self, method: Method, url: &str) -> RequestBuilder<&Self> {
        RequestBuilder::new(self, method, url.to_owned(), self.config.base_url.clone())
    }

    /// Like [`request`](Self::request), but the response body is left unread.
    pub fn stream(&self, method: Method, url: &str) -> RequestBuilder<&Self> {
        self.request(method, url).stream(true)
    }

    /// Send a prepared request with the client's redirect policy.
    ///
    /// # Errors
    ///
    /// See [`send_with`](Self::send_with).
    pub fn send(&self, request: Request) -> Result<Response, HttpError> {
        self.send_with(request, SendOptions::default())
    }

    /// Send a prepared request.
    ///
    /// # Errors
    ///
    /// - [`HttpError::ClientClosed`] after [`close`](Self::close)
    /// - [`HttpError::UnsupportedProtocol`] before any I/O for non-http(s) URLs
    /// - [`HttpError::TooManyRedirects`] when the redirect bound is exceeded
    /// - transport and body errors, unchanged
    pub fn send_with(&self, mut request: Request, options: SendOptions) -> Result<Response, HttpError> {
        if self.is_closed() {
            return Err(HttpError::ClientClosed);
        }
        apply_defaults(&self.config, &mut request);

        let mut flow = RedirectFlow::new(&self.cookies, &self.config.redirect, options.follow_redirects);
        flow.start(&mut request)?;

        loop {
            let mut response = self.transport.handle(&mut request)?;
            response.body_mut().set_limit(self.config.max_body_size);

            match flow.on_response(request, response)? {
                Step::Done(mut response) => {
                    if !options.stream {
                        response.read()?;
                    }
                    return Ok(response);
                }
                Step::Redirect { mut hop, next } => {
                    hop.read()?;
                    request = next;
                    flow.follow(hop, &mut request)?;
                }
            }
        }
    }

    /// The client's cookie jar. Clones of the handle share state.
    #[must_use]
    pub fn cookies(&self) -> &Cookies {
        &self.cookies
    }

    /// Replace the cookie jar.
    pub fn set_cookies(&mut self, cookies: impl Into<Cookies>) {
        self.cookies = cookies.into();
    }

    #[must_use]
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Close the transport. Later sends fail with [`HttpError::ClientClosed`].
    ///
    /// Responses that are still open stay readable as far as their
    /// transport allows.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.transport.close();
            tracing::debug!("client closed");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for Client {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Client {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .field("cookies", &self.cookies)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl RequestBuilder<&Client> {
    /// Build and send through the bound client.
    ///
    /// # Errors
    ///
    /// Deferred builder errors, then anything [`Client::send_with`] returns.
    pub fn send(self) -> Result<Response, HttpError> {
        let (client, request, options) = self.into_parts()?;
        client.send_with(request, options)
    }
}

/// Fill in client defaults the request does not set itself.
pub(crate) fn apply_defaults(config: &ClientConfig, request: &mut Request) {
    let headers = request.headers_mut();
    for name in config.headers.keys() {
        if !headers.contains_key(name) {
            for value in config.headers.get_all(name) {
                headers.append(name.clone(), value.clone());
            }
        }
    }

    if request.timeout().is_none() {
        request.extensions_mut().insert::<Timeout>(config.timeout);
    }
}
