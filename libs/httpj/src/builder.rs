use http::header::{HeaderName, HeaderValue, USER_AGENT};
use http::HeaderMap;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::async_client::AsyncClient;
use crate::client::Client;
use crate::config::{ClientConfig, RedirectConfig, Timeout, TlsRootConfig};
use crate::cookies::Cookies;
use crate::error::{HttpError, InvalidUriKind};
use crate::transport::{AsyncTransport, BlockingHttpTransport, HttpTransport, Transport};
use crate::urls;

/// Builder for [`Client`] and [`AsyncClient`].
///
/// Without an explicit transport the clients talk to the network through
/// [`BlockingHttpTransport`] / [`HttpTransport`], configured from
/// [`ClientConfig::transport`].
pub struct ClientBuilder {
    config: ClientConfig,
    cookies: Option<Cookies>,
    transport: Option<Arc<dyn Transport>>,
    async_transport: Option<Arc<dyn AsyncTransport>>,
    /// Error captured by a setter (deferred to `build()`)
    error: Option<HttpError>,
}

impl ClientBuilder {
    /// Create a new builder with default configuration
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// Create a builder with a specific configuration
    #[must_use]
    pub fn with_config(config: ClientConfig) -> Self {
        Self {
            config,
            cookies: None,
            transport: None,
            async_transport: None,
            error: None,
        }
    }

    /// Set a default header, replacing any previous default of that name
    ///
    /// Invalid names or values are reported by `build()`.
    #[must_use]
    pub fn header(mut self, name: &str, value: &str) -> Self {
        if self.error.is_some() {
            return self;
        }

        match (HeaderName::try_from(name), HeaderValue::try_from(value)) {
            (Ok(name), Ok(value)) => {
                self.config.headers.insert(name, value);
            }
            (Err(e), _) => self.error = Some(HttpError::InvalidHeaderName(e)),
            (_, Err(e)) => self.error = Some(HttpError::InvalidHeaderValue(e)),
        }
        self
    }

    /// Replace all default headers
    #[must_use]
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.config.headers = headers;
        self
    }

    /// Set the user agent string
    #[must_use]
    pub fn user_agent(self, user_agent: &str) -> Self {
        self.header(USER_AGENT.as_str(), user_agent)
    }

    /// Set the base URL that relative request URLs are appended to
    ///
    /// # Errors
    ///
    /// Returns `HttpError::InvalidUri` or `HttpError::UnsupportedProtocol`
    /// unless `base_url` is an absolute `http`/`https` URL.
    pub fn base_url(mut self, base_url: &str) -> Result<Self, HttpError> {
        let url = Url::parse(base_url)
            .map_err(|e| HttpError::invalid_uri(base_url, InvalidUriKind::ParseError, e))?;
        urls::ensure_sendable(&url)?;
        self.config.base_url = Some(url);
        Ok(self)
    }

    /// Follow redirects by default (default: true)
    ///
    /// Individual requests can override this with
    /// [`RequestBuilder::follow_redirects`](crate::RequestBuilder::follow_redirects).
    #[must_use]
    pub fn follow_redirects(mut self, follow: bool) -> Self {
        self.config.redirect.follow_redirects = follow;
        self
    }

    /// Set the maximum number of redirects to follow (default: 20)
    #[must_use]
    pub fn max_redirects(mut self, max_redirects: usize) -> Self {
        self.config.redirect.max_redirects = max_redirects;
        self
    }

    /// Set the redirect policy configuration
    #[must_use]
    pub fn redirect(mut self, redirect: RedirectConfig) -> Self {
        self.config.redirect = redirect;
        self
    }

    /// Set the timeout forwarded with requests that do not carry one
    #[must_use]
    pub fn timeout(mut self, timeout: Timeout) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Set the maximum response body size (`None` for unlimited)
    #[must_use]
    pub fn max_body_size(mut self, size: Option<usize>) -> Self {
        self.config.max_body_size = size;
        self
    }

    /// Set TLS root certificate strategy for the network transport
    #[must_use]
    pub fn tls_roots(mut self, roots: TlsRootConfig) -> Self {
        self.config.transport.tls_roots = roots;
        self
    }

    /// Set the TCP connect timeout of the network transport
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.transport.connect_timeout = timeout;
        self
    }

    /// Set the idle connection timeout of the network transport's pool
    #[must_use]
    pub fn pool_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.config.transport.pool_idle_timeout = timeout;
        self
    }

    /// Set the maximum number of idle connections per host
    ///
    /// `0` disables connection reuse.
    #[must_use]
    pub fn pool_max_idle_per_host(mut self, max: usize) -> Self {
        self.config.transport.pool_max_idle_per_host = max;
        self
    }

    /// Start from an existing jar instead of an empty one
    ///
    /// The client shares the handle, so cookies it receives are visible
    /// through `cookies` as well.
    #[must_use]
    pub fn cookies(mut self, cookies: impl Into<Cookies>) -> Self {
        self.cookies = Some(cookies.into());
        self
    }

    /// Transport used by [`build`](Self::build)
    #[must_use]
    pub fn transport(mut self, transport: impl Transport + 'static) -> Self {
        self.transport = Some(Arc::new(transport));
        self
    }

    /// Transport used by [`build_async`](Self::build_async)
    #[must_use]
    pub fn async_transport(mut self, transport: impl AsyncTransport + 'static) -> Self {
        self.async_transport = Some(Arc::new(transport));
        self
    }

    /// Build a blocking client
    ///
    /// # Errors
    ///
    /// Returns the first deferred setter error, or the error raised while
    /// creating the default network transport.
    pub fn build(self) -> Result<Client, HttpError> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(BlockingHttpTransport::new(&self.config.transport)?),
        };
        Ok(Client::from_parts(
            self.config,
            self.cookies.unwrap_or_default(),
            transport,
        ))
    }

    /// Build an async client
    ///
    /// # Errors
    ///
    /// Returns the first deferred setter error, or the error raised while
    /// creating the default network transport.
    pub fn build_async(self) -> Result<AsyncClient, HttpError> {
        if let Some(e) = self.error {
            return Err(e);
        }

        let transport: Arc<dyn AsyncTransport> = match self.async_transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&self.config.transport)?),
        };
        Ok(AsyncClient::from_parts(
            self.config,
            self.cookies.unwrap_or_default(),
            transport,
        ))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
