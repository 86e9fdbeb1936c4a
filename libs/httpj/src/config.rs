use http::HeaderMap;
use http::header::{ACCEPT, HeaderValue, USER_AGENT};
use std::time::Duration;
use url::Url;

/// Default User-Agent string for HTTP requests
pub const DEFAULT_USER_AGENT: &str = concat!("httpj/", env!("CARGO_PKG_VERSION"));

/// Default bound on the number of redirects a single send may follow
pub const DEFAULT_MAX_REDIRECTS: usize = 20;

/// Default value for each phase of [`Timeout`]
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Redirect policy applied by the client's redirect loop.
///
/// # Example
///
/// ```ignore
/// use httpj::RedirectConfig;
///
/// let config = RedirectConfig {
///     max_redirects: 5,
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedirectConfig {
    /// Follow 3xx responses that carry a `Location` header (default: true)
    ///
    /// When `false`, the redirect response is returned as-is and
    /// [`Response::next_request`](crate::Response::next_request) carries the
    /// request that following would have sent.
    pub follow_redirects: bool,

    /// Maximum number of redirects to follow (default: 20)
    ///
    /// Exceeding the bound fails the send with
    /// [`HttpError::TooManyRedirects`](crate::HttpError::TooManyRedirects).
    pub max_redirects: usize,
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            follow_redirects: true,
            max_redirects: DEFAULT_MAX_REDIRECTS,
        }
    }
}

impl RedirectConfig {
    /// Create a configuration that returns redirect responses unfollowed
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            follow_redirects: false,
            ..Default::default()
        }
    }

    /// Create a configuration that follows at most `max_redirects` hops
    #[must_use]
    pub fn limited(max_redirects: usize) -> Self {
        Self {
            follow_redirects: true,
            max_redirects,
        }
    }
}

/// Per-phase timeouts.
///
/// The client never enforces these itself. They travel with each request as
/// an extension and the transport honors what it can. The network transports
/// only read `read`, bounding the response head and each body chunk.
/// Connection setup there is bounded by [`HttpTransportConfig::connect_timeout`],
/// and `connect`, `write` and `pool` are left to custom transports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeout {
    pub connect: Option<Duration>,
    pub read: Option<Duration>,
    pub write: Option<Duration>,
    pub pool: Option<Duration>,
}

impl Default for Timeout {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl Timeout {
    /// Same duration for every phase
    #[must_use]
    pub const fn new(duration: Duration) -> Self {
        Self {
            connect: Some(duration),
            read: Some(duration),
            write: Some(duration),
            pool: Some(duration),
        }
    }

    /// No timeouts at all
    #[must_use]
    pub const fn none() -> Self {
        Self {
            connect: None,
            read: None,
            write: None,
            pool: None,
        }
    }

    /// Override the read timeout
    #[must_use]
    pub const fn with_read(mut self, read: Option<Duration>) -> Self {
        self.read = read;
        self
    }

    /// Override the connect timeout
    #[must_use]
    pub const fn with_connect(mut self, connect: Option<Duration>) -> Self {
        self.connect = connect;
        self
    }
}

/// TLS root certificate configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[non_exhaustive]
pub enum TlsRootConfig {
    /// Use Mozilla's root certificates (webpki-roots, no OS dependency)
    #[default]
    WebPki,
    /// Use OS native root certificate store
    Native,
}

/// Settings for the network transports ([`HttpTransport`](crate::HttpTransport)
/// and [`BlockingHttpTransport`](crate::BlockingHttpTransport)).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTransportConfig {
    /// TLS root certificate strategy (default: `WebPki`)
    pub tls_roots: TlsRootConfig,

    /// Timeout for establishing a TCP connection (default: 5 seconds)
    pub connect_timeout: Option<Duration>,

    /// Timeout for idle connections in the pool (default: 90 seconds)
    ///
    /// Set to `None` to use hyper-util's default idle timeout.
    pub pool_idle_timeout: Option<Duration>,

    /// Maximum number of idle connections per host (default: 32)
    ///
    /// Setting this to `0` disables connection reuse entirely.
    pub pool_max_idle_per_host: usize,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            tls_roots: TlsRootConfig::default(),
            connect_timeout: Some(DEFAULT_TIMEOUT),
            pool_idle_timeout: Some(Duration::from_secs(90)),
            pool_max_idle_per_host: 32,
        }
    }
}

/// Client configuration.
///
/// Everything here is applied by the client itself, except `transport`,
/// which only matters when the client builds its default network transport.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Headers merged into every request that does not set them itself
    ///
    /// Defaults to `Accept: */*` and `User-Agent: httpj/<version>`.
    pub headers: HeaderMap,

    /// Base URL that relative request URLs are appended to (default: none)
    pub base_url: Option<Url>,

    /// Redirect policy
    pub redirect: RedirectConfig,

    /// Timeout forwarded with each request that does not carry its own
    pub timeout: Timeout,

    /// Maximum response body size in bytes when buffering (default: unlimited)
    pub max_body_size: Option<usize>,

    /// Settings for the default network transport
    pub transport: HttpTransportConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            headers: default_headers(),
            base_url: None,
            redirect: RedirectConfig::default(),
            timeout: Timeout::default(),
            max_body_size: None,
            transport: HttpTransportConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create minimal configuration (no default headers, no redirects)
    #[must_use]
    pub fn minimal() -> Self {
        Self {
            headers: HeaderMap::new(),
            redirect: RedirectConfig::disabled(),
            ..Default::default()
        }
    }

    /// Create configuration for testing (generous timeouts, small redirect bound)
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            redirect: RedirectConfig::limited(5),
            timeout: Timeout::new(Duration::from_secs(30)),
            max_body_size: Some(1024 * 1024),
            ..Default::default()
        }
    }
}

fn default_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("*/*"));
    headers.insert(USER_AGENT, HeaderValue::from_static(DEFAULT_USER_AGENT));
    headers
}
