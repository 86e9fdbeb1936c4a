use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use http_body::Frame;
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyDataStream, BodyExt, Empty, Full, StreamBody};
use hyper_rustls::{HttpsConnector, HttpsConnectorBuilder};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::{TokioExecutor, TokioTimer};
use parking_lot::RwLock;
use rustls::RootCertStore;
use rustls::crypto::CryptoProvider;
use std::convert::Infallible;
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tower::{Layer, ServiceExt};
use tower_http::decompression::{Decompression, DecompressionLayer};

use super::{AsyncTransport, Transport};
use crate::body::{ByteStream, ResponseBody, SendBody};
use crate::config::{HttpTransportConfig, TlsRootConfig};
use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;

type OutgoingBody = UnsyncBoxBody<Bytes, Infallible>;
type HyperClient = Client<HttpsConnector<HttpConnector>, OutgoingBody>;
type HyperService = Decompression<HyperClient>;

/// Async network transport.
///
/// A pooled hyper client speaking HTTP/1.1 and HTTP/2 (negotiated via ALPN)
/// over rustls, with transparent gzip, brotli and deflate decompression.
/// Redirects are never followed here; the client does that.
///
/// The request's [`Timeout`](crate::Timeout) bounds the wait for the
/// response head and for each body chunk (`read`). Connection setup is
/// bounded by [`HttpTransportConfig::connect_timeout`].
pub struct HttpTransport {
    service: RwLock<Option<HyperService>>,
}

impl HttpTransport {
    /// Build a transport from `config`.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Tls` when the root certificate store cannot be
    /// loaded.
    pub fn new(config: &HttpTransportConfig) -> Result<Self, HttpError> {
        let https = build_https_connector(config)?;

        // Create the base hyper client with HTTP/2 support and connection pool settings
        let mut client_builder = Client::builder(TokioExecutor::new());

        // pool_timer is required for pool_idle_timeout to work
        client_builder
            .pool_timer(TokioTimer::new())
            .pool_max_idle_per_host(config.pool_max_idle_per_host)
            .http2_only(false);

        if let Some(idle_timeout) = config.pool_idle_timeout {
            client_builder.pool_idle_timeout(idle_timeout);
        }

        let hyper_client: HyperClient = client_builder.build(https);
        let service = DecompressionLayer::new().layer(hyper_client);

        Ok(Self {
            service: RwLock::new(Some(service)),
        })
    }

    /// Send the request and return the response head plus a chunk stream.
    async fn exchange(
        &self,
        request: &mut Request,
    ) -> Result<(http::response::Parts, ByteStream), HttpError> {
        let service = self
            .service
            .read()
            .clone()
            .ok_or(HttpError::TransportClosed)?;
        let read_timeout = request.timeout().and_then(|t| t.read);
        let outgoing = to_hyper_request(request)?;

        tracing::debug!(
            method = %request.method(),
            url = %request.url(),
            "sending request"
        );

        let pending = service.oneshot(outgoing);
        let response = match read_timeout {
            Some(limit) => tokio::time::timeout(limit, pending)
                .await
                .map_err(|_| HttpError::Timeout(limit))??,
            None => pending.await?,
        };

        let (parts, body) = response.into_parts();
        tracing::debug!(status = parts.status.as_u16(), version = ?parts.version, "received response head");

        let chunks: ByteStream =
            Box::pin(BodyDataStream::new(body).map(|chunk| chunk.map_err(HttpError::Transport)));
        Ok((parts, with_read_timeout(chunks, read_timeout)))
    }
}

#[async_trait]
impl AsyncTransport for HttpTransport {
    async fn handle(&self, request: &mut Request) -> Result<Response, HttpError> {
        let (parts, chunks) = self.exchange(request).await?;
        Ok(into_response(parts, ResponseBody::from_stream(chunks)))
    }

    fn close(&self) {
        if self.service.write().take().is_some() {
            tracing::debug!("http transport closed, connection pool released");
        }
    }
}

impl fmt::Debug for HttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpTransport")
            .field("closed", &self.service.read().is_none())
            .finish()
    }
}

/// Blocking network transport.
///
/// Drives an [`HttpTransport`] on a private single-worker tokio runtime.
/// Response bodies pull their chunks through that runtime, so they stay
/// readable after the transport itself is closed.
///
/// Must not be used from inside an async context: blocking on the private
/// runtime from a tokio worker thread panics.
pub struct BlockingHttpTransport {
    inner: HttpTransport,
    runtime: Arc<tokio::runtime::Runtime>,
}

impl BlockingHttpTransport {
    /// Build a transport from `config`.
    ///
    /// # Errors
    ///
    /// Returns `HttpError::Tls` for root store failures and
    /// `HttpError::Transport` when the runtime cannot be started.
    pub fn new(config: &HttpTransportConfig) -> Result<Self, HttpError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name("httpj-transport")
            .enable_all()
            .build()
            .map_err(|e| HttpError::Transport(Box::new(e)))?;

        Ok(Self {
            inner: HttpTransport::new(config)?,
            runtime: Arc::new(runtime),
        })
    }
}

impl Transport for BlockingHttpTransport {
    fn handle(&self, request: &mut Request) -> Result<Response, HttpError> {
        let (parts, stream) = self.runtime.block_on(self.inner.exchange(request))?;
        let chunks = BlockingChunks {
            runtime: Arc::clone(&self.runtime),
            stream,
        };
        Ok(into_response(parts, ResponseBody::from_chunks(chunks)))
    }

    fn close(&self) {
        AsyncTransport::close(&self.inner);
    }
}

impl fmt::Debug for BlockingHttpTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockingHttpTransport")
            .field("inner", &self.inner)
            .finish_non_exhaustive()
    }
}

struct BlockingChunks {
    runtime: Arc<tokio::runtime::Runtime>,
    stream: ByteStream,
}

impl Iterator for BlockingChunks {
    type Item = Result<Bytes, HttpError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.runtime.block_on(self.stream.next())
    }
}

fn to_hyper_request(request: &mut Request) -> Result<http::Request<OutgoingBody>, HttpError> {
    let body: OutgoingBody = match request.body_mut().take_for_send() {
        SendBody::Empty => Empty::new().boxed_unsync(),
        SendBody::Bytes(bytes) => Full::new(bytes).boxed_unsync(),
        SendBody::Iter(chunks) => StreamBody::new(futures::stream::iter(
            chunks.map(|chunk| Ok::<_, Infallible>(Frame::data(chunk))),
        ))
        .boxed_unsync(),
        SendBody::Stream(chunks) => {
            StreamBody::new(chunks.map(|chunk| Ok::<_, Infallible>(Frame::data(chunk))))
                .boxed_unsync()
        }
        SendBody::Consumed => return Err(HttpError::StreamConsumed),
    };

    let mut url = request.url().clone();
    url.set_fragment(None);

    let mut outgoing = http::Request::builder()
        .method(request.method().clone())
        .uri(url.as_str())
        .body(body)?;
    outgoing.headers_mut().clone_from(request.headers());
    Ok(outgoing)
}

fn with_read_timeout(chunks: ByteStream, read_timeout: Option<Duration>) -> ByteStream {
    let Some(limit) = read_timeout else {
        return chunks;
    };
    Box::pin(futures::stream::unfold(chunks, move |mut chunks| async move {
        match tokio::time::timeout(limit, chunks.next()).await {
            Ok(next) => next.map(|chunk| (chunk, chunks)),
            Err(_) => Some((Err(HttpError::Timeout(limit)), chunks)),
        }
    }))
}

fn into_response(parts: http::response::Parts, body: ResponseBody) -> Response {
    let reason = parts
        .extensions
        .get::<hyper::ext::ReasonPhrase>()
        .map(|reason| String::from_utf8_lossy(reason.as_bytes()).into_owned());
    let mut response = Response::from_parts(parts.status, parts.version, parts.headers, body);
    response.set_reason(reason);
    response
}

/// OS trust anchors, parsed once per process.
static NATIVE_ROOTS: OnceLock<Arc<RootCertStore>> = OnceLock::new();

fn native_roots() -> Arc<RootCertStore> {
    let roots = NATIVE_ROOTS.get_or_init(|| {
        let loaded = rustls_native_certs::load_native_certs();
        for err in &loaded.errors {
            tracing::warn!(error = %err, "skipping unreadable native root certificate");
        }
        let mut roots = RootCertStore::empty();
        let (added, ignored) = roots.add_parsable_certificates(loaded.certs);
        if ignored > 0 {
            tracing::warn!(added, ignored, "some native root certificates could not be parsed");
        }
        tracing::debug!(count = added, "native root store loaded");
        Arc::new(roots)
    });
    Arc::clone(roots)
}

/// The process-wide provider when one is installed, else a local aws-lc-rs one.
fn tls_provider() -> Arc<CryptoProvider> {
    CryptoProvider::get_default()
        .cloned()
        .unwrap_or_else(|| Arc::new(rustls::crypto::aws_lc_rs::default_provider()))
}

/// Client config trusting the OS store. An empty store is an error here
/// rather than a handshake failure later.
fn native_tls_config() -> Result<rustls::ClientConfig, HttpError> {
    let roots = native_roots();
    if roots.is_empty() {
        return Err(HttpError::Tls(
            "no usable root certificates in the OS certificate store".into(),
        ));
    }
    Ok(rustls::ClientConfig::builder_with_provider(tls_provider())
        .with_safe_default_protocol_versions()
        .map_err(|e| HttpError::Tls(Box::new(e)))?
        .with_root_certificates(roots)
        .with_no_client_auth())
}

fn build_https_connector(
    config: &HttpTransportConfig,
) -> Result<HttpsConnector<HttpConnector>, HttpError> {
    let mut http = HttpConnector::new();
    http.enforce_http(false);
    http.set_connect_timeout(config.connect_timeout);

    let builder = match config.tls_roots {
        TlsRootConfig::WebPki => HttpsConnectorBuilder::new()
            .with_provider_and_webpki_roots(tls_provider())
            .map_err(|e| HttpError::Tls(Box::new(e)))?,
        TlsRootConfig::Native => HttpsConnectorBuilder::new().with_tls_config(native_tls_config()?),
    };
    Ok(builder
        .https_or_http()
        .enable_all_versions()
        .wrap_connector(http))
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::Method;
    use url::Url;

    #[tokio::test]
    async fn test_closed_transport_rejects_requests() {
        let transport = HttpTransport::new(&HttpTransportConfig::default()).unwrap();
        AsyncTransport::close(&transport);
        AsyncTransport::close(&transport);

        let mut request = Request::new(Method::GET, Url::parse("http://127.0.0.1:9/").unwrap());
        let err = AsyncTransport::handle(&transport, &mut request)
            .await
            .unwrap_err();
        assert!(matches!(err, HttpError::TransportClosed));
    }

    #[test]
    fn test_native_roots_are_loaded_once() {
        assert!(Arc::ptr_eq(&native_roots(), &native_roots()));
    }

    #[test]
    fn test_native_tls_config_failure_is_a_tls_error() {
        // CI containers may have no OS certificates; both outcomes are valid.
        match native_tls_config() {
            Ok(config) => assert!(!native_roots().is_empty(), "{config:?}"),
            Err(err) => assert!(matches!(err, HttpError::Tls(_))),
        }
    }

    #[test]
    fn test_tls_provider_has_cipher_suites() {
        assert!(!tls_provider().cipher_suites.is_empty());
    }

    #[tokio::test]
    async fn test_webpki_roots_build_without_os_store() {
        let config = HttpTransportConfig {
            tls_roots: TlsRootConfig::WebPki,
            ..HttpTransportConfig::default()
        };
        assert!(HttpTransport::new(&config).is_ok());
    }

    #[test]
    fn test_hyper_request_drops_fragment_and_keeps_headers() {
        let mut request = Request::builder(Method::POST, "http://example.org/a?b=1#frag")
            .header("x-tag", "1")
            .body("abc")
            .build()
            .unwrap();
        let outgoing = to_hyper_request(&mut request).unwrap();
        assert_eq!(outgoing.uri(), "http://example.org/a?b=1");
        assert_eq!(outgoing.headers().get("x-tag").unwrap(), "1");
        assert_eq!(outgoing.headers().get("content-length").unwrap(), "3");
        // buffered bodies stay available for redirects
        assert!(request.body().as_bytes().is_some());
    }

    #[test]
    fn test_sent_stream_body_cannot_be_resent() {
        let mut request = Request::builder(Method::POST, "http://example.org/")
            .body_iter(vec![Bytes::from_static(b"x")])
            .build()
            .unwrap();
        to_hyper_request(&mut request).unwrap();
        assert!(matches!(
            to_hyper_request(&mut request),
            Err(HttpError::StreamConsumed)
        ));
    }

    #[tokio::test]
    async fn test_read_timeout_applies_per_chunk() {
        let stalled: ByteStream = Box::pin(futures::stream::pending());
        let mut chunks = with_read_timeout(stalled, Some(Duration::from_millis(10)));
        let next = chunks.next().await.unwrap();
        assert!(matches!(next, Err(HttpError::Timeout(_))));
    }
}
