use http::Method;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::builder::ClientBuilder;
use crate::client::apply_defaults;
use crate::config::ClientConfig;
use crate::cookies::Cookies;
use crate::error::HttpError;
use crate::flow::{RedirectFlow, Step};
use crate::request::{Request, RequestBuilder, SendOptions};
use crate::response::Response;
use crate::transport::AsyncTransport;

/// Async HTTP client.
///
/// Same behavior as [`Client`](crate::Client); the only suspension points
/// are the transport call and body reads. `AsyncClient` is `Send + Sync` and
/// can be shared behind an `Arc` by concurrent tasks, which then share its
/// cookie jar.
///
/// # Example
///
/// ```ignore
/// let client = httpj::AsyncClient::new()?;
/// let response = client.get("https://example.org/").send().await?;
/// println!("{}", response.text()?);
/// ```
pub struct AsyncClient {
    transport: Arc<dyn AsyncTransport>,
    cookies: Cookies,
    config: ClientConfig,
    closed: AtomicBool,
}

impl AsyncClient {
    /// Client with the default configuration and the network transport.
    ///
    /// # Errors
    ///
    /// Returns an error if the transport cannot be created.
    pub fn new() -> Result<Self, HttpError> {
        ClientBuilder::new().build_async()
    }

    #[must_use]
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    pub(crate) fn from_parts(
        config: ClientConfig,
        cookies: Cookies,
        transport: Arc<dyn AsyncTransport>,
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
    /// See [`Client::send_with`](crate::Client::send_with).
    pub async fn send(&self, request: Request) -> Result<Response, HttpError> {
        self.send_with(request, SendOptions::default()).await
    }

    /// Send a prepared request.
    ///
    /// # Errors
    ///
    /// See [`Client::send_with`](crate::Client::send_with).
    pub async fn send_with(
        &self,
        mut request: Request,
        options: SendOptions,
    ) -> Result<Response, HttpError> {
        if self.is_closed() {
            return Err(HttpError::ClientClosed);
        }
        apply_defaults(&self.config, &mut request);

        let mut flow =
            RedirectFlow::new(&self.cookies, &self.config.redirect, options.follow_redirects);
        flow.start(&mut request)?;

        loop {
            let mut response = self.transport.handle(&mut request).await?;
            response.body_mut().set_limit(self.config.max_body_size);

            match flow.on_response(request, response)? {
                Step::Done(mut response) => {
                    if !options.stream {
                        response.aread().await?;
                    }
                    return Ok(response);
                }
                Step::Redirect { mut hop, next } => {
                    hop.aread().await?;
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
    /// Closing never waits: pooled connections are dropped, open responses
    /// keep whatever their body source still holds.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.transport.close();
            tracing::debug!("async client closed");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

impl Drop for AsyncClient {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for AsyncClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncClient")
            .field("config", &self.config)
            .field("cookies", &self.cookies)
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl RequestBuilder<&AsyncClient> {
    /// Build and send through the bound client.
    ///
    /// # Errors
    ///
    /// Deferred builder errors, then anything
    /// [`AsyncClient::send_with`] returns.
    pub async fn send(self) -> Result<Response, HttpError> {
        let (client, request, options) = self.into_parts()?;
        client.send_with(request, options).await
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use crate::MockTransport;
    use bytes::Bytes;

    fn assert_send<T: Send>(_: &T) {}

    #[tokio::test]
    async fn test_send_future_is_send() {
        let client = AsyncClient::builder()
            .async_transport(MockTransport::new(|_| Response::builder(204).build()))
            .build_async()
            .unwrap();
        let pending = client.get("http://example.org/").send();
        assert_send(&pending);
        assert_eq!(pending.await.unwrap().status(), 204);
    }

    #[tokio::test]
    async fn test_async_stream_body_is_read() {
        let client = AsyncClient::builder()
            .async_transport(MockTransport::new(|_| {
                let chunks = vec![Ok(Bytes::from_static(b"Hello, ")), Ok(Bytes::from_static(b"world!"))];
                Response::builder(200).stream(futures::stream::iter(chunks)).build()
            }))
            .build_async()
            .unwrap();

        let response = client.get("http://example.org/").send().await.unwrap();
        assert_eq!(response.text().unwrap(), "Hello, world!");
    }

    #[tokio::test]
    async fn test_closed_client_rejects_sends() {
        let client = AsyncClient::builder()
            .async_transport(MockTransport::new(|_| Response::builder(200).build()))
            .build_async()
            .unwrap();
        client.close();
        let err = client.get("http://example.org/").send().await.unwrap_err();
        assert!(matches!(err, HttpError::ClientClosed));
    }
}
