use async_trait::async_trait;
use http::Method;
use std::fmt;
use std::sync::Arc;

use super::{AsyncTransport, Transport};
use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;

type Handler = Arc<dyn Fn(&Request) -> Result<Response, HttpError> + Send + Sync>;

/// Transport that answers from a function, with no I/O.
///
/// The request body is buffered before the handler runs, so handlers can
/// inspect it with [`RequestBody::as_bytes`](crate::RequestBody::as_bytes).
///
/// # Example
///
/// ```ignore
/// use httpj::{Client, HttpError, MockTransport, Response};
///
/// let transport = MockTransport::new(|request| match request.url().path() {
///     "/set_cookie" => Response::builder(200)
///         .header("set-cookie", "example-name=example-value")
///         .build(),
///     _ => Err(HttpError::unmapped(request)),
/// });
/// let client = Client::builder().transport(transport).build()?;
/// ```
#[derive(Clone)]
pub struct MockTransport {
    handler: Handler,
}

impl MockTransport {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&Request) -> Result<Response, HttpError> + Send + Sync + 'static,
    {
        Self {
            handler: Arc::new(handler),
        }
    }

    /// Start a method and path route table.
    pub fn router() -> MockRouter {
        MockRouter::default()
    }

    fn respond(&self, request: &Request) -> Result<Response, HttpError> {
        tracing::trace!(method = %request.method(), url = %request.url(), "mock transport handling request");
        (self.handler)(request)
    }
}

impl Transport for MockTransport {
    fn handle(&self, request: &mut Request) -> Result<Response, HttpError> {
        request.read()?;
        self.respond(request)
    }
}

#[async_trait]
impl AsyncTransport for MockTransport {
    async fn handle(&self, request: &mut Request) -> Result<Response, HttpError> {
        request.aread().await?;
        self.respond(request)
    }
}

impl fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockTransport").finish_non_exhaustive()
    }
}

struct Route {
    method: Option<Method>,
    path: String,
    handler: Handler,
}

/// Route table for [`MockTransport`].
///
/// Routes match on the URL path and, optionally, the method. The first
/// matching route wins; anything else fails with
/// [`HttpError::UnmappedRoute`].
#[derive(Default)]
#[must_use = "MockRouter does nothing until .build() is called"]
pub struct MockRouter {
    routes: Vec<Route>,
}

impl MockRouter {
    /// Route for `path` with any method.
    pub fn any<F>(self, path: &str, handler: F) -> Self
    where
        F: Fn(&Request) -> Result<Response, HttpError> + Send + Sync + 'static,
    {
        self.push(None, path, handler)
    }

    /// Route for `method` on `path`.
    pub fn route<F>(self, method: Method, path: &str, handler: F) -> Self
    where
        F: Fn(&Request) -> Result<Response, HttpError> + Send + Sync + 'static,
    {
        self.push(Some(method), path, handler)
    }

    fn push<F>(mut self, method: Option<Method>, path: &str, handler: F) -> Self
    where
        F: Fn(&Request) -> Result<Response, HttpError> + Send + Sync + 'static,
    {
        self.routes.push(Route {
            method,
            path: path.to_owned(),
            handler: Arc::new(handler),
        });
        self
    }

    pub fn build(self) -> MockTransport {
        let routes = self.routes;
        MockTransport::new(move |request| {
            routes
                .iter()
                .find(|route| {
                    route.path == request.url().path()
                        && route.method.as_ref().is_none_or(|m| m == request.method())
                })
                .map_or_else(
                    || Err(HttpError::unmapped(request)),
                    |route| (route.handler)(request),
                )
        })
    }
}

impl fmt::Debug for MockRouter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockRouter")
            .field("routes", &self.routes.len())
            .finish()
    }
}
