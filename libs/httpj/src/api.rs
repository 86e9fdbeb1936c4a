//! One-shot helpers that send a single request through a throwaway client.
//!
//! ```ignore
//! let response = httpj::get("https://www.example.org/").send()?;
//! assert_eq!(response.status(), 200);
//! ```
//!
//! Each `send()` builds a [`Client`] with the default configuration, sends
//! once and closes it, so cookies never carry over between calls. Use a
//! [`Client`] for anything that needs connection reuse or a persistent jar.

use http::Method;

use crate::client::Client;
use crate::error::HttpError;
use crate::request::RequestBuilder;
use crate::response::Response;
use crate::urls;

/// Standalone request builder for `method` and `url`.
pub fn request(method: Method, url: &str) -> RequestBuilder {
    RequestBuilder::new((), method, url.to_owned(), None)
}

/// Standalone request builder whose response body is left unread.
pub fn stream(method: Method, url: &str) -> RequestBuilder {
    request(method, url).stream(true)
}

pub fn get(url: &str) -> RequestBuilder {
    request(Method::GET, url)
}

pub fn post(url: &str) -> RequestBuilder {
    request(Method::POST, url)
}

pub fn put(url: &str) -> RequestBuilder {
    request(Method::PUT, url)
}

pub fn patch(url: &str) -> RequestBuilder {
    request(Method::PATCH, url)
}

pub fn delete(url: &str) -> RequestBuilder {
    request(Method::DELETE, url)
}

pub fn head(url: &str) -> RequestBuilder {
    request(Method::HEAD, url)
}

pub fn options(url: &str) -> RequestBuilder {
    request(Method::OPTIONS, url)
}

impl RequestBuilder {
    /// Send through a fresh [`Client`], closed once the response is back.
    ///
    /// In stream mode the body stays readable after the client is closed.
    ///
    /// # Errors
    ///
    /// Deferred builder errors, transport construction errors, then anything
    /// [`Client::send_with`] returns.
    pub fn send(self) -> Result<Response, HttpError> {
        let ((), request, options) = self.into_parts()?;
        urls::ensure_sendable(request.url())?;
        let client = Client::new()?;
        let result = client.send_with(request, options);
        client.close();
        result
    }
}
