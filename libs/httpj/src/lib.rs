#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![warn(warnings)]

//! HTTP client with pluggable transports
//!
//! This crate provides blocking and async clients that share one execution
//! core:
//! - Redirect following with method rewriting and credential stripping
//! - A persistent, shareable cookie jar fed by every response in a chain
//! - A streaming response body with an explicit read/iterate/close lifecycle
//! - A [`Transport`] / [`AsyncTransport`] seam, with a deterministic
//!   [`MockTransport`] for tests and hyper-based network transports
//!   (rustls, HTTP/1.1 and HTTP/2, transparent decompression)
//!
//! # Example
//!
//! ```ignore
//! use httpj::{Client, MockTransport, Response};
//!
//! let transport = MockTransport::new(|request| match request.url().path() {
//!     "/set_cookie" => Response::builder(200)
//!         .header("set-cookie", "example-name=example-value")
//!         .build(),
//!     _ => Response::builder(200).text("Hello, world!").build(),
//! });
//!
//! let client = Client::builder().transport(transport).build()?;
//! client.get("http://example.org/set_cookie").send()?;
//! assert_eq!(client.cookies().get("example-name").as_deref(), Some("example-value"));
//! ```
//!
//! Without an explicit transport, clients go to the network:
//!
//! ```ignore
//! let response = httpj::get("https://www.example.org/").send()?;
//! println!("{}", response.text()?);
//! ```

mod api;
mod async_client;
mod body;
mod builder;
mod client;
mod config;
mod cookies;
mod error;
mod flow;
mod redirect;
mod request;
mod response;
mod transport;
mod urls;

pub use api::{delete, get, head, options, patch, post, put, request, stream};
pub use async_client::AsyncClient;
pub use body::{
    BodyState, ByteIter, ByteStream, BytesIter, ChunkIter, ChunkStream, OnClose, RequestBody,
    ResponseBody,
};
pub use builder::ClientBuilder;
pub use client::Client;
pub use config::{
    ClientConfig, DEFAULT_MAX_REDIRECTS, DEFAULT_TIMEOUT, DEFAULT_USER_AGENT,
    HttpTransportConfig, RedirectConfig, Timeout, TlsRootConfig,
};
pub use cookies::{Cookie, Cookies};
pub use error::{HttpError, InvalidUriKind};
pub use request::{Request, RequestBuilder, SendOptions};
pub use response::{Response, ResponseBuilder};
pub use transport::{
    AsyncTransport, BlockingHttpTransport, HttpTransport, MockRouter, MockTransport, Transport,
};

pub use http::{HeaderMap, Method, StatusCode, Version};
pub use url::Url;
