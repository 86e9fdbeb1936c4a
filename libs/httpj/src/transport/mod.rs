//! The capability boundary between the client and the network.
//!
//! A transport turns one [`Request`] into one [`Response`]. It knows nothing
//! about redirects or cookies; the client's redirect loop owns those.

mod network;
mod mock;

pub use self::network::{BlockingHttpTransport, HttpTransport};
pub use self::mock::{MockRouter, MockTransport};

use async_trait::async_trait;

use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;

/// Blocking transport.
///
/// `handle` takes the request mutably so a transport can consume a streaming
/// body; every other part of the request stays as the client built it.
pub trait Transport: Send + Sync {
    /// Send `request` and return the response head with an unread body.
    ///
    /// # Errors
    ///
    /// Connection, protocol and timeout failures, passed through unchanged
    /// by the client.
    fn handle(&self, request: &mut Request) -> Result<Response, HttpError>;

    /// Release pooled resources. Called once when the owning client closes.
    fn close(&self) {}
}

/// Async transport.
#[async_trait]
pub trait AsyncTransport: Send + Sync {
    /// Send `request` and return the response head with an unread body.
    ///
    /// # Errors
    ///
    /// Connection, protocol and timeout failures, passed through unchanged
    /// by the client.
    async fn handle(&self, request: &mut Request) -> Result<Response, HttpError>;

    /// Release pooled resources. Called once when the owning client closes.
    fn close(&self) {}
}
