//! Building the follow-up request for a redirect response.
//!
//! The rules:
//! - `303 See Other` always becomes `GET`; `301` and `302` turn anything but
//!   `GET`/`HEAD` into `GET`; `307` and `308` keep method and body
//! - when the body is dropped so are `Content-Length`, `Transfer-Encoding`
//!   and `Content-Type`
//! - `Cookie` is always removed; the jar recomputes it for the new URL
//! - credentials and `Host` are removed when the origin changes, except that
//!   `Authorization` survives an `http` to `https` upgrade of the same host

use http::header::{self, HeaderName};
use http::{Method, StatusCode};
use url::Url;

use crate::error::HttpError;
use crate::request::Request;
use crate::response::Response;
use crate::urls;

/// Headers that describe the request body
const BODY_HEADERS: &[HeaderName] = &[
    header::CONTENT_LENGTH,
    header::TRANSFER_ENCODING,
    header::CONTENT_TYPE,
];

/// Headers removed whenever the redirect leaves the origin
const CROSS_ORIGIN_HEADERS: &[HeaderName] = &[header::PROXY_AUTHORIZATION, header::HOST];

/// Resolve the `Location` of `response` against the URL of `request`.
///
/// # Errors
///
/// [`HttpError::RemoteProtocol`] for a missing or unparseable `Location`,
/// [`HttpError::UnsupportedProtocol`] when it names a scheme the client
/// cannot send to.
pub(crate) fn redirect_url(request: &Request, response: &Response) -> Result<Url, HttpError> {
    let location = response
        .headers()
        .get(header::LOCATION)
        .ok_or_else(|| HttpError::RemoteProtocol("redirect response has no Location".to_owned()))?
        .to_str()
        .map_err(|e| HttpError::RemoteProtocol(format!("invalid Location header: {e}")))?;

    let mut url = request
        .url()
        .join(location)
        .map_err(|e| HttpError::RemoteProtocol(format!("invalid URL in Location header: {e}")))?;

    if url.fragment().is_none()
        && let Some(fragment) = request.url().fragment()
    {
        url.set_fragment(Some(fragment));
    }

    urls::ensure_sendable(&url)?;
    Ok(url)
}

/// Method for the next hop.
pub(crate) fn redirect_method(method: &Method, status: StatusCode) -> Method {
    match status {
        StatusCode::SEE_OTHER => Method::GET,
        StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND
            if method != Method::GET && method != Method::HEAD =>
        {
            Method::GET
        }
        _ => method.clone(),
    }
}

/// Build the request that follows `response`.
///
/// `request` is the request that produced `response`; it is left untouched.
///
/// # Errors
///
/// See [`redirect_url`]. Also fails with [`HttpError::StreamConsumed`] when a
/// `307`/`308` needs to resend a streaming body that has already been sent.
pub(crate) fn build_redirect_request(
    request: &Request,
    response: &Response,
) -> Result<Request, HttpError> {
    let url = redirect_url(request, response)?;
    let status = response.status();
    let method = redirect_method(request.method(), status);
    let keep_body = matches!(
        status,
        StatusCode::TEMPORARY_REDIRECT | StatusCode::PERMANENT_REDIRECT
    );

    let mut next = request.clone_head();
    if keep_body {
        next.set_body(request.body().try_clone()?);
    } else {
        for name in BODY_HEADERS {
            next.headers_mut().remove(name);
        }
    }

    let headers = next.headers_mut();
    headers.remove(header::COOKIE);

    if !urls::is_same_origin(request.url(), &url) {
        if !urls::is_https_upgrade(request.url(), &url)
            && headers.remove(header::AUTHORIZATION).is_some()
        {
            tracing::debug!(to = %url, "stripped authorization on cross-origin redirect");
        }
        for name in CROSS_ORIGIN_HEADERS {
            headers.remove(name);
        }
    }

    tracing::debug!(
        status = status.as_u16(),
        from = %request.url(),
        to = %url,
        method = %method,
        "following redirect"
    );

    next.set_method(method);
    next.set_url(url);
    Ok(next)
}
