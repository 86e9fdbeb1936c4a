//! URL helpers shared by request building and redirect handling.

use url::Url;

use crate::error::{HttpError, InvalidUriKind};

/// Parse a request target, appending it to `base` when one is configured.
///
/// Absolute URLs are used as-is. Relative targets are appended to the base
/// path (a base of `https://api.example.com/v1` plus `users` yields
/// `https://api.example.com/v1/users`), not resolved RFC 3986 style.
pub(crate) fn parse_target(raw: &str, base: Option<&Url>) -> Result<Url, HttpError> {
    match Url::parse(raw) {
        Ok(url) => Ok(url),
        Err(url::ParseError::RelativeUrlWithoutBase) => {
            let Some(base) = base else {
                return Err(HttpError::invalid_uri(
                    raw,
                    InvalidUriKind::RelativeWithoutBase,
                    "relative URL without a base URL",
                ));
            };
            merge_with_base(base, raw)
        }
        Err(e) => Err(HttpError::invalid_uri(raw, InvalidUriKind::ParseError, e)),
    }
}

fn merge_with_base(base: &Url, raw: &str) -> Result<Url, HttpError> {
    let mut base = base.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(raw.trim_start_matches('/'))
        .map_err(|e| HttpError::invalid_uri(raw, InvalidUriKind::ParseError, e))
}

/// Reject anything the client cannot send.
///
/// Only `http` and `https` URLs with a host are accepted.
pub(crate) fn ensure_sendable(url: &Url) -> Result<(), HttpError> {
    match url.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(HttpError::UnsupportedProtocol {
                scheme: scheme.to_owned(),
                url: url.to_string(),
            });
        }
    }
    if url.host_str().is_none_or(str::is_empty) {
        return Err(HttpError::invalid_uri(
            url.as_str(),
            InvalidUriKind::MissingHost,
            "URL has no host",
        ));
    }
    Ok(())
}

/// Get the default port for a scheme
fn default_port(scheme: &str) -> u16 {
    match scheme {
        "http" => 80,
        "https" => 443,
        _ => 0,
    }
}

fn effective_port(url: &Url) -> u16 {
    url.port().unwrap_or_else(|| default_port(url.scheme()))
}

/// Check if two URLs share an origin (scheme, host, port)
pub(crate) fn is_same_origin(original: &Url, target: &Url) -> bool {
    original.scheme() == target.scheme()
        && original.host_str() == target.host_str()
        && effective_port(original) == effective_port(target)
}

/// Check if the redirect upgrades `http` to `https` on the same host and default ports
pub(crate) fn is_https_upgrade(original: &Url, target: &Url) -> bool {
    original.scheme() == "http"
        && effective_port(original) == 80
        && target.scheme() == "https"
        && effective_port(target) == 443
        && original.host_str() == target.host_str()
}

/// Check whether `url` uses a scheme on which `Secure` cookies may be sent
pub(crate) fn is_secure_scheme(url: &Url) -> bool {
    matches!(url.scheme(), "https" | "wss")
}
