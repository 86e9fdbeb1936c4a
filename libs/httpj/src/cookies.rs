//! Cookie storage and the `Set-Cookie` / `Cookie` header round trip.
//!
//! [`Cookies`] is a cloneable handle over one shared jar. A client owns a
//! handle; a caller that passes its own handle at construction keeps seeing
//! every cookie the client learns.
//!
//! Only the commonly used subset of RFC 6265 is implemented: `Domain`,
//! `Path`, `Expires`, `Max-Age`, `Secure` and `HttpOnly`, plus the RFC 2965
//! `Discard` flag. Malformed values are dropped.

use http::HeaderMap;
use http::header::SET_COOKIE;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use url::Url;

use crate::request::Request;
use crate::response::Response;
use crate::urls;

/// A single stored cookie.
///
/// Identity is the `(domain, path, name)` triple. An empty `domain` matches
/// every host; a domain starting with `.` matches the domain and all of its
/// subdomains; any other domain matches that host only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    pub secure: bool,
    pub http_only: bool,
    pub expires: Option<SystemTime>,
    /// Dropped by [`Cookies::clear_session_cookies`]
    pub discard: bool,
}

impl Cookie {
    /// Session cookie valid for every host and path.
    #[must_use]
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
            domain: String::new(),
            path: "/".to_owned(),
            secure: false,
            http_only: false,
            expires: None,
            discard: true,
        }
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = domain.into().to_ascii_lowercase();
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    /// Also clears `discard`; chain [`Cookie::with_discard`] after it to
    /// keep an expiring cookie session-scoped.
    #[must_use]
    pub fn with_expires(mut self, expires: SystemTime) -> Self {
        self.expires = Some(expires);
        self.discard = false;
        self
    }

    #[must_use]
    pub fn with_discard(mut self, discard: bool) -> Self {
        self.discard = discard;
        self
    }

    /// Session cookies are discarded when the jar's owner says so.
    #[must_use]
    pub fn is_session(&self) -> bool {
        self.discard
    }

    #[must_use]
    pub fn is_expired_at(&self, now: SystemTime) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }

    fn same_key(&self, other: &Cookie) -> bool {
        self.name == other.name && self.domain == other.domain && self.path == other.path
    }

    fn matches_host(&self, host: &str) -> bool {
        if self.domain.is_empty() {
            return true;
        }
        match self.domain.strip_prefix('.') {
            Some(bare) => host == bare || host.ends_with(self.domain.as_str()),
            None => host == self.domain,
        }
    }

    fn matches_path(&self, request_path: &str) -> bool {
        match request_path.strip_prefix(self.path.as_str()) {
            Some(rest) => rest.is_empty() || self.path.ends_with('/') || rest.starts_with('/'),
            None => false,
        }
    }

    fn should_send(&self, url: &Url, now: SystemTime) -> bool {
        let host = url.host_str().unwrap_or_default();
        self.matches_host(host)
            && self.matches_path(url.path())
            && (!self.secure || urls::is_secure_scheme(url))
            && !self.is_expired_at(now)
    }
}

/// Parse one `Set-Cookie` value.
///
/// `host` is the request host; when present it becomes the default domain
/// and a `Domain` attribute must domain-match it.
fn parse_set_cookie(raw: &str, host: Option<&str>, now: SystemTime) -> Option<Cookie> {
    let mut parts = raw.split(';');
    let (name, value) = parts.next()?.split_once('=')?;
    let name = name.trim();
    if name.is_empty() {
        return None;
    }

    let mut cookie = Cookie::new(name, value.trim().trim_matches('"'));
    cookie.domain = host.map(str::to_ascii_lowercase).unwrap_or_default();
    let mut max_age_seen = false;
    let mut discard = false;

    for attribute in parts {
        let (key, value) = attribute.split_once('=').unwrap_or((attribute, ""));
        let value = value.trim();
        match key.trim().to_ascii_lowercase().as_str() {
            "domain" => {
                let domain = value.trim_start_matches('.').to_ascii_lowercase();
                if domain.is_empty() {
                    continue;
                }
                if let Some(host) = host
                    && !domain_matches(&host.to_ascii_lowercase(), &domain)
                {
                    tracing::debug!(cookie = name, domain, host, "rejecting cookie for foreign domain");
                    return None;
                }
                cookie.domain = format!(".{domain}");
            }
            "path" if value.starts_with('/') => cookie.path = value.to_owned(),
            "expires" if !max_age_seen => {
                if let Some(expires) = parse_expires(value) {
                    cookie.expires = Some(expires);
                }
            }
            "max-age" => {
                let Ok(seconds) = value.parse::<i64>() else {
                    continue;
                };
                max_age_seen = true;
                cookie.expires = Some(match u64::try_from(seconds) {
                    Ok(secs) if secs > 0 => now
                        .checked_add(Duration::from_secs(secs))
                        .unwrap_or(now),
                    _ => SystemTime::UNIX_EPOCH,
                });
            }
            "secure" => cookie.secure = true,
            "httponly" => cookie.http_only = true,
            "discard" => discard = true,
            _ => {}
        }
    }

    cookie.discard = discard || cookie.expires.is_none();
    Some(cookie)
}

fn domain_matches(host: &str, domain: &str) -> bool {
    host == domain
        || host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn parse_expires(value: &str) -> Option<SystemTime> {
    httpdate::parse_http_date(value)
        .or_else(|_| httpdate::parse_http_date(&value.replace('-', " ")))
        .ok()
}

/// Shared cookie jar.
///
/// Cloning yields another handle to the same jar. Cookies are kept in
/// insertion order; replacing a cookie keeps its position.
///
/// # Example
///
/// ```ignore
/// use httpj::Cookies;
///
/// let cookies = Cookies::from([("session", "abc")]);
/// let client = httpj::Client::builder().cookies(cookies.clone()).build()?;
/// client.get("https://example.com/login").send()?;
/// // `cookies` now also holds whatever the server set
/// ```
#[derive(Clone, Default)]
pub struct Cookies {
    jar: Arc<Mutex<Vec<Cookie>>>,
}

impl Cookies {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a cookie valid for every host and path.
    pub fn set(&self, name: impl Into<String>, value: impl Into<String>) {
        self.set_cookie(Cookie::new(name, value));
    }

    /// Set a cookie scoped to `domain` and `path`.
    pub fn set_for(
        &self,
        name: impl Into<String>,
        value: impl Into<String>,
        domain: &str,
        path: &str,
    ) {
        self.set_cookie(Cookie::new(name, value).with_domain(domain).with_path(path));
    }

    /// Insert `cookie`, replacing any cookie with the same identity in place.
    pub fn set_cookie(&self, cookie: Cookie) {
        let mut jar = self.jar.lock();
        if let Some(existing) = jar.iter_mut().find(|c| c.same_key(&cookie)) {
            *existing = cookie;
        } else {
            jar.push(cookie);
        }
    }

    /// Value of the first cookie named `name`, regardless of domain and path.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<String> {
        self.jar
            .lock()
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.value.clone())
    }

    /// Value of the cookie with exactly this identity.
    #[must_use]
    pub fn get_for(&self, name: &str, domain: &str, path: &str) -> Option<String> {
        self.jar
            .lock()
            .iter()
            .find(|c| c.name == name && c.domain == domain && c.path == path)
            .map(|c| c.value.clone())
    }

    /// Remove every cookie named `name`. Returns how many were removed.
    pub fn delete(&self, name: &str) -> usize {
        self.remove_where(|c| c.name == name)
    }

    /// Remove the cookie with exactly this identity.
    pub fn delete_for(&self, name: &str, domain: &str, path: &str) -> usize {
        self.remove_where(|c| c.name == name && c.domain == domain && c.path == path)
    }

    pub fn clear(&self) {
        self.jar.lock().clear();
    }

    /// Drop every cookie marked `discard`.
    pub fn clear_session_cookies(&self) {
        self.remove_where(Cookie::is_session);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.jar.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.jar.lock().is_empty()
    }

    /// Snapshot of the stored cookies, in insertion order.
    #[must_use]
    pub fn iter(&self) -> std::vec::IntoIter<Cookie> {
        self.jar.lock().clone().into_iter()
    }

    /// Copy every cookie of `other` into this jar.
    pub fn update(&self, other: &Cookies) {
        for cookie in other.iter() {
            self.set_cookie(cookie);
        }
    }

    /// Absorb the `Set-Cookie` headers of a response.
    ///
    /// The response's request supplies the default domain. Responses that
    /// were never attached to a request are parsed without a host.
    pub fn extract_from_response(&self, response: &Response) {
        let url = response.request().map(Request::url);
        self.extract_from_headers(url, response.headers());
    }

    /// Absorb `Set-Cookie` headers received for `url`.
    ///
    /// Expired cookies delete the stored cookie with the same identity.
    /// Returns how many cookies were stored.
    pub fn extract_from_headers(&self, url: Option<&Url>, headers: &HeaderMap) -> usize {
        let host = url.and_then(Url::host_str);
        let now = SystemTime::now();
        let mut stored = 0;

        for raw in headers.get_all(SET_COOKIE) {
            let Some(cookie) = raw
                .to_str()
                .ok()
                .and_then(|raw| parse_set_cookie(raw, host, now))
            else {
                tracing::debug!(value = ?raw, "dropping malformed Set-Cookie header");
                continue;
            };
            if cookie.is_expired_at(now) {
                self.remove_where(|c| c.same_key(&cookie));
            } else {
                self.set_cookie(cookie);
                stored += 1;
            }
        }

        if stored > 0 {
            tracing::debug!(count = stored, host, "stored cookies from response");
        }
        stored
    }

    /// `Cookie` header value for `request`, or `None` if no cookie applies.
    #[must_use]
    pub fn header_for_request(&self, request: &Request) -> Option<String> {
        self.header_for_url(request.url())
    }

    /// `Cookie` header value for a request to `url`.
    #[must_use]
    pub fn header_for_url(&self, url: &Url) -> Option<String> {
        let now = SystemTime::now();
        let jar = self.jar.lock();
        let pairs: Vec<String> = jar
            .iter()
            .filter(|c| c.should_send(url, now))
            .map(|c| format!("{}={}", c.name, c.value))
            .collect();
        if pairs.is_empty() {
            None
        } else {
            Some(pairs.join("; "))
        }
    }

    /// Independent jar holding this jar's cookies overlaid with `overlay`.
    pub(crate) fn merged_with(&self, overlay: &Cookies) -> Cookies {
        let merged = Cookies::from_iter(self.iter());
        merged.update(overlay);
        merged
    }

    fn remove_where(&self, predicate: impl Fn(&Cookie) -> bool) -> usize {
        let mut jar = self.jar.lock();
        let before = jar.len();
        jar.retain(|c| !predicate(c));
        before - jar.len()
    }
}

impl fmt::Debug for Cookies {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let jar = self.jar.lock();
        f.debug_map()
            .entries(jar.iter().map(|c| (&c.name, &c.value)))
            .finish()
    }
}

impl FromIterator<Cookie> for Cookies {
    fn from_iter<I: IntoIterator<Item = Cookie>>(iter: I) -> Self {
        let cookies = Cookies::new();
        for cookie in iter {
            cookies.set_cookie(cookie);
        }
        cookies
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Cookies {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        iter.into_iter()
            .map(|(name, value)| Cookie::new(name, value))
            .collect()
    }
}

impl<K: Into<String>, V: Into<String>, const N: usize> From<[(K, V); N]> for Cookies {
    fn from(pairs: [(K, V); N]) -> Self {
        pairs.into_iter().collect()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn url(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn set_cookie_headers(values: &[&str]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for value in values {
            headers.append(SET_COOKIE, HeaderValue::from_str(value).unwrap());
        }
        headers
    }

    #[test]
    fn test_set_and_get() {
        let cookies = Cookies::new();
        cookies.set("example-name", "example-value");
        assert_eq!(cookies.get("example-name").as_deref(), Some("example-value"));
        assert_eq!(cookies.get("missing"), None);
        assert_eq!(cookies.len(), 1);
    }

    #[test]
    fn test_replace_keeps_position() {
        let cookies = Cookies::from([("a", "1"), ("b", "2")]);
        cookies.set("a", "3");
        let names: Vec<_> = cookies.iter().map(|c| (c.name, c.value)).collect();
        assert_eq!(
            names,
            vec![("a".to_owned(), "3".to_owned()), ("b".to_owned(), "2".to_owned())]
        );
    }

    #[test]
    fn test_same_name_different_domain_are_distinct() {
        let cookies = Cookies::new();
        cookies.set_for("id", "1", "a.example", "/");
        cookies.set_for("id", "2", "b.example", "/");
        assert_eq!(cookies.len(), 2);
        assert_eq!(cookies.get("id").as_deref(), Some("1"));
        assert_eq!(cookies.get_for("id", "b.example", "/").as_deref(), Some("2"));
        assert_eq!(cookies.delete_for("id", "a.example", "/"), 1);
        assert_eq!(cookies.get("id").as_deref(), Some("2"));
    }

    #[test]
    fn test_clones_share_state() {
        let cookies = Cookies::new();
        let handle = cookies.clone();
        handle.set("shared", "yes");
        assert_eq!(cookies.get("shared").as_deref(), Some("yes"));
        cookies.clear();
        assert!(handle.is_empty());
    }

    #[test]
    fn test_extract_defaults_to_request_host() {
        let cookies = Cookies::new();
        let stored = cookies.extract_from_headers(
            Some(&url("http://example.org/set_cookie")),
            &set_cookie_headers(&["example-name=example-value"]),
        );
        assert_eq!(stored, 1);
        let cookie = cookies.iter().next().unwrap();
        assert_eq!(cookie.domain, "example.org");
        assert_eq!(cookie.path, "/");
        assert!(cookie.is_session());

        assert_eq!(
            cookies.header_for_url(&url("http://example.org/echo_cookies")).as_deref(),
            Some("example-name=example-value")
        );
        assert_eq!(cookies.header_for_url(&url("http://other.org/")), None);
        assert_eq!(cookies.header_for_url(&url("http://sub.example.org/")), None);
    }

    #[test]
    fn test_domain_attribute_matches_subdomains() {
        let cookies = Cookies::new();
        cookies.extract_from_headers(
            Some(&url("https://www.example.com/")),
            &set_cookie_headers(&["a=1; Domain=example.com"]),
        );
        assert_eq!(cookies.iter().next().unwrap().domain, ".example.com");
        assert!(cookies.header_for_url(&url("https://example.com/")).is_some());
        assert!(cookies.header_for_url(&url("https://api.example.com/")).is_some());
        assert!(cookies.header_for_url(&url("https://notexample.com/")).is_none());
    }

    #[test]
    fn test_foreign_domain_is_rejected() {
        let cookies = Cookies::new();
        let stored = cookies.extract_from_headers(
            Some(&url("https://example.com/")),
            &set_cookie_headers(&["a=1; Domain=evil.com", "b=2"]),
        );
        assert_eq!(stored, 1);
        assert_eq!(cookies.get("a"), None);
        assert_eq!(cookies.get("b").as_deref(), Some("2"));
    }

    #[test]
    fn test_path_matching() {
        let cookie = Cookie::new("a", "1").with_path("/docs");
        assert!(cookie.matches_path("/docs"));
        assert!(cookie.matches_path("/docs/web"));
        assert!(!cookie.matches_path("/docsweb"));
        assert!(!cookie.matches_path("/"));

        let cookie = Cookie::new("a", "1").with_path("/docs/");
        assert!(cookie.matches_path("/docs/web"));
    }

    #[test]
    fn test_secure_cookie_only_over_https() {
        let cookies = Cookies::new();
        cookies.set_cookie(Cookie::new("token", "t").with_secure(true));
        assert!(cookies.header_for_url(&url("http://example.com/")).is_none());
        assert_eq!(
            cookies.header_for_url(&url("https://example.com/")).as_deref(),
            Some("token=t")
        );
    }

    #[test]
    fn test_attributes_are_parsed() {
        let now = SystemTime::now();
        let cookie = parse_set_cookie(
            "id=a3fWa; Path=/app; Secure; HttpOnly; Max-Age=60",
            Some("example.com"),
            now,
        )
        .unwrap();
        assert_eq!(cookie.path, "/app");
        assert!(cookie.secure);
        assert!(cookie.http_only);
        assert_eq!(cookie.expires, Some(now + Duration::from_secs(60)));
    }

    #[test]
    fn test_max_age_wins_over_expires() {
        let now = SystemTime::now();
        let cookie = parse_set_cookie(
            "id=1; Max-Age=10; Expires=Wed, 21 Oct 2015 07:28:00 GMT",
            Some("example.com"),
            now,
        )
        .unwrap();
        assert_eq!(cookie.expires, Some(now + Duration::from_secs(10)));
    }

    #[test]
    fn test_expires_accepts_dashed_dates() {
        let cookie = parse_set_cookie(
            "id=1; Expires=Wed, 21-Oct-2015 07:28:00 GMT",
            Some("example.com"),
            SystemTime::now(),
        )
        .unwrap();
        assert!(cookie.is_expired_at(SystemTime::now()));
    }

    #[test]
    fn test_expired_cookie_deletes_existing() {
        let cookies = Cookies::new();
        let target = url("http://example.com/");
        cookies.extract_from_headers(Some(&target), &set_cookie_headers(&["a=1"]));
        assert_eq!(cookies.len(), 1);
        cookies.extract_from_headers(Some(&target), &set_cookie_headers(&["a=gone; Max-Age=0"]));
        assert!(cookies.is_empty());
    }

    #[test]
    fn test_malformed_values_are_dropped() {
        let cookies = Cookies::new();
        let stored = cookies.extract_from_headers(
            Some(&url("http://example.com/")),
            &set_cookie_headers(&["no-equals-sign", "=empty-name", "ok=1"]),
        );
        assert_eq!(stored, 1);
        assert_eq!(cookies.get("ok").as_deref(), Some("1"));
    }

    #[test]
    fn test_header_joins_in_insertion_order() {
        let cookies = Cookies::from([("b", "2"), ("a", "1")]);
        assert_eq!(
            cookies.header_for_url(&url("http://example.com/")).as_deref(),
            Some("b=2; a=1")
        );
    }

    #[test]
    fn test_clear_session_cookies() {
        let cookies = Cookies::from([("session", "1")]);
        cookies.set_cookie(
            Cookie::new("persistent", "2")
                .with_expires(SystemTime::now() + Duration::from_secs(3600)),
        );
        cookies.clear_session_cookies();
        assert_eq!(cookies.get("session"), None);
        assert_eq!(cookies.get("persistent").as_deref(), Some("2"));
    }

    #[test]
    fn test_clear_session_cookies_drops_expiring_discard_cookie() {
        let cookies = Cookies::new();
        cookies.set_cookie(
            Cookie::new("flagged", "1")
                .with_expires(SystemTime::now() + Duration::from_secs(3600))
                .with_discard(true),
        );
        cookies.clear_session_cookies();
        assert!(cookies.is_empty());
    }

    #[test]
    fn test_discard_attribute_is_parsed() {
        let now = SystemTime::now();
        let cookie =
            parse_set_cookie("id=1; Max-Age=60; Discard", Some("example.com"), now).unwrap();
        assert!(cookie.discard);
        assert_eq!(cookie.expires, Some(now + Duration::from_secs(60)));

        let cookie = parse_set_cookie("id=1; Max-Age=60", Some("example.com"), now).unwrap();
        assert!(!cookie.discard);

        let cookie = parse_set_cookie("id=1", Some("example.com"), now).unwrap();
        assert!(cookie.discard);
    }

    #[test]
    fn test_merged_with_is_independent() {
        let jar = Cookies::from([("a", "1"), ("b", "2")]);
        let overlay = Cookies::from([("b", "override")]);
        let merged = jar.merged_with(&overlay);
        assert_eq!(merged.get("b").as_deref(), Some("override"));
        assert_eq!(jar.get("b").as_deref(), Some("2"));
        merged.set("c", "3");
        assert_eq!(jar.get("c"), None);
    }

    #[test]
    fn test_cookie_serializes() {
        let cookie = Cookie::new("a", "1").with_domain("Example.COM");
        let json = serde_json::to_string(&cookie).unwrap();
        let back: Cookie = serde_json::from_str(&json).unwrap();
        assert_eq!(back.domain, "example.com");
        assert_eq!(back, cookie);
    }
}
