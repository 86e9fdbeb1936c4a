//! The redirect and cookie state machine shared by both clients.
//!
//! A send is driven as: [`RedirectFlow::start`] on the caller's request, then
//! for every transport response [`RedirectFlow::on_response`], and for every
//! hop that is followed [`RedirectFlow::follow`] once the hop body has been
//! read. The flow itself never performs I/O, so the blocking and async
//! clients only differ in how they call the transport and read bodies.

use http::HeaderValue;
use http::header::COOKIE;
use std::sync::Arc;

use crate::config::RedirectConfig;
use crate::cookies::Cookies;
use crate::error::HttpError;
use crate::redirect::build_redirect_request;
use crate::request::Request;
use crate::response::Response;
use crate::urls;

/// Outcome of one transport round trip.
#[derive(Debug)]
pub(crate) enum Step {
    /// Hand this response to the caller
    Done(Response),
    /// Read `hop`, then send `next`
    Redirect { hop: Response, next: Request },
}

pub(crate) struct RedirectFlow {
    cookies: Cookies,
    /// Per-request cookies, merged over the jar for this send only
    overlay: Option<Cookies>,
    follow: bool,
    max_redirects: usize,
    history: Vec<Response>,
}

impl RedirectFlow {
    pub(crate) fn new(cookies: &Cookies, redirect: &RedirectConfig, follow: Option<bool>) -> Self {
        Self {
            cookies: cookies.clone(),
            overlay: None,
            follow: follow.unwrap_or(redirect.follow_redirects),
            max_redirects: redirect.max_redirects,
            history: Vec::new(),
        }
    }

    /// Validate the caller's request and attach its cookies.
    ///
    /// # Errors
    ///
    /// [`HttpError::UnsupportedProtocol`] or [`HttpError::InvalidUri`] for a
    /// URL that cannot be sent, before any transport call.
    pub(crate) fn start(&mut self, request: &mut Request) -> Result<(), HttpError> {
        urls::ensure_sendable(request.url())?;

        if let Some(overlay) = request.take_legacy_cookies() {
            tracing::warn!(
                url = %request.url(),
                "setting per-request cookies is deprecated; set them on the client instead"
            );
            self.overlay = Some(overlay);
        }

        self.inject_cookies(request)
    }

    /// Record `response` to `request` and decide what happens next.
    ///
    /// # Errors
    ///
    /// Fails when a redirect that is to be followed has a target that cannot
    /// be built. Without following, such a response is returned with no
    /// next request.
    pub(crate) fn on_response(
        &mut self,
        request: Request,
        mut response: Response,
    ) -> Result<Step, HttpError> {
        let request = Arc::new(request);
        response.set_request(Arc::clone(&request));
        self.cookies.extract_from_response(&response);

        if !response.is_redirect() {
            return Ok(Step::Done(self.finish(response)));
        }

        if self.follow {
            let next = build_redirect_request(&request, &response)?;
            return Ok(Step::Redirect {
                hop: response,
                next,
            });
        }

        match build_redirect_request(&request, &response) {
            Ok(next) => {
                tracing::debug!(
                    status = response.status().as_u16(),
                    next = %next.url(),
                    "not following redirect"
                );
                response.set_next_request(next);
            }
            Err(err) => tracing::debug!(
                status = response.status().as_u16(),
                error = %err,
                "not following redirect; no usable next request"
            ),
        }
        Ok(Step::Done(self.finish(response)))
    }

    /// Push a read hop onto the history and prepare `next` for sending.
    ///
    /// # Errors
    ///
    /// [`HttpError::TooManyRedirects`] once the chain outgrows the bound;
    /// the error carries every hop received so far.
    pub(crate) fn follow(&mut self, hop: Response, next: &mut Request) -> Result<(), HttpError> {
        self.history.push(hop);
        if self.history.len() > self.max_redirects {
            tracing::debug!(
                max_redirects = self.max_redirects,
                url = %next.url(),
                "redirect limit exceeded"
            );
            return Err(HttpError::TooManyRedirects {
                max_redirects: self.max_redirects,
                history: std::mem::take(&mut self.history),
            });
        }
        self.inject_cookies(next)
    }

    fn finish(&mut self, mut response: Response) -> Response {
        response.set_history(std::mem::take(&mut self.history));
        response
    }

    /// Set `Cookie` from the jar unless the caller already set one.
    fn inject_cookies(&self, request: &mut Request) -> Result<(), HttpError> {
        if request.headers().contains_key(COOKIE) {
            return Ok(());
        }

        let header = match &self.overlay {
            Some(overlay) => self.cookies.merged_with(overlay).header_for_request(request),
            None => self.cookies.header_for_request(request),
        };
        if let Some(header) = header {
            request
                .headers_mut()
                .insert(COOKIE, HeaderValue::try_from(header)?);
        }
        Ok(())
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use http::{Method, StatusCode};
    use url::Url;

    fn get(url: &str) -> Request {
        Request::new(Method::GET, Url::parse(url).unwrap())
    }

    fn redirect(location: &str) -> Response {
        Response::builder(302)
            .header("location", location)
            .build()
            .unwrap()
    }

    #[test]
    fn test_start_rejects_unsupported_scheme() {
        let mut flow = RedirectFlow::new(&Cookies::new(), &RedirectConfig::default(), None);
        let err = flow.start(&mut get("invalid://example.org")).unwrap_err();
        assert!(matches!(err, HttpError::UnsupportedProtocol { ref scheme, .. } if scheme == "invalid"));
    }

    #[test]
    fn test_start_injects_jar_cookies_unless_explicit() {
        let jar = Cookies::from([("a", "1")]);
        let mut flow = RedirectFlow::new(&jar, &RedirectConfig::default(), None);

        let mut request = get("http://example.org/");
        flow.start(&mut request).unwrap();
        assert_eq!(request.headers().get(COOKIE).unwrap(), "a=1");

        let mut request = get("http://example.org/");
        request
            .headers_mut()
            .insert(COOKIE, HeaderValue::from_static("mine=1"));
        flow.start(&mut request).unwrap();
        assert_eq!(request.headers().get(COOKIE).unwrap(), "mine=1");
    }

    #[test]
    fn test_not_following_sets_next_request() {
        let mut flow = RedirectFlow::new(&Cookies::new(), &RedirectConfig::disabled(), None);
        let step = flow
            .on_response(get("http://example.org/a"), redirect("/b"))
            .unwrap();
        let Step::Done(response) = step else {
            panic!("expected the redirect to be returned");
        };
        assert_eq!(response.status(), StatusCode::FOUND);
        assert_eq!(response.next_request().unwrap().url().path(), "/b");
        assert!(response.history().is_empty());
    }

    #[test]
    fn test_not_following_unusable_location_returns_response() {
        let mut flow = RedirectFlow::new(&Cookies::new(), &RedirectConfig::disabled(), None);
        let step = flow
            .on_response(get("http://example.org/a"), redirect("ftp://example.org/file"))
            .unwrap();
        let Step::Done(response) = step else {
            panic!("expected the redirect to be returned");
        };
        assert_eq!(response.status(), StatusCode::FOUND);
        assert!(response.next_request().is_none());
    }

    #[test]
    fn test_following_unusable_location_fails() {
        let mut flow = RedirectFlow::new(&Cookies::new(), &RedirectConfig::default(), None);
        let err = flow
            .on_response(get("http://example.org/a"), redirect("ftp://example.org/file"))
            .unwrap_err();
        assert!(matches!(err, HttpError::UnsupportedProtocol { ref scheme, .. } if scheme == "ftp"));
    }

    #[test]
    fn test_follow_override_wins_over_config() {
        let mut flow = RedirectFlow::new(&Cookies::new(), &RedirectConfig::disabled(), Some(true));
        let step = flow
            .on_response(get("http://example.org/a"), redirect("/b"))
            .unwrap();
        assert!(matches!(step, Step::Redirect { .. }));
    }

    #[test]
    fn test_bound_is_enforced_after_push() {
        let mut flow = RedirectFlow::new(&Cookies::new(), &RedirectConfig::limited(1), None);

        let mut next = get("http://example.org/b");
        flow.follow(redirect("/b"), &mut next).unwrap();

        let mut next = get("http://example.org/c");
        let err = flow.follow(redirect("/c"), &mut next).unwrap_err();
        match err {
            HttpError::TooManyRedirects {
                max_redirects,
                history,
            } => {
                assert_eq!(max_redirects, 1);
                assert_eq!(history.len(), 2);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_done_carries_history() {
        let mut flow = RedirectFlow::new(&Cookies::new(), &RedirectConfig::default(), None);
        let Step::Redirect { hop, mut next } = flow
            .on_response(get("http://example.org/a"), redirect("/b"))
            .unwrap()
        else {
            panic!("expected a redirect step");
        };
        flow.follow(hop, &mut next).unwrap();

        let Step::Done(response) = flow
            .on_response(next, Response::new(StatusCode::OK))
            .unwrap()
        else {
            panic!("expected the final response");
        };
        assert_eq!(response.history().len(), 1);
        assert_eq!(response.url().unwrap().path(), "/b");
        assert_eq!(response.original_request().unwrap().url().path(), "/a");
    }

    #[test]
    fn test_cookies_set_by_hop_reach_next_request() {
        let jar = Cookies::new();
        let mut flow = RedirectFlow::new(&jar, &RedirectConfig::default(), None);
        let hop = Response::builder(302)
            .header("location", "/b")
            .header("set-cookie", "session=xyz")
            .build()
            .unwrap();

        let Step::Redirect { hop, mut next } =
            flow.on_response(get("http://example.org/a"), hop).unwrap()
        else {
            panic!("expected a redirect step");
        };
        flow.follow(hop, &mut next).unwrap();
        assert_eq!(next.headers().get(COOKIE).unwrap(), "session=xyz");
        assert_eq!(jar.get("session").as_deref(), Some("xyz"));
    }
}
