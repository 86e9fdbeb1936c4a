#![allow(clippy::unwrap_used, clippy::expect_used)]

//! Response body lifecycle as seen through the client.

use bytes::Bytes;
use httpj::{BodyState, Client, HttpError, Method, MockTransport, Response};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn chunked_client(closes: Arc<AtomicUsize>) -> Client {
    let transport = MockTransport::new(move |_| {
        let closes = Arc::clone(&closes);
        Response::builder(200)
            .chunks(vec![
                Ok(Bytes::from_static(b"Hello, ")),
                Ok(Bytes::from_static(b"world!")),
            ])
            .on_close(move || {
                closes.fetch_add(1, Ordering::SeqCst);
            })
            .build()
    });
    Client::builder().transport(transport).build().unwrap()
}

#[test]
fn test_content_requires_read() {
    let client = chunked_client(Arc::default());
    let mut response = client.stream(Method::GET, "http://example.org/").send().unwrap();

    assert_eq!(response.body_state(), BodyState::Unread);
    assert!(matches!(response.content(), Err(HttpError::StreamNotRead)));
    assert!(matches!(response.text(), Err(HttpError::StreamNotRead)));

    assert_eq!(response.read().unwrap().as_ref(), b"Hello, world!");
    assert_eq!(response.text().unwrap(), "Hello, world!");
    assert!(response.is_closed());
}

#[test]
fn test_read_is_repeatable() {
    let client = chunked_client(Arc::default());
    let mut response = client.stream(Method::GET, "http://example.org/").send().unwrap();

    response.read().unwrap();
    assert_eq!(response.read().unwrap().as_ref(), b"Hello, world!");
}

#[test]
fn test_iterating_then_reading_is_consumed() {
    let client = chunked_client(Arc::default());
    let mut response = client.stream(Method::GET, "http://example.org/").send().unwrap();

    let first = response.iter_bytes().next().unwrap().unwrap();
    assert_eq!(first.as_ref(), b"Hello, ");
    assert_eq!(response.body_state(), BodyState::Streaming);
    assert!(matches!(response.read(), Err(HttpError::StreamConsumed)));
}

#[test]
fn test_iteration_to_the_end_closes() {
    let client = chunked_client(Arc::default());
    let mut response = client.stream(Method::GET, "http://example.org/").send().unwrap();

    let chunks: Vec<Bytes> = response.iter_bytes().map(Result::unwrap).collect();
    assert_eq!(chunks.len(), 2);
    assert!(response.is_closed());
    assert!(matches!(response.read(), Err(HttpError::StreamConsumed)));
}

#[test]
fn test_read_after_close_is_closed() {
    let client = chunked_client(Arc::default());
    let mut response = client.stream(Method::GET, "http://example.org/").send().unwrap();

    response.close();
    assert!(matches!(response.read(), Err(HttpError::StreamClosed)));
    assert!(matches!(response.content(), Err(HttpError::StreamNotRead)));
}

#[test]
fn test_close_hook_runs_exactly_once() {
    let closes = Arc::new(AtomicUsize::new(0));
    let client = chunked_client(Arc::clone(&closes));

    let mut response = client.stream(Method::GET, "http://example.org/").send().unwrap();
    response.close();
    response.close();
    drop(response);
    assert_eq!(closes.load(Ordering::SeqCst), 1);

    // read closes, the later drop does not close again
    let response = client.get("http://example.org/").send().unwrap();
    assert!(response.is_closed());
    drop(response);
    assert_eq!(closes.load(Ordering::SeqCst), 2);
}

#[test]
fn test_dropping_unread_response_closes_it() {
    let closes = Arc::new(AtomicUsize::new(0));
    let client = chunked_client(Arc::clone(&closes));

    drop(client.stream(Method::GET, "http://example.org/").send().unwrap());
    assert_eq!(closes.load(Ordering::SeqCst), 1);
}

#[test]
fn test_iter_after_read_replays_content() {
    let client = chunked_client(Arc::default());
    let mut response = client.get("http://example.org/").send().unwrap();

    let chunks: Vec<Bytes> = response.iter_bytes().map(Result::unwrap).collect();
    assert_eq!(chunks, vec![Bytes::from_static(b"Hello, world!")]);
}

#[test]
fn test_source_error_surfaces_from_read() {
    let transport = MockTransport::new(|_| {
        Response::builder(200)
            .chunks(vec![
                Ok(Bytes::from_static(b"partial")),
                Err(HttpError::RemoteProtocol("connection reset".to_owned())),
            ])
            .build()
    });
    let client = Client::builder().transport(transport).build().unwrap();

    let err = client.get("http://example.org/").send().unwrap_err();
    assert!(matches!(err, HttpError::RemoteProtocol(_)));
}

#[test]
fn test_async_only_body_fails_in_blocking_client() {
    let transport = MockTransport::new(|_| {
        Response::builder(200)
            .stream(futures::stream::iter(vec![Ok(Bytes::from_static(b"x"))]))
            .build()
    });
    let client = Client::builder().transport(transport).build().unwrap();

    let err = client.get("http://example.org/").send().unwrap_err();
    assert!(matches!(err, HttpError::AsyncStreamInBlockingContext));
}

#[test]
fn test_end_to_end_example() {
    let transport = MockTransport::new(|request| {
        assert_eq!(request.url().as_str(), "http://example.org/echo");
        Response::builder(200)
            .text(String::from_utf8_lossy(request.body().as_bytes().unwrap()))
            .build()
    });
    let client = Client::builder().transport(transport).build().unwrap();

    let response = client
        .post("http://example.org/echo")
        .body("Hello, world!")
        .send()
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.reason_phrase(), "OK");
    assert_eq!(response.text().unwrap(), "Hello, world!");
    assert_eq!(response.http_version(), "HTTP/1.1");
}
