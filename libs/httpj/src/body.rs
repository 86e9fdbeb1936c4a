//! Request and response bodies.
//!
//! A [`ResponseBody`] moves through three states:
//!
//! ```text
//! Unread ──read()/first chunk──▶ Streaming ──exhausted/close()──▶ Closed
//!    └────────────────────────close()─────────────────────────────▲
//! ```
//!
//! Reading buffers the whole content; iterating hands chunks out without
//! keeping them. Content accessors never read implicitly.

use bytes::{Bytes, BytesMut};
use futures::{Stream, StreamExt};
use std::fmt;
use std::pin::Pin;

use crate::error::HttpError;

/// Lazy blocking sequence of request body chunks.
pub type ChunkIter = Box<dyn Iterator<Item = Bytes> + Send + Sync>;

/// Lazy async sequence of request body chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Bytes> + Send + Sync>>;

/// Blocking source of response body chunks.
pub type ByteIter = Box<dyn Iterator<Item = Result<Bytes, HttpError>> + Send>;

/// Async source of response body chunks.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, HttpError>> + Send>>;

/// Outgoing request content.
pub struct RequestBody {
    kind: BodyKind,
}

enum BodyKind {
    Empty,
    Bytes(Bytes),
    Iter(ChunkIter),
    Stream(ChunkStream),
    /// A streaming body that a transport already sent
    Consumed,
}

impl RequestBody {
    #[must_use]
    pub fn empty() -> Self {
        Self {
            kind: BodyKind::Empty,
        }
    }

    #[must_use]
    pub fn chunked<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Bytes>,
        I::IntoIter: Send + Sync + 'static,
    {
        Self {
            kind: BodyKind::Iter(Box::new(chunks.into_iter())),
        }
    }

    #[must_use]
    pub fn chunked_stream<S>(chunks: S) -> Self
    where
        S: Stream<Item = Bytes> + Send + Sync + 'static,
    {
        Self {
            kind: BodyKind::Stream(Box::pin(chunks)),
        }
    }

    /// Buffered content, if the body is held in memory.
    #[must_use]
    pub fn as_bytes(&self) -> Option<&Bytes> {
        match &self.kind {
            BodyKind::Bytes(bytes) => Some(bytes),
            _ => None,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        match &self.kind {
            BodyKind::Empty => true,
            BodyKind::Bytes(bytes) => bytes.is_empty(),
            BodyKind::Iter(_) | BodyKind::Stream(_) | BodyKind::Consumed => false,
        }
    }

    /// Whether the body is a lazy chunk sequence.
    #[must_use]
    pub fn is_streaming(&self) -> bool {
        matches!(
            self.kind,
            BodyKind::Iter(_) | BodyKind::Stream(_) | BodyKind::Consumed
        )
    }

    /// Length known up front, which is `None` for streaming bodies.
    #[must_use]
    pub fn content_length(&self) -> Option<u64> {
        match &self.kind {
            BodyKind::Empty => Some(0),
            BodyKind::Bytes(bytes) => u64::try_from(bytes.len()).ok(),
            BodyKind::Iter(_) | BodyKind::Stream(_) | BodyKind::Consumed => None,
        }
    }

    /// Copy of the body for a replayed request.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::StreamConsumed`] for a streaming body that was
    /// not buffered first.
    pub fn try_clone(&self) -> Result<Self, HttpError> {
        match &self.kind {
            BodyKind::Empty => Ok(Self::empty()),
            BodyKind::Bytes(bytes) => Ok(Self::from(bytes.clone())),
            BodyKind::Iter(_) | BodyKind::Stream(_) | BodyKind::Consumed => {
                Err(HttpError::StreamConsumed)
            }
        }
    }

    /// Buffer a blocking chunk sequence in place.
    ///
    /// # Errors
    ///
    /// Fails for async-only bodies and for bodies a transport already sent.
    pub fn read(&mut self) -> Result<&Bytes, HttpError> {
        match std::mem::replace(&mut self.kind, BodyKind::Consumed) {
            BodyKind::Empty => self.kind = BodyKind::Bytes(Bytes::new()),
            BodyKind::Bytes(bytes) => self.kind = BodyKind::Bytes(bytes),
            BodyKind::Iter(chunks) => self.kind = BodyKind::Bytes(concat(chunks)),
            BodyKind::Stream(stream) => {
                self.kind = BodyKind::Stream(stream);
                return Err(HttpError::AsyncStreamInBlockingContext);
            }
            BodyKind::Consumed => return Err(HttpError::StreamConsumed),
        }
        self.as_bytes().ok_or(HttpError::StreamConsumed)
    }

    /// Buffer any chunk sequence in place.
    ///
    /// # Errors
    ///
    /// Fails for bodies a transport already sent.
    pub async fn aread(&mut self) -> Result<&Bytes, HttpError> {
        if let BodyKind::Stream(stream) = &mut self.kind {
            let chunks: Vec<Bytes> = stream.collect().await;
            self.kind = BodyKind::Bytes(concat(chunks));
        }
        self.read()
    }

    /// Take the content for sending, leaving buffered bytes in place for replay.
    pub(crate) fn take_for_send(&mut self) -> SendBody {
        match std::mem::replace(&mut self.kind, BodyKind::Consumed) {
            BodyKind::Empty => {
                self.kind = BodyKind::Empty;
                SendBody::Empty
            }
            BodyKind::Bytes(bytes) => {
                self.kind = BodyKind::Bytes(bytes.clone());
                SendBody::Bytes(bytes)
            }
            BodyKind::Iter(chunks) => SendBody::Iter(chunks),
            BodyKind::Stream(stream) => SendBody::Stream(stream),
            BodyKind::Consumed => SendBody::Consumed,
        }
    }
}

fn concat(chunks: impl IntoIterator<Item = Bytes>) -> Bytes {
    let mut buf = BytesMut::new();
    for chunk in chunks {
        buf.extend_from_slice(&chunk);
    }
    buf.freeze()
}

/// Body content handed to a network transport.
pub(crate) enum SendBody {
    Empty,
    Bytes(Bytes),
    Iter(ChunkIter),
    Stream(ChunkStream),
    Consumed,
}

impl Default for RequestBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            BodyKind::Empty => f.write_str("Empty"),
            BodyKind::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            BodyKind::Iter(_) => f.write_str("Iter"),
            BodyKind::Stream(_) => f.write_str("Stream"),
            BodyKind::Consumed => f.write_str("Consumed"),
        }
    }
}

impl From<Bytes> for RequestBody {
    fn from(bytes: Bytes) -> Self {
        Self {
            kind: BodyKind::Bytes(bytes),
        }
    }
}

impl From<Vec<u8>> for RequestBody {
    fn from(bytes: Vec<u8>) -> Self {
        Bytes::from(bytes).into()
    }
}

impl From<&'static [u8]> for RequestBody {
    fn from(bytes: &'static [u8]) -> Self {
        Bytes::from_static(bytes).into()
    }
}

impl From<String> for RequestBody {
    fn from(text: String) -> Self {
        Bytes::from(text).into()
    }
}

impl From<&'static str> for RequestBody {
    fn from(text: &'static str) -> Self {
        Bytes::from_static(text.as_bytes()).into()
    }
}

/// Lifecycle state of a [`ResponseBody`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyState {
    Unread,
    Streaming,
    Closed,
}

enum Source {
    Full(Bytes),
    Blocking(ByteIter),
    Async(ByteStream),
}

/// Hook run once when a body is closed, releasing transport resources.
pub type OnClose = Box<dyn FnOnce() + Send>;

/// Response content with an explicit read/iterate/close lifecycle.
pub struct ResponseBody {
    state: BodyState,
    source: Option<Source>,
    content: Option<Bytes>,
    /// Set once any chunk was pulled from the source
    consumed: bool,
    /// Set once buffered content was handed out by iteration
    replayed: bool,
    limit: Option<usize>,
    on_close: Option<OnClose>,
}

impl ResponseBody {
    #[must_use]
    pub fn empty() -> Self {
        Self::from_source(Source::Full(Bytes::new()))
    }

    #[must_use]
    pub fn from_bytes(bytes: Bytes) -> Self {
        Self::from_source(Source::Full(bytes))
    }

    #[must_use]
    pub fn from_chunks<I>(chunks: I) -> Self
    where
        I: IntoIterator<Item = Result<Bytes, HttpError>>,
        I::IntoIter: Send + 'static,
    {
        Self::from_source(Source::Blocking(Box::new(chunks.into_iter())))
    }

    #[must_use]
    pub fn from_stream<S>(chunks: S) -> Self
    where
        S: Stream<Item = Result<Bytes, HttpError>> + Send + 'static,
    {
        Self::from_source(Source::Async(Box::pin(chunks)))
    }

    fn from_source(source: Source) -> Self {
        Self {
            state: BodyState::Unread,
            source: Some(source),
            content: None,
            consumed: false,
            replayed: false,
            limit: None,
            on_close: None,
        }
    }

    /// Attach a hook that runs exactly once when the body closes.
    #[must_use]
    pub fn on_close(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.on_close = Some(Box::new(hook));
        self
    }

    pub(crate) fn set_limit(&mut self, limit: Option<usize>) {
        self.limit = limit;
    }

    #[must_use]
    pub fn state(&self) -> BodyState {
        self.state
    }

    /// Buffered content, once [`read`](Self::read) has completed.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError::StreamNotRead`] before the body is read.
    pub fn content(&self) -> Result<&Bytes, HttpError> {
        self.content.as_ref().ok_or(HttpError::StreamNotRead)
    }

    /// Read the whole body, buffer it and close.
    ///
    /// Calling it again returns the buffered content.
    ///
    /// # Errors
    ///
    /// - [`HttpError::StreamConsumed`] after manual iteration
    /// - [`HttpError::StreamClosed`] after a close without a read
    /// - [`HttpError::AsyncStreamInBlockingContext`] for async-only sources
    /// - [`HttpError::BodyTooLarge`] when the configured limit is exceeded
    /// - any error the source yields
    pub fn read(&mut self) -> Result<&Bytes, HttpError> {
        if self.content.is_none() {
            self.ensure_unread()?;
            let mut buf = BytesMut::new();
            while let Some(chunk) = self.next_chunk()? {
                self.append_limited(&mut buf, &chunk)?;
            }
            self.content = Some(buf.freeze());
        }
        self.content()
    }

    /// Async counterpart of [`read`](Self::read); also accepts blocking sources.
    ///
    /// # Errors
    ///
    /// Same as [`read`](Self::read), minus the async-source error.
    pub async fn aread(&mut self) -> Result<&Bytes, HttpError> {
        if self.content.is_none() {
            self.ensure_unread()?;
            let mut buf = BytesMut::new();
            while let Some(chunk) = self.next_chunk_async().await? {
                self.append_limited(&mut buf, &chunk)?;
            }
            self.content = Some(buf.freeze());
        }
        self.content()
    }

    fn ensure_unread(&self) -> Result<(), HttpError> {
        match self.state {
            BodyState::Unread => Ok(()),
            BodyState::Streaming => Err(HttpError::StreamConsumed),
            BodyState::Closed => Err(self.closed_error()),
        }
    }

    fn closed_error(&self) -> HttpError {
        if self.consumed {
            HttpError::StreamConsumed
        } else {
            HttpError::StreamClosed
        }
    }

    fn append_limited(&mut self, buf: &mut BytesMut, chunk: &Bytes) -> Result<(), HttpError> {
        let actual = buf.len() + chunk.len();
        if let Some(limit) = self.limit
            && actual > limit
        {
            self.close();
            return Err(HttpError::BodyTooLarge { limit, actual });
        }
        buf.extend_from_slice(chunk);
        Ok(())
    }

    /// Iterate over the remaining chunks without buffering them.
    ///
    /// After a [`read`](Self::read) the buffered content is yielded once.
    pub fn iter_bytes(&mut self) -> BytesIter<'_> {
        BytesIter {
            body: self,
            done: false,
        }
    }

    fn take_replay(&mut self) -> Option<Result<Option<Bytes>, HttpError>> {
        let content = self.content.as_ref()?;
        let chunk = if self.replayed || content.is_empty() {
            None
        } else {
            Some(content.clone())
        };
        self.replayed = true;
        Some(Ok(chunk))
    }

    /// Next chunk from a blocking source; `Ok(None)` closes the body.
    ///
    /// # Errors
    ///
    /// Same lifecycle errors as [`read`](Self::read), plus source errors.
    pub fn next_chunk(&mut self) -> Result<Option<Bytes>, HttpError> {
        if let Some(replay) = self.take_replay() {
            return replay;
        }
        let Some(source) = self.source.as_mut() else {
            return Err(self.closed_error());
        };
        self.state = BodyState::Streaming;
        self.consumed = true;
        let next = match source {
            Source::Full(bytes) => Ok(take_full(bytes)),
            Source::Blocking(chunks) => chunks.next().transpose(),
            Source::Async(_) => Err(HttpError::AsyncStreamInBlockingContext),
        };
        self.settle(next)
    }

    /// Next chunk from any source; `Ok(None)` closes the body.
    ///
    /// # Errors
    ///
    /// Same lifecycle errors as [`read`](Self::read), plus source errors.
    pub async fn next_chunk_async(&mut self) -> Result<Option<Bytes>, HttpError> {
        if let Some(replay) = self.take_replay() {
            return replay;
        }
        let Some(source) = self.source.as_mut() else {
            return Err(self.closed_error());
        };
        self.state = BodyState::Streaming;
        self.consumed = true;
        let next = match source {
            Source::Full(bytes) => Ok(take_full(bytes)),
            Source::Blocking(chunks) => chunks.next().transpose(),
            Source::Async(stream) => stream.next().await.transpose(),
        };
        self.settle(next)
    }

    fn settle(&mut self, next: Result<Option<Bytes>, HttpError>) -> Result<Option<Bytes>, HttpError> {
        match next {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                self.close();
                Ok(None)
            }
            Err(e) => {
                self.close();
                Err(e)
            }
        }
    }

    /// Release the source and run the close hook. Idempotent.
    pub fn close(&mut self) {
        self.source = None;
        self.state = BodyState::Closed;
        if let Some(hook) = self.on_close.take() {
            hook();
        }
    }
}

/// Blocking iterator over a [`ResponseBody`]; stops after the first error.
pub struct BytesIter<'a> {
    body: &'a mut ResponseBody,
    done: bool,
}

impl Iterator for BytesIter<'_> {
    type Item = Result<Bytes, HttpError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.body.next_chunk() {
            Ok(Some(chunk)) => Some(Ok(chunk)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn take_full(bytes: &mut Bytes) -> Option<Bytes> {
    if bytes.is_empty() {
        None
    } else {
        Some(std::mem::take(bytes))
    }
}

impl Drop for ResponseBody {
    fn drop(&mut self) {
        self.close();
    }
}

impl Default for ResponseBody {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Debug for ResponseBody {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponseBody")
            .field("state", &self.state)
            .field("content_len", &self.content.as_ref().map(Bytes::len))
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn chunks(parts: &[&'static str]) -> ResponseBody {
        ResponseBody::from_chunks(
            parts
                .iter()
                .map(|p| Ok(Bytes::from_static(p.as_bytes())))
                .collect::<Vec<_>>(),
        )
    }

    #[test]
    fn test_read_buffers_and_closes() {
        let mut body = chunks(&["Hello, ", "world!"]);
        assert_eq!(body.state(), BodyState::Unread);
        assert_eq!(body.read().unwrap().as_ref(), b"Hello, world!");
        assert_eq!(body.state(), BodyState::Closed);
        // repeated reads return the buffered content
        assert_eq!(body.read().unwrap().as_ref(), b"Hello, world!");
        assert_eq!(body.content().unwrap().as_ref(), b"Hello, world!");
    }

    #[test]
    fn test_content_before_read_fails() {
        let body = ResponseBody::from_bytes(Bytes::from_static(b"data"));
        assert!(matches!(body.content(), Err(HttpError::StreamNotRead)));
    }

    #[test]
    fn test_read_after_iteration_is_consumed() {
        let mut body = chunks(&["a", "b"]);
        assert_eq!(body.next_chunk().unwrap().unwrap().as_ref(), b"a");
        assert_eq!(body.state(), BodyState::Streaming);
        assert!(matches!(body.read(), Err(HttpError::StreamConsumed)));

        assert_eq!(body.next_chunk().unwrap().unwrap().as_ref(), b"b");
        assert!(body.next_chunk().unwrap().is_none());
        assert_eq!(body.state(), BodyState::Closed);
        assert!(matches!(body.read(), Err(HttpError::StreamConsumed)));
        assert!(matches!(body.content(), Err(HttpError::StreamNotRead)));
    }

    #[test]
    fn test_read_after_close_is_closed() {
        let mut body = chunks(&["a"]);
        body.close();
        assert!(matches!(body.read(), Err(HttpError::StreamClosed)));
        assert!(matches!(body.next_chunk(), Err(HttpError::StreamClosed)));
    }

    #[test]
    fn test_close_hook_runs_once() {
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        let mut body = chunks(&["a"]).on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        body.read().unwrap();
        body.close();
        body.close();
        drop(body);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_closes_unread_body() {
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&closed);
        let body = chunks(&["a"]).on_close(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        drop(body);
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_iter_bytes_after_read_replays_content() {
        let mut body = chunks(&["a", "b"]);
        body.read().unwrap();
        let replayed: Vec<Bytes> = body.iter_bytes().map(Result::unwrap).collect();
        assert_eq!(replayed, vec![Bytes::from_static(b"ab")]);
        assert_eq!(body.iter_bytes().count(), 0);
    }

    #[test]
    fn test_iter_bytes_streams_without_buffering() {
        let mut body = chunks(&["a", "b", "c"]);
        let streamed: Vec<Bytes> = body.iter_bytes().map(Result::unwrap).collect();
        assert_eq!(streamed.len(), 3);
        assert_eq!(body.state(), BodyState::Closed);
        assert!(matches!(body.content(), Err(HttpError::StreamNotRead)));
        let mut again = body.iter_bytes();
        assert!(matches!(again.next(), Some(Err(HttpError::StreamConsumed))));
        assert!(again.next().is_none());
    }

    #[test]
    fn test_source_error_closes_body() {
        let mut body = ResponseBody::from_chunks(vec![
            Ok(Bytes::from_static(b"a")),
            Err(HttpError::Timeout(std::time::Duration::from_secs(1))),
        ]);
        assert!(matches!(body.read(), Err(HttpError::Timeout(_))));
        assert_eq!(body.state(), BodyState::Closed);
        assert!(matches!(body.read(), Err(HttpError::StreamConsumed)));
    }

    #[test]
    fn test_limit_enforced_while_buffering() {
        let mut body = chunks(&["12345", "67890"]);
        body.set_limit(Some(8));
        match body.read() {
            Err(HttpError::BodyTooLarge { limit, actual }) => {
                assert_eq!(limit, 8);
                assert_eq!(actual, 10);
            }
            other => panic!("unexpected result: {other:?}"),
        }
    }

    #[test]
    fn test_blocking_read_of_async_source_fails() {
        let mut body = ResponseBody::from_stream(futures::stream::iter(vec![Ok(
            Bytes::from_static(b"x"),
        )]));
        assert!(matches!(
            body.read(),
            Err(HttpError::AsyncStreamInBlockingContext)
        ));
    }

    #[tokio::test]
    async fn test_async_read_accepts_both_sources() {
        let mut body = ResponseBody::from_stream(futures::stream::iter(vec![
            Ok(Bytes::from_static(b"as")),
            Ok(Bytes::from_static(b"ync")),
        ]));
        assert_eq!(body.aread().await.unwrap().as_ref(), b"async");

        let mut body = chunks(&["blo", "cking"]);
        assert_eq!(body.aread().await.unwrap().as_ref(), b"blocking");
    }

    #[test]
    fn test_request_body_headers_inputs() {
        assert_eq!(RequestBody::empty().content_length(), Some(0));
        assert_eq!(RequestBody::from("abc").content_length(), Some(3));
        let streamed = RequestBody::chunked(vec![Bytes::from_static(b"a")]);
        assert!(streamed.is_streaming());
        assert_eq!(streamed.content_length(), None);
    }

    #[test]
    fn test_request_body_read_buffers_iterator() {
        let mut body = RequestBody::chunked(vec![
            Bytes::from_static(b"Hello, "),
            Bytes::from_static(b"world!"),
        ]);
        assert!(body.try_clone().is_err());
        assert_eq!(body.read().unwrap().as_ref(), b"Hello, world!");
        assert_eq!(body.try_clone().unwrap().as_bytes().unwrap().as_ref(), b"Hello, world!");
    }

    #[test]
    fn test_request_body_take_for_send_keeps_bytes() {
        let mut body = RequestBody::from("abc");
        assert!(matches!(body.take_for_send(), SendBody::Bytes(_)));
        assert!(body.as_bytes().is_some());

        let mut body = RequestBody::chunked(vec![Bytes::from_static(b"a")]);
        assert!(matches!(body.take_for_send(), SendBody::Iter(_)));
        assert!(matches!(body.try_clone(), Err(HttpError::StreamConsumed)));
    }
}
