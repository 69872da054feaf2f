//! The response side of the `{req, res}` pair handed to every middleware.
//!
//! - [`ResponseHead`]: status and headers, mutable until the one-way `headers_sent` latch flips
//! - [`Response`]: the head plus the [`StreamChain`] carrying the body

use crate::cookie::Cookie;
use crate::stream::{Chunk, EndState, Sink, StreamChain, StreamId, Transform};
use crate::{MiddlewareError, StreamError};
use http::header::{AsHeaderName, IntoHeaderName};
use http::{HeaderMap, HeaderValue, StatusCode};
use tracing::warn;

/// Status line and headers of a response.
///
/// Mutators return `false` without touching anything once the head has been sent; callers that
/// care have to check [`ResponseHead::headers_sent`] themselves.
#[derive(Debug, Clone, Default)]
pub struct ResponseHead {
    status: StatusCode,
    headers: HeaderMap,
    headers_sent: bool,
}

impl ResponseHead {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn set_status(&mut self, status: StatusCode) -> bool {
        if self.headers_sent {
            warn!(%status, "status change ignored, headers already sent");
            return false;
        }
        self.status = status;
        true
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        &self.headers
    }

    /// Returns the header value when it is present and visible ascii.
    pub fn header_str<K: AsHeaderName>(&self, name: K) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn insert_header<K: IntoHeaderName>(&mut self, name: K, value: HeaderValue) -> bool {
        if self.headers_sent {
            return false;
        }
        self.headers.insert(name, value);
        true
    }

    pub fn append_header<K: IntoHeaderName>(&mut self, name: K, value: HeaderValue) -> bool {
        if self.headers_sent {
            return false;
        }
        self.headers.append(name, value);
        true
    }

    pub fn remove_header<K: AsHeaderName>(&mut self, name: K) -> bool {
        if self.headers_sent {
            return false;
        }
        self.headers.remove(name).is_some()
    }

    /// Appends a `set-cookie` header carrying the serialized cookie.
    pub fn set_cookie(&mut self, cookie: &Cookie) -> Result<bool, MiddlewareError> {
        let value = HeaderValue::try_from(cookie.to_string())?;
        Ok(self.append_header(http::header::SET_COOKIE, value))
    }

    #[inline]
    pub fn headers_sent(&self) -> bool {
        self.headers_sent
    }

    pub(crate) fn mark_sent(&mut self) {
        self.headers_sent = true;
    }
}

/// A response under construction: its head and the chain of streams its body flows through.
///
/// Body writes are queued on the front stream and only move towards the sink when the transport
/// drives the chain with [`Response::step`] or [`Response::run_until_idle`].
#[derive(Debug)]
pub struct Response {
    head: ResponseHead,
    streams: StreamChain,
}

impl Response {
    pub fn new<S: Sink + 'static>(sink: S) -> Self {
        Self { head: ResponseHead::new(), streams: StreamChain::new(Box::new(sink)) }
    }

    #[inline]
    pub fn head(&self) -> &ResponseHead {
        &self.head
    }

    #[inline]
    pub fn head_mut(&mut self) -> &mut ResponseHead {
        &mut self.head
    }

    #[inline]
    pub fn status(&self) -> StatusCode {
        self.head.status()
    }

    #[inline]
    pub fn headers(&self) -> &HeaderMap {
        self.head.headers()
    }

    #[inline]
    pub fn headers_sent(&self) -> bool {
        self.head.headers_sent()
    }

    #[inline]
    pub fn streams(&self) -> &StreamChain {
        &self.streams
    }

    /// Installs `stream` as the new front of the body and returns the stream it must forward to.
    pub fn replace_stream<T: Transform + 'static>(&mut self, stream: T) -> StreamId {
        self.streams.replace_stream(Box::new(stream))
    }

    #[inline]
    pub fn front(&self) -> StreamId {
        self.streams.front()
    }

    pub fn add_end_observer(&mut self, id: StreamId) -> Result<(), StreamError> {
        self.streams.add_end_observer(id)
    }

    pub fn has_end_called(&self, id: StreamId) -> bool {
        self.streams.has_end_called(id)
    }

    pub fn end_state(&self, id: StreamId) -> Option<EndState> {
        self.streams.end_state(id)
    }

    pub fn set_high_water_mark(&mut self, id: StreamId, high_water_mark: usize) -> Result<(), StreamError> {
        self.streams.set_high_water_mark(id, high_water_mark)
    }

    /// Writes a chunk into the front stream; `false` means the caller should let the chain drain.
    pub fn write(&mut self, chunk: impl Into<Chunk>) -> Result<bool, StreamError> {
        self.streams.write(chunk.into())
    }

    pub fn end(&mut self) -> Result<(), StreamError> {
        self.streams.end()
    }

    /// Writes a last chunk and ends the body.
    pub fn end_with(&mut self, chunk: impl Into<Chunk>) -> Result<(), StreamError> {
        self.streams.write(chunk.into())?;
        self.streams.end()
    }

    pub fn step(&mut self) -> Result<bool, MiddlewareError> {
        self.streams.step(&mut self.head)
    }

    pub fn run_until_idle(&mut self) -> Result<(), MiddlewareError> {
        self.streams.run_until_idle(&mut self.head)
    }

    /// Whether the body has physically reached the end of the transport sink.
    pub fn is_finished(&self) -> bool {
        self.streams.is_finished()
    }
}
