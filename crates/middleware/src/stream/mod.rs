//! Response body streams.
//!
//! A response starts with a single stream: the transport [`Sink`]. Middleware that want to rewrite
//! the body install a [`Transform`] in front of it with
//! [`Response::replace_stream`](crate::Response::replace_stream), receiving the id of the stream that
//! was previously in front as the forward target. Installs happen in middleware order, so bytes
//! written by application code pass through the most recently installed transform first and reach
//! the sink through the first installed one last.
//!
//! The chain is an index-addressed arena ([`StreamId`]) driven by a cooperative event loop owned by
//! [`StreamChain`]. Every link tracks its end through an [`EndObserver`], which separates the logical
//! `end()` call from the physical completion that happens once every chunk queued before it has
//! been processed.

mod chain;
mod end_observer;
mod sink;

pub use chain::DEFAULT_HIGH_WATER_MARK;
pub use chain::StageContext;
pub use chain::StreamChain;
pub use end_observer::EndObserver;
pub use end_observer::EndState;
pub use sink::BufferSink;
pub use sink::Sink;

#[cfg(test)]
pub use sink::MockSink;

use crate::MiddlewareError;
use bytes::Bytes;
use std::fmt;

/// Address of one stream in a response's [`StreamChain`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StreamId(usize);

impl StreamId {
    /// The transport sink is always the first stream of a chain.
    pub const SINK: StreamId = StreamId(0);

    #[inline]
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One unit written into a response stream.
#[derive(Debug, Clone, PartialEq)]
pub enum Chunk {
    /// raw bytes, never re-encoded
    Bytes(Bytes),
    /// text that still needs a character encoding
    Text(String),
    /// structured value that needs to be serialized before it can reach a byte sink
    Json(serde_json::Value),
}

impl Chunk {
    #[inline]
    pub fn is_bytes(&self) -> bool {
        matches!(self, Chunk::Bytes(_))
    }

    #[inline]
    pub fn is_text(&self) -> bool {
        matches!(self, Chunk::Text(_))
    }

    #[inline]
    pub fn is_json(&self) -> bool {
        matches!(self, Chunk::Json(_))
    }
}

impl From<Bytes> for Chunk {
    fn from(bytes: Bytes) -> Self {
        Chunk::Bytes(bytes)
    }
}

impl From<Vec<u8>> for Chunk {
    fn from(bytes: Vec<u8>) -> Self {
        Chunk::Bytes(Bytes::from(bytes))
    }
}

impl From<&'static [u8]> for Chunk {
    fn from(bytes: &'static [u8]) -> Self {
        Chunk::Bytes(Bytes::from_static(bytes))
    }
}

impl From<String> for Chunk {
    fn from(text: String) -> Self {
        Chunk::Text(text)
    }
}

impl From<&str> for Chunk {
    fn from(text: &str) -> Self {
        Chunk::Text(text.to_owned())
    }
}

impl From<serde_json::Value> for Chunk {
    fn from(value: serde_json::Value) -> Self {
        Chunk::Json(value)
    }
}

/// A stream installed in front of a response by a middleware.
///
/// Implementations receive every chunk written into their link, in order, and relay their output
/// to the forward target through the [`StageContext`]. The target must be ended exactly once, after
/// the last forwarded chunk; the default [`Transform::finish`] does just that.
pub trait Transform {
    /// Called for every chunk written into this stream.
    fn transform(&mut self, chunk: Chunk, ctx: &mut StageContext<'_>) -> Result<(), MiddlewareError>;

    /// Called once, on physical completion of this stream.
    fn finish(&mut self, ctx: &mut StageContext<'_>) -> Result<(), MiddlewareError> {
        ctx.end_target()?;
        Ok(())
    }

    /// Called after [`StageContext::wait_for_drain`] once the forward target has room again.
    fn drain(&mut self, _ctx: &mut StageContext<'_>) -> Result<(), MiddlewareError> {
        Ok(())
    }
}
