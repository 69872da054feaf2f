use crate::stream::StreamId;
use http::StatusCode;
use http::header::InvalidHeaderValue;
use std::io;
use thiserror::Error;

/// Top-level fault raised by a middleware or by the stream chain while driving a response body.
///
/// The pipeline never catches these; the transport is expected to map them to a failure response,
/// see [`MiddlewareError::status_code`].
#[derive(Debug, Error)]
pub enum MiddlewareError {
    #[error("stream error: {source}")]
    Stream {
        #[from]
        source: StreamError,
    },

    #[error("transcode error: {source}")]
    Transcode {
        #[from]
        source: TranscodeError,
    },

    #[error("compression error: {source}")]
    Compression {
        #[from]
        source: io::Error,
    },

    #[error("invalid header value: {source}")]
    InvalidHeader {
        #[from]
        source: InvalidHeaderValue,
    },

    #[error("middleware {middleware} failed: {reason}")]
    Execution { middleware: String, reason: String },
}

impl MiddlewareError {
    pub fn execution<N: ToString, S: ToString>(middleware: N, reason: S) -> Self {
        Self::Execution { middleware: middleware.to_string(), reason: reason.to_string() }
    }

    /// The status a transport should answer with when this fault escapes the pipeline.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Stream { source: StreamError::Closed } => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("write after end on stream {id}")]
    WriteAfterEnd { id: StreamId },

    #[error("end called more than once on stream {id}")]
    EndTwice { id: StreamId },

    #[error("unknown stream {id}")]
    UnknownStream { id: StreamId },

    #[error("stream {id} has no forward target")]
    NoTarget { id: StreamId },

    #[error("transport sink has been closed")]
    Closed,

    #[error("invalid chunk: {reason}")]
    InvalidChunk { reason: String },

    #[error("io error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
}

impl StreamError {
    pub fn invalid_chunk<S: ToString>(str: S) -> Self {
        Self::InvalidChunk { reason: str.to_string() }
    }

    pub fn io<E: Into<io::Error>>(e: E) -> Self {
        Self::Io { source: e.into() }
    }
}

#[derive(Debug, Error)]
pub enum TranscodeError {
    #[error("failed to serialize structured chunk: {source}")]
    Json {
        #[from]
        source: serde_json::Error,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CookieError {
    #[error("cookie name is empty")]
    EmptyName,
}
