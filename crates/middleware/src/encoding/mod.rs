//! Response compression.
//!
//! [`compression`] installs a gzip or deflate stream in front of the body when the request
//! accepts one. Install it before the transcoder so it only ever sees bytes.

mod encoder;

use crate::{Flow, Middleware, MiddlewareError, Request, Response};
use bytes::{Bytes, BytesMut};
use encoder::{EncodeStream, Encoder};
use http::header::{ACCEPT_ENCODING, CONTENT_ENCODING, CONTENT_LENGTH, VARY};
use http::{HeaderValue, Method, StatusCode};
use serde::Deserialize;
use std::io;
use tracing::{debug, trace};

pub(crate) struct Writer {
    buf: BytesMut,
}

impl Writer {
    fn new() -> Self {
        Self { buf: BytesMut::with_capacity(4096) }
    }

    fn take(&mut self) -> Bytes {
        self.buf.split().freeze()
    }
}

impl io::Write for Writer {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(default)]
pub struct CompressionOptions {
    /// 0 (none) to 9 (best), higher values are clamped
    pub level: u32,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self { level: 6 }
    }
}

pub fn compression(options: CompressionOptions) -> Compression {
    Compression { options }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Compression {
    options: CompressionOptions,
}

impl Compression {
    fn level(&self) -> flate2::Compression {
        flate2::Compression::new(self.options.level.min(9))
    }
}

impl Middleware for Compression {
    fn name(&self) -> &str {
        "compression"
    }

    fn handle(&self, req: &Request, res: &mut Response) -> Result<Flow, MiddlewareError> {
        if req.method() == Method::HEAD {
            return Ok(Flow::Continue);
        }

        let status = res.status();
        if status == StatusCode::NO_CONTENT || status == StatusCode::NOT_MODIFIED {
            return Ok(Flow::Continue);
        }

        if res.headers_sent() {
            trace!("headers already sent, body left uncompressed");
            return Ok(Flow::Continue);
        }

        // response has already been encoded
        if res.headers().contains_key(CONTENT_ENCODING) {
            return Ok(Flow::Continue);
        }

        let Some(accept_encodings) = req.headers().get(ACCEPT_ENCODING).and_then(|value| value.to_str().ok()) else {
            return Ok(Flow::Continue);
        };

        let Some(encoder) = Encoder::select(accept_encodings, self.level()) else {
            trace!(accept_encodings, "no supported encoding accepted");
            return Ok(Flow::Continue);
        };

        let name = encoder.name();
        let head = res.head_mut();
        head.insert_header(CONTENT_ENCODING, HeaderValue::from_static(name));
        head.append_header(VARY, HeaderValue::from_static("accept-encoding"));
        head.remove_header(CONTENT_LENGTH);

        let target = res.replace_stream(EncodeStream::new(encoder));
        debug!(encoding = name, stream = %res.front(), %target, "compression installed");
        Ok(Flow::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::BufferSink;
    use flate2::read::{GzDecoder, ZlibDecoder};
    use std::io::Read;

    fn request(method: Method, accept_encoding: Option<&str>) -> Request {
        let mut builder = http::Request::builder().method(method).uri("/");
        if let Some(accept_encoding) = accept_encoding {
            builder = builder.header(ACCEPT_ENCODING, accept_encoding);
        }
        builder.body(Bytes::new()).unwrap()
    }

    fn body() -> String {
        "hello compression ".repeat(64)
    }

    #[test]
    fn test_gzip_round_trip() {
        let sink = BufferSink::new();
        let mut res = Response::new(sink.clone());
        res.head_mut().insert_header(CONTENT_LENGTH, HeaderValue::from(body().len()));

        compression(CompressionOptions::default()).handle(&request(Method::GET, Some("deflate, gzip")), &mut res).unwrap();
        res.write(body()).unwrap();
        res.end().unwrap();
        res.run_until_idle().unwrap();

        let headers = sink.sent_headers().unwrap();
        assert_eq!(headers.get(CONTENT_ENCODING).unwrap(), "gzip");
        assert_eq!(headers.get(VARY).unwrap(), "accept-encoding");
        assert!(headers.get(CONTENT_LENGTH).is_none());

        let compressed = sink.body();
        assert!(compressed.len() < body().len());
        let mut decoded = String::new();
        GzDecoder::new(&compressed[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, body());
        assert!(sink.is_ended());
    }

    #[test]
    fn test_deflate_when_gzip_not_accepted() {
        let sink = BufferSink::new();
        let mut res = Response::new(sink.clone());

        compression(CompressionOptions { level: 42 }).handle(&request(Method::GET, Some("deflate")), &mut res).unwrap();
        res.write("a").unwrap();
        res.write(Bytes::from_static(b"b")).unwrap();
        res.end().unwrap();
        res.run_until_idle().unwrap();

        assert_eq!(res.head().header_str(CONTENT_ENCODING), Some("deflate"));
        let mut decoded = String::new();
        ZlibDecoder::new(&sink.body()[..]).read_to_string(&mut decoded).unwrap();
        assert_eq!(decoded, "ab");
    }

    #[test]
    fn test_skipped_cases() {
        let middleware = compression(CompressionOptions::default());

        let mut res = Response::new(BufferSink::new());
        middleware.handle(&request(Method::HEAD, Some("gzip")), &mut res).unwrap();
        assert_eq!(res.streams().stream_count(), 1);

        let mut res = Response::new(BufferSink::new());
        middleware.handle(&request(Method::GET, None), &mut res).unwrap();
        assert_eq!(res.streams().stream_count(), 1);

        let mut res = Response::new(BufferSink::new());
        res.head_mut().insert_header(CONTENT_ENCODING, HeaderValue::from_static("br"));
        middleware.handle(&request(Method::GET, Some("gzip")), &mut res).unwrap();
        assert_eq!(res.streams().stream_count(), 1);
        assert_eq!(res.head().header_str(CONTENT_ENCODING), Some("br"));

        let mut res = Response::new(BufferSink::new());
        res.write("early").unwrap();
        res.run_until_idle().unwrap();
        middleware.handle(&request(Method::GET, Some("gzip")), &mut res).unwrap();
        assert_eq!(res.streams().stream_count(), 1);
        assert!(res.head().header_str(CONTENT_ENCODING).is_none());
    }

    #[test]
    fn test_structured_chunk_is_a_fault() {
        let mut res = Response::new(BufferSink::new());
        compression(CompressionOptions::default()).handle(&request(Method::GET, Some("gzip")), &mut res).unwrap();

        res.write(serde_json::json!({"a": 1})).unwrap();
        let err = res.run_until_idle().unwrap_err();
        assert!(matches!(err, MiddlewareError::Stream { source: crate::StreamError::InvalidChunk { .. } }));
    }
}
