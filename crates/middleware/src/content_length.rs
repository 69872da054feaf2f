use crate::stream::{Chunk, StageContext, Transform};
use crate::{Flow, Middleware, MiddlewareError, Request, Response, StreamError};
use bytes::{Bytes, BytesMut};
use http::header::CONTENT_LENGTH;
use http::{HeaderValue, Method};
use tracing::{debug, trace};

pub fn content_length() -> ContentLength {
    ContentLength
}

/// Buffers the whole body and announces its size with `content-length` before releasing it.
///
/// The header is only written when the head is still unsent once the body completes; otherwise
/// the buffered bytes are released unchanged. HEAD requests are left alone.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContentLength;

impl Middleware for ContentLength {
    fn name(&self) -> &str {
        "content-length"
    }

    fn handle(&self, req: &Request, res: &mut Response) -> Result<Flow, MiddlewareError> {
        if req.method() == Method::HEAD {
            return Ok(Flow::Continue);
        }

        let target = res.replace_stream(LengthStream::default());
        debug!(stream = %res.front(), %target, "content length installed");
        Ok(Flow::Continue)
    }
}

#[derive(Default)]
struct LengthStream {
    buf: BytesMut,
}

impl Transform for LengthStream {
    fn transform(&mut self, chunk: Chunk, _ctx: &mut StageContext<'_>) -> Result<(), MiddlewareError> {
        match chunk {
            Chunk::Bytes(bytes) => self.buf.extend_from_slice(&bytes),
            Chunk::Text(text) => self.buf.extend_from_slice(text.as_bytes()),
            Chunk::Json(_) => return Err(StreamError::invalid_chunk("structured chunk cannot be measured").into()),
        }
        trace!(buffered = self.buf.len(), "chunk buffered");
        Ok(())
    }

    fn finish(&mut self, ctx: &mut StageContext<'_>) -> Result<(), MiddlewareError> {
        let body: Bytes = self.buf.split().freeze();

        let head = ctx.head_mut();
        if !head.headers_sent() {
            head.insert_header(CONTENT_LENGTH, HeaderValue::from(body.len()));
        }

        if !body.is_empty() {
            ctx.forward(body)?;
        }
        ctx.end_target()?;
        Ok(())
    }
}
