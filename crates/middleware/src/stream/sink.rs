use crate::ResponseHead;
use crate::StreamError;
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, StatusCode};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::trace;

/// The transport end of a response body.
///
/// The head is handed over with every call; the chain latches it as sent before the first call,
/// so a transport can serialize status and headers when it first sees them.
#[cfg_attr(test, mockall::automock)]
pub trait Sink {
    fn write(&mut self, head: &ResponseHead, bytes: Bytes) -> Result<(), StreamError>;

    fn end(&mut self, head: &ResponseHead) -> Result<(), StreamError>;
}

/// An in-memory sink. Clones share the same buffer, so one clone can be handed to a
/// [`Response`](crate::Response) and the other kept to inspect what was sent.
#[derive(Debug, Clone, Default)]
pub struct BufferSink {
    inner: Rc<RefCell<Buffer>>,
}

#[derive(Debug, Default)]
struct Buffer {
    chunks: Vec<Bytes>,
    status: Option<StatusCode>,
    headers: Option<HeaderMap>,
    ended: bool,
    closed: bool,
}

impl Buffer {
    fn capture_head(&mut self, head: &ResponseHead) {
        if self.status.is_none() {
            self.status = Some(head.status());
            self.headers = Some(head.headers().clone());
        }
    }
}

impl BufferSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every chunk received so far, in order.
    pub fn chunks(&self) -> Vec<Bytes> {
        self.inner.borrow().chunks.clone()
    }

    pub fn body(&self) -> Bytes {
        let inner = self.inner.borrow();
        let mut body = BytesMut::with_capacity(inner.chunks.iter().map(Bytes::len).sum());
        for chunk in &inner.chunks {
            body.extend_from_slice(chunk);
        }
        body.freeze()
    }

    pub fn is_ended(&self) -> bool {
        self.inner.borrow().ended
    }

    /// The status as it was when the head went out.
    pub fn sent_status(&self) -> Option<StatusCode> {
        self.inner.borrow().status
    }

    /// The headers as they were when the head went out.
    pub fn sent_headers(&self) -> Option<HeaderMap> {
        self.inner.borrow().headers.clone()
    }

    /// Simulates the peer going away: any later write or end is a fault.
    pub fn close(&self) {
        self.inner.borrow_mut().closed = true;
    }
}

impl Sink for BufferSink {
    fn write(&mut self, head: &ResponseHead, bytes: Bytes) -> Result<(), StreamError> {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return Err(StreamError::Closed);
        }
        inner.capture_head(head);
        trace!(len = bytes.len(), "buffer sink received chunk");
        inner.chunks.push(bytes);
        Ok(())
    }

    fn end(&mut self, head: &ResponseHead) -> Result<(), StreamError> {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return Err(StreamError::Closed);
        }
        inner.capture_head(head);
        inner.ended = true;
        Ok(())
    }
}
