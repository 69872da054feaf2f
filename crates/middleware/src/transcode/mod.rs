//! Normalizes body chunks into bytes before they reach the transport.
//!
//! Raw bytes pass through, text is encoded with the charset declared by the response's
//! `content-type` (or a configured default), and structured values are serialized to JSON first.
//! Chunks that arrive after the body's logical end are held back and flushed, in arrival order
//! and at the pace the downstream stream accepts them, once the body physically completes.

mod charset;
mod content_type;

pub use charset::Charset;

use crate::stream::{Chunk, StageContext, Transform};
use crate::{Flow, Middleware, MiddlewareError, Request, Response, ResponseHead, TranscodeError};
use bytes::Bytes;
use content_type::{charset_param, with_charset, with_media_type};
use http::header::CONTENT_TYPE;
use http::{HeaderValue, Method};
use serde::Deserialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, trace, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TranscoderOptions {
    /// charset used when `content-type` declares none
    pub default_charset: String,
    /// write the default charset back into an existing `content-type` that declares none
    pub write_charset: bool,
    /// switch the media type to `application/json` when the first structured chunk shows up
    pub set_json_content_type: bool,
}

impl Default for TranscoderOptions {
    fn default() -> Self {
        Self { default_charset: Charset::Utf8.name().to_owned(), write_charset: false, set_json_content_type: false }
    }
}

pub fn transcoder(options: TranscoderOptions) -> Transcoder {
    Transcoder { options: Arc::new(options) }
}

/// Installs a [`Transform`] that turns every chunk into bytes. HEAD requests are left alone.
#[derive(Debug, Clone, Default)]
pub struct Transcoder {
    options: Arc<TranscoderOptions>,
}

impl Middleware for Transcoder {
    fn name(&self) -> &str {
        "transcoder"
    }

    fn handle(&self, req: &Request, res: &mut Response) -> Result<Flow, MiddlewareError> {
        if req.method() == Method::HEAD {
            trace!("head request, body left untouched");
            return Ok(Flow::Continue);
        }

        let target = res.replace_stream(TranscodeStream::new(Arc::clone(&self.options)));
        res.add_end_observer(res.front())?;
        debug!(stream = %res.front(), %target, "transcoder installed");

        Ok(Flow::Continue)
    }
}

/// Per-response transcoder state.
struct TranscodeStream {
    options: Arc<TranscoderOptions>,
    charset: Option<Charset>,
    json_type_set: bool,
    pending: VecDeque<Bytes>,
    flushing: bool,
}

impl TranscodeStream {
    fn new(options: Arc<TranscoderOptions>) -> Self {
        Self { options, charset: None, json_type_set: false, pending: VecDeque::new(), flushing: false }
    }

    /// Resolved once, on first need; later `content-type` edits don't change it.
    fn charset(&mut self, head: &mut ResponseHead) -> Charset {
        if let Some(charset) = self.charset {
            return charset;
        }

        let declared = head.header_str(CONTENT_TYPE).and_then(charset_param).map(Charset::from_label);
        let charset = match declared {
            Some(charset) => charset,
            None => {
                let label = &self.options.default_charset;
                if self.options.write_charset && !head.headers_sent() {
                    let updated = head.header_str(CONTENT_TYPE).map(|content_type| with_charset(content_type, label));
                    if let Some(updated) = updated {
                        set_content_type(head, updated);
                    }
                }
                Charset::from_label(label)
            }
        };

        trace!(charset = charset.name(), "charset resolved");
        self.charset = Some(charset);
        charset
    }

    fn set_json_content_type(&mut self, head: &mut ResponseHead) {
        if !self.options.set_json_content_type || self.json_type_set || head.headers_sent() {
            return;
        }

        self.json_type_set = true;
        let updated = with_media_type(head.header_str(CONTENT_TYPE).unwrap_or_default(), mime::APPLICATION_JSON.essence_str());
        set_content_type(head, updated);
    }

    fn encode(&mut self, chunk: Chunk, head: &mut ResponseHead) -> Result<Bytes, MiddlewareError> {
        match chunk {
            Chunk::Bytes(bytes) => Ok(bytes),
            Chunk::Text(text) => Ok(self.charset(head).encode(&text)),
            Chunk::Json(value) => {
                self.set_json_content_type(head);
                let text = serde_json::to_string(&value).map_err(TranscodeError::from)?;
                Ok(self.charset(head).encode(&text))
            }
        }
    }

    fn flush(&mut self, ctx: &mut StageContext<'_>) -> Result<(), MiddlewareError> {
        while let Some(bytes) = self.pending.pop_front() {
            let ready = ctx.forward(bytes)?;
            if !ready && !self.pending.is_empty() {
                trace!(pending = self.pending.len(), "target full, waiting for drain");
                ctx.wait_for_drain()?;
                return Ok(());
            }
        }

        self.flushing = false;
        ctx.end_target()?;
        Ok(())
    }
}

impl Transform for TranscodeStream {
    fn transform(&mut self, chunk: Chunk, ctx: &mut StageContext<'_>) -> Result<(), MiddlewareError> {
        let bytes = self.encode(chunk, ctx.head_mut())?;

        if ctx.has_end_called() {
            trace!(len = bytes.len(), "chunk after end, queued until finish");
            self.pending.push_back(bytes);
            return Ok(());
        }

        ctx.forward(bytes)?;
        Ok(())
    }

    fn finish(&mut self, ctx: &mut StageContext<'_>) -> Result<(), MiddlewareError> {
        self.flushing = true;
        self.flush(ctx)
    }

    fn drain(&mut self, ctx: &mut StageContext<'_>) -> Result<(), MiddlewareError> {
        if self.flushing { self.flush(ctx) } else { Ok(()) }
    }
}

fn set_content_type(head: &mut ResponseHead, value: String) {
    match HeaderValue::try_from(value) {
        Ok(value) => {
            head.insert_header(CONTENT_TYPE, value);
        }
        Err(e) => warn!(cause = %e, "content-type left unchanged"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::{BufferSink, EndState, StreamId};
    use serde_json::json;

    fn request(method: Method) -> Request {
        http::Request::builder().method(method).uri("/").body(Bytes::new()).unwrap()
    }

    fn response(content_type: Option<&'static str>) -> (Response, BufferSink) {
        let sink = BufferSink::new();
        let mut res = Response::new(sink.clone());
        if let Some(content_type) = content_type {
            res.head_mut().insert_header(CONTENT_TYPE, HeaderValue::from_static(content_type));
        }
        (res, sink)
    }

    fn install(options: TranscoderOptions, method: Method, res: &mut Response) {
        assert_eq!(transcoder(options).handle(&request(method), res).unwrap(), Flow::Continue);
    }

    #[test]
    fn test_head_request_untouched() {
        let (mut res, _sink) = response(Some("text/plain"));
        install(TranscoderOptions::default(), Method::HEAD, &mut res);

        assert_eq!(res.front(), StreamId::SINK);
        assert_eq!(res.streams().stream_count(), 1);
    }

    #[test]
    fn test_mixed_chunks_become_bytes() {
        let (mut res, sink) = response(Some("text/plain"));
        install(TranscoderOptions::default(), Method::GET, &mut res);

        res.write(Bytes::from_static(&[0xff, 0x00])).unwrap();
        res.write("é").unwrap();
        res.end_with(json!({"ok": true})).unwrap();
        res.run_until_idle().unwrap();

        assert_eq!(sink.body().as_ref(), b"\xff\x00\xc3\xa9{\"ok\":true}");
        assert!(sink.is_ended());
        assert_eq!(res.head().header_str(CONTENT_TYPE), Some("text/plain"));
    }

    #[test]
    fn test_declared_latin1() {
        let (mut res, sink) = response(Some("text/plain;charset=ISO-8859-1"));
        install(TranscoderOptions::default(), Method::GET, &mut res);

        res.end_with("café").unwrap();
        res.run_until_idle().unwrap();

        assert_eq!(sink.body().as_ref(), &[0x63, 0x61, 0x66, 0xe9]);
    }

    #[test]
    fn test_charset_cached_after_first_use() {
        let (mut res, sink) = response(Some("text/plain; charset=latin1"));
        install(TranscoderOptions::default(), Method::GET, &mut res);

        res.write("é").unwrap();
        res.step().unwrap();
        res.head_mut().insert_header(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        res.end_with("é").unwrap();
        res.run_until_idle().unwrap();

        assert_eq!(sink.body().as_ref(), &[0xe9, 0xe9]);
    }

    #[test]
    fn test_default_charset_written_back() {
        let (mut res, sink) = response(Some("text/html"));
        let options = TranscoderOptions { default_charset: "utf16le".into(), write_charset: true, ..Default::default() };
        install(options, Method::GET, &mut res);

        res.end_with("a").unwrap();
        res.run_until_idle().unwrap();

        assert_eq!(sink.body().as_ref(), &[0x61, 0x00]);
        let sent = sink.sent_headers().unwrap();
        assert_eq!(sent.get(CONTENT_TYPE).unwrap(), "text/html; charset=utf16le");
    }

    #[test]
    fn test_default_charset_not_written_without_option() {
        let (mut res, _sink) = response(Some("text/html"));
        install(TranscoderOptions::default(), Method::GET, &mut res);

        res.end_with("a").unwrap();
        res.run_until_idle().unwrap();

        assert_eq!(res.head().header_str(CONTENT_TYPE), Some("text/html"));
    }

    #[test]
    fn test_json_content_type_set_once() {
        let (mut res, sink) = response(Some("text/plain; charset=utf-8"));
        let options = TranscoderOptions { set_json_content_type: true, ..Default::default() };
        install(options, Method::GET, &mut res);

        res.write(json!([1, 2])).unwrap();
        res.step().unwrap();
        assert_eq!(res.head().header_str(CONTENT_TYPE), Some("application/json; charset=utf-8"));

        // a later edit sticks, the media type is only forced once
        res.head_mut().insert_header(CONTENT_TYPE, HeaderValue::from_static("application/x-ndjson"));
        res.end_with(json!({"a": "b"})).unwrap();
        res.run_until_idle().unwrap();

        assert_eq!(sink.body().as_ref(), b"[1,2]{\"a\":\"b\"}");
        assert_eq!(res.head().header_str(CONTENT_TYPE), Some("application/x-ndjson"));
    }

    #[test]
    fn test_json_content_type_after_headers_sent() {
        let (mut res, _sink) = response(Some("text/plain"));
        let options = TranscoderOptions { set_json_content_type: true, ..Default::default() };
        install(options, Method::GET, &mut res);

        res.write("first").unwrap();
        res.run_until_idle().unwrap();
        assert!(res.headers_sent());

        res.end_with(json!(1)).unwrap();
        res.run_until_idle().unwrap();
        assert_eq!(res.head().header_str(CONTENT_TYPE), Some("text/plain"));
    }

    #[test]
    fn test_late_chunk_flushed_before_end() {
        let (mut res, sink) = response(None);
        install(TranscoderOptions::default(), Method::GET, &mut res);
        let stream = res.front();

        res.write("a").unwrap();
        res.run_until_idle().unwrap();
        assert_eq!(sink.chunks(), vec![Bytes::from_static(b"a")]);

        res.write("b").unwrap();
        res.end().unwrap();
        assert!(res.has_end_called(stream));

        // "b" is delivered after the logical end and held back
        assert!(res.step().unwrap());
        assert_eq!(sink.chunks(), vec![Bytes::from_static(b"a")]);
        assert_eq!(res.end_state(stream), Some(EndState::EndRequested));

        res.run_until_idle().unwrap();
        assert_eq!(res.end_state(stream), Some(EndState::Finished));
        assert_eq!(sink.chunks(), vec![Bytes::from_static(b"a"), Bytes::from_static(b"b")]);
        assert!(sink.is_ended());
    }

    #[test]
    fn test_late_flush_waits_for_drain() {
        let (mut res, sink) = response(None);
        install(TranscoderOptions::default(), Method::GET, &mut res);
        res.set_high_water_mark(StreamId::SINK, 1).unwrap();

        for text in ["1", "2", "3", "4", "5"] {
            res.write(text).unwrap();
        }
        res.end().unwrap();

        // everything was written before the end got processed, so all five are flushed on finish
        let mut max_steps = 64;
        while res.step().unwrap() {
            max_steps -= 1;
            assert!(max_steps > 0);
        }

        let expected: Vec<Bytes> = [b"1", b"2", b"3", b"4", b"5"].into_iter().map(|b| Bytes::from_static(b)).collect();
        assert_eq!(sink.chunks(), expected);
        assert!(sink.is_ended());
    }

    #[test]
    fn test_malformed_base64_degrades() {
        let (mut res, sink) = response(Some("text/plain; charset=base64"));
        install(TranscoderOptions::default(), Method::GET, &mut res);

        res.write("***").unwrap();
        res.end_with("aGk*=").unwrap();
        res.run_until_idle().unwrap();

        assert_eq!(sink.body(), Bytes::from_static(b"hi"));
        assert!(sink.is_ended());
    }

    #[test]
    fn test_default_charset_not_written_without_content_type() {
        let (mut res, sink) = response(None);
        let options = TranscoderOptions { default_charset: "latin1".into(), write_charset: true, ..Default::default() };
        install(options, Method::GET, &mut res);

        res.end_with("é").unwrap();
        res.run_until_idle().unwrap();

        assert_eq!(sink.body().as_ref(), &[0xe9]);
        assert!(res.head().header_str(CONTENT_TYPE).is_none());
        assert!(sink.sent_headers().unwrap().get(CONTENT_TYPE).is_none());
    }

    #[test]
    fn test_options_from_json() {
        let options: TranscoderOptions = serde_json::from_value(json!({"writeCharset": true})).unwrap();
        assert!(options.write_charset);
        assert!(!options.set_json_content_type);
        assert_eq!(options.default_charset, "utf-8");
    }
}
