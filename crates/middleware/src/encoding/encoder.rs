use super::Writer;
use crate::stream::{Chunk, StageContext, Transform};
use crate::{MiddlewareError, StreamError};
use bytes::Bytes;
use flate2::Compression;
use flate2::write::{GzEncoder, ZlibEncoder};
use std::io;
use std::io::Write;
use tracing::{trace, warn};

/// Represents the supported content encodings.
pub(crate) enum Encoder {
    Gzip(GzEncoder<Writer>),
    Deflate(ZlibEncoder<Writer>),
}

impl Encoder {
    fn gzip(level: Compression) -> Self {
        Self::Gzip(GzEncoder::new(Writer::new(), level))
    }

    fn deflate(level: Compression) -> Self {
        Self::Deflate(ZlibEncoder::new(Writer::new(), level))
    }

    /// Selects an encoder from the `accept-encoding` value, preferring gzip. Codings listed with
    /// `q=0` are refused.
    pub(crate) fn select(accept_encodings: &str, level: Compression) -> Option<Self> {
        let accepted: Vec<String> = accept_encodings
            .split(',')
            .filter_map(|coding| {
                let mut params = coding.split(';');
                let name = params.next()?.trim().to_ascii_lowercase();
                let refused = params.any(|param| {
                    param.split_once('=').is_some_and(|(key, value)| {
                        key.trim().eq_ignore_ascii_case("q") && value.trim().parse::<f32>().is_ok_and(|q| q == 0.0)
                    })
                });
                (!name.is_empty() && !refused).then_some(name)
            })
            .collect();

        if accepted.iter().any(|name| name == "gzip") {
            Some(Self::gzip(level))
        } else if accepted.iter().any(|name| name == "deflate") {
            Some(Self::deflate(level))
        } else {
            None
        }
    }

    pub(crate) fn name(&self) -> &'static str {
        match self {
            Encoder::Gzip(_) => "gzip",
            Encoder::Deflate(_) => "deflate",
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), io::Error> {
        let result = match self {
            Self::Gzip(encoder) => encoder.write_all(data),
            Self::Deflate(encoder) => encoder.write_all(data),
        };
        result.inspect_err(|e| trace!(encoding = self.name(), cause = %e, "error encoding chunk"))
    }

    fn take(&mut self) -> Bytes {
        match self {
            Self::Gzip(encoder) => encoder.get_mut().take(),
            Self::Deflate(encoder) => encoder.get_mut().take(),
        }
    }

    fn finish(self) -> Result<Bytes, io::Error> {
        let writer = match self {
            Self::Gzip(encoder) => encoder.finish()?,
            Self::Deflate(encoder) => encoder.finish()?,
        };
        Ok(writer.buf.freeze())
    }
}

/// Compresses every chunk written into it and flushes the encoder trailer on finish.
pub(crate) struct EncodeStream {
    encoder: Option<Encoder>,
}

impl EncodeStream {
    pub(crate) fn new(encoder: Encoder) -> Self {
        Self { encoder: Some(encoder) }
    }
}

impl Transform for EncodeStream {
    fn transform(&mut self, chunk: Chunk, ctx: &mut StageContext<'_>) -> Result<(), MiddlewareError> {
        let data = match chunk {
            Chunk::Bytes(bytes) => bytes,
            Chunk::Text(text) => Bytes::from(text),
            Chunk::Json(_) => return Err(StreamError::invalid_chunk("structured chunk reached the compressor").into()),
        };

        let Some(encoder) = self.encoder.as_mut() else {
            warn!(stream = %ctx.id(), "chunk after the encoder finished");
            return Err(StreamError::WriteAfterEnd { id: ctx.id() }.into());
        };

        encoder.write(&data)?;
        let bytes = encoder.take();
        if !bytes.is_empty() {
            ctx.forward(bytes)?;
        }
        Ok(())
    }

    fn finish(&mut self, ctx: &mut StageContext<'_>) -> Result<(), MiddlewareError> {
        if let Some(encoder) = self.encoder.take() {
            let bytes = encoder.finish()?;
            trace!(len = bytes.len(), "encoder finished");
            if !bytes.is_empty() {
                ctx.forward(bytes)?;
            }
        }

        ctx.end_target()?;
        Ok(())
    }
}
