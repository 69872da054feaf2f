//! Synchronous HTTP middleware runtime.
//!
//! A [`Pipeline`] runs an ordered list of [`Middleware`] over a shared `{req, res}` pair. Each
//! middleware may edit response headers, end the pipeline early, or install a body transform with
//! [`Response::replace_stream`]. Body bytes keep flowing through the installed
//! [`stream`](crate::stream) chain after the pipeline has returned, driven by the transport.
//!
//! Bundled middleware:
//! - [`cors::cors`]: CORS decisions, answering preflight requests itself
//! - [`transcode::transcoder`]: turns text and structured chunks into bytes
//! - [`encoding::compression`]: gzip/deflate response compression
//! - [`content_length`]: buffers the body to announce its length

mod content_length;
mod error;
mod pipeline;
mod response;

pub mod cookie;
pub mod cors;
pub mod encoding;
pub mod filter;
pub mod stream;
pub mod transcode;

pub use content_length::ContentLength;
pub use content_length::content_length;
pub use cookie::Cookie;
pub use cookie::SameSite;
pub use error::CookieError;
pub use error::MiddlewareError;
pub use error::StreamError;
pub use error::TranscodeError;
pub use pipeline::Flow;
pub use pipeline::Middleware;
pub use pipeline::Pipeline;
pub use pipeline::PipelineBuilder;
pub use pipeline::fn_middleware;
pub use response::Response;
pub use response::ResponseHead;

/// The request half of the pair every middleware sees. Its body is already fully read.
pub type Request = http::Request<bytes::Bytes>;
