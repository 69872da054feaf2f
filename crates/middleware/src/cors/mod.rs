//! CORS decisions.
//!
//! A request without an `origin` header is not a CORS request and passes through untouched. An
//! `OPTIONS` request with an origin is a preflight and is answered right here: status 200, body
//! `OK`, and the pipeline ends. Any other request with an origin gets its allow headers and goes on.

mod options;

pub use options::CorsOptions;
pub use options::DEFAULT_ALLOW_METHODS;
pub use options::OriginMatcher;

use crate::{Flow, Middleware, MiddlewareError, Request, Response, ResponseHead};
use http::header::{
    ACCESS_CONTROL_ALLOW_CREDENTIALS, ACCESS_CONTROL_ALLOW_HEADERS, ACCESS_CONTROL_ALLOW_METHODS,
    ACCESS_CONTROL_ALLOW_ORIGIN, ACCESS_CONTROL_EXPOSE_HEADERS, ACCESS_CONTROL_MAX_AGE, ACCESS_CONTROL_REQUEST_HEADERS,
    ORIGIN,
};
use http::{HeaderValue, Method, StatusCode};
use std::sync::Arc;
use tracing::debug;

pub fn cors(options: CorsOptions) -> Cors {
    Cors { options: Arc::new(options) }
}

#[derive(Debug, Clone, Default)]
pub struct Cors {
    options: Arc<CorsOptions>,
}

impl Cors {
    /// The `access-control-allow-origin` value for `origin`, if any entry of the allow-list accepts it.
    fn allow_origin(&self, origin: &HeaderValue) -> Option<HeaderValue> {
        let Some(allow_origins) = &self.options.allow_origins else {
            return Some(HeaderValue::from_static("*"));
        };

        let raw = origin.to_str().ok();
        let matcher = allow_origins.iter().find(|matcher| match matcher {
            OriginMatcher::Any => true,
            other => raw.is_some_and(|raw| other.matches(raw)),
        })?;

        match matcher {
            OriginMatcher::Any => Some(HeaderValue::from_static("*")),
            _ => Some(origin.clone()),
        }
    }

    fn set_origin_headers(&self, origin: &HeaderValue, head: &mut ResponseHead) {
        match self.allow_origin(origin) {
            Some(value) => {
                head.insert_header(ACCESS_CONTROL_ALLOW_ORIGIN, value);
            }
            None => debug!(?origin, "origin not allowed"),
        }

        if self.options.allow_credentials {
            head.insert_header(ACCESS_CONTROL_ALLOW_CREDENTIALS, HeaderValue::from_static("true"));
        }
    }

    fn preflight(&self, req: &Request, res: &mut Response) -> Result<Flow, MiddlewareError> {
        let head = res.head_mut();

        let methods = match &self.options.allow_methods {
            Some(methods) => methods.join(","),
            None => DEFAULT_ALLOW_METHODS.join(","),
        };
        head.insert_header(ACCESS_CONTROL_ALLOW_METHODS, HeaderValue::try_from(methods)?);

        let allow_headers = match &self.options.allow_headers {
            Some(headers) => Some(HeaderValue::try_from(headers.join(","))?),
            None => req.headers().get(ACCESS_CONTROL_REQUEST_HEADERS).cloned(),
        };
        if let Some(allow_headers) = allow_headers {
            head.insert_header(ACCESS_CONTROL_ALLOW_HEADERS, allow_headers);
        }

        if let Some(max_age) = self.options.max_age {
            head.insert_header(ACCESS_CONTROL_MAX_AGE, HeaderValue::from(max_age));
        }

        head.set_status(StatusCode::OK);
        res.end_with("OK")?;
        Ok(Flow::End)
    }

    fn simple(&self, res: &mut Response) -> Result<Flow, MiddlewareError> {
        if let Some(expose_headers) = &self.options.expose_headers {
            let value = HeaderValue::try_from(expose_headers.join(","))?;
            res.head_mut().insert_header(ACCESS_CONTROL_EXPOSE_HEADERS, value);
        }
        Ok(Flow::Continue)
    }
}

impl Middleware for Cors {
    fn name(&self) -> &str {
        "cors"
    }

    fn handle(&self, req: &Request, res: &mut Response) -> Result<Flow, MiddlewareError> {
        let Some(origin) = req.headers().get(ORIGIN) else {
            debug!("not a cors request");
            return Ok(Flow::Continue);
        };

        self.set_origin_headers(origin, res.head_mut());

        if req.method() == Method::OPTIONS {
            debug!(?origin, "cors preflight");
            self.preflight(req, res)
        } else {
            debug!(?origin, "simple cors request");
            self.simple(res)
        }
    }
}
