use crate::{MiddlewareError, Request, Response};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, trace};

/// What a middleware tells the pipeline once it returns.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Flow {
    /// run the next middleware
    Continue,
    /// stop here, the response is final
    End,
}

impl Flow {
    #[inline]
    pub fn is_end(self) -> bool {
        matches!(self, Flow::End)
    }
}

/// A request/response transform run by a [`Pipeline`].
///
/// Options are bound at construction time; `handle` sees the shared `{req, res}` pair and may edit
/// headers, install a body stream, or end the pipeline. Returning an error aborts the pipeline.
pub trait Middleware: Send + Sync {
    fn name(&self) -> &str {
        std::any::type_name::<Self>()
    }

    fn handle(&self, req: &Request, res: &mut Response) -> Result<Flow, MiddlewareError>;
}

impl<M: Middleware + ?Sized> Middleware for Box<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn handle(&self, req: &Request, res: &mut Response) -> Result<Flow, MiddlewareError> {
        (**self).handle(req, res)
    }
}

impl<M: Middleware + ?Sized> Middleware for Arc<M> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn handle(&self, req: &Request, res: &mut Response) -> Result<Flow, MiddlewareError> {
        (**self).handle(req, res)
    }
}

struct FnMiddleware<F> {
    name: &'static str,
    f: F,
}

impl<F> Middleware for FnMiddleware<F>
where
    F: Fn(&Request, &mut Response) -> Result<Flow, MiddlewareError> + Send + Sync,
{
    fn name(&self) -> &str {
        self.name
    }

    fn handle(&self, req: &Request, res: &mut Response) -> Result<Flow, MiddlewareError> {
        (self.f)(req, res)
    }
}

pub fn fn_middleware<F>(name: &'static str, f: F) -> impl Middleware
where
    F: Fn(&Request, &mut Response) -> Result<Flow, MiddlewareError> + Send + Sync,
{
    FnMiddleware { name, f }
}

/// An ordered list of middleware run over one request.
///
/// Each middleware runs strictly after the previous one returned [`Flow::Continue`]. The first
/// [`Flow::End`] stops the run, and the first error is returned as is: nothing is retried, skipped
/// or cleaned up.
pub struct Pipeline {
    inner: Vec<Box<dyn Middleware>>,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.iter().map(|m| m.name())).finish()
    }
}

impl Pipeline {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::new()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn execute(&self, req: &Request, res: &mut Response) -> Result<Flow, MiddlewareError> {
        for middleware in &self.inner {
            let flow = middleware.handle(req, res).inspect_err(|e| {
                error!(middleware = middleware.name(), cause = %e, "middleware failed");
            })?;

            match flow {
                Flow::Continue => trace!(middleware = middleware.name(), "continue"),
                Flow::End => {
                    debug!(middleware = middleware.name(), "pipeline ended early");
                    return Ok(Flow::End);
                }
            }
        }

        Ok(Flow::Continue)
    }
}

impl Middleware for Pipeline {
    fn name(&self) -> &str {
        "pipeline"
    }

    fn handle(&self, req: &Request, res: &mut Response) -> Result<Flow, MiddlewareError> {
        self.execute(req, res)
    }
}

#[derive(Default)]
pub struct PipelineBuilder {
    inner: Vec<Box<dyn Middleware>>,
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.inner.iter().map(|m| m.name())).finish()
    }
}

impl PipelineBuilder {
    fn new() -> Self {
        Self { inner: vec![] }
    }

    pub fn add_last<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.inner.push(Box::new(middleware));
        self
    }

    pub fn add_first<M: Middleware + 'static>(mut self, middleware: M) -> Self {
        self.inner.insert(0, Box::new(middleware));
        self
    }

    pub fn build(self) -> Pipeline {
        Pipeline { inner: self.inner }
    }
}
