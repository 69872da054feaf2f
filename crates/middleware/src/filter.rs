use crate::{Flow, Middleware, MiddlewareError, Request, Response};
use http::{HeaderName, HeaderValue, Method};

/// A request predicate deciding whether a wrapped middleware runs, see [`filtered`].
pub trait Filter: Send + Sync {
    fn check(&self, req: &Request) -> bool;
}

struct FnFilter<F: Fn(&Request) -> bool>(F);

impl<F: Fn(&Request) -> bool + Send + Sync> Filter for FnFilter<F> {
    fn check(&self, req: &Request) -> bool {
        (self.0)(req)
    }
}

pub fn fn_filter<F>(f: F) -> impl Filter
where
    F: Fn(&Request) -> bool + Send + Sync,
{
    FnFilter(f)
}

pub fn always() -> TrueFilter {
    TrueFilter
}

pub fn always_no() -> FalseFilter {
    FalseFilter
}

#[derive(Debug)]
pub struct TrueFilter;
impl Filter for TrueFilter {
    #[inline]
    fn check(&self, _req: &Request) -> bool {
        true
    }
}

#[derive(Debug)]
pub struct FalseFilter;
impl Filter for FalseFilter {
    #[inline]
    fn check(&self, _req: &Request) -> bool {
        false
    }
}

pub fn any_filter() -> AnyFilter {
    AnyFilter::new()
}

/// compose filters with *OR* logic, if any inner filter success, the whole [`AnyFilter`] will success
pub struct AnyFilter {
    filters: Vec<Box<dyn Filter>>,
}

impl AnyFilter {
    fn new() -> Self {
        Self { filters: vec![] }
    }

    #[must_use]
    pub fn or<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl Filter for AnyFilter {
    fn check(&self, req: &Request) -> bool {
        if self.filters.is_empty() {
            return true;
        }

        self.filters.iter().any(|filter| filter.check(req))
    }
}

pub fn all_filter() -> AllFilter {
    AllFilter::new()
}

/// compose filters with *AND* logic, only if every inner filter success, the whole [`AllFilter`] will success
pub struct AllFilter {
    filters: Vec<Box<dyn Filter>>,
}

impl AllFilter {
    fn new() -> Self {
        Self { filters: vec![] }
    }

    #[must_use]
    pub fn and<F: Filter + 'static>(mut self, filter: F) -> Self {
        self.filters.push(Box::new(filter));
        self
    }
}

impl Filter for AllFilter {
    fn check(&self, req: &Request) -> bool {
        self.filters.iter().all(|filter| filter.check(req))
    }
}

#[derive(Debug)]
pub struct MethodFilter(Method);

impl Filter for MethodFilter {
    fn check(&self, req: &Request) -> bool {
        self.0.eq(req.method())
    }
}

#[inline]
pub fn method(method: Method) -> MethodFilter {
    MethodFilter(method)
}

macro_rules! method_filter {
    ($method:ident, $upper_case_method:ident) => {
        #[inline]
        pub fn $method() -> MethodFilter {
            MethodFilter(Method::$upper_case_method)
        }
    };
}

method_filter!(get_method, GET);
method_filter!(post_method, POST);
method_filter!(put_method, PUT);
method_filter!(delete_method, DELETE);
method_filter!(head_method, HEAD);
method_filter!(options_method, OPTIONS);
method_filter!(patch_method, PATCH);

/// Matches requests whose path starts with the given prefix.
#[derive(Debug)]
pub struct PathPrefixFilter(String);

impl Filter for PathPrefixFilter {
    fn check(&self, req: &Request) -> bool {
        req.uri().path().starts_with(&self.0)
    }
}

pub fn path_prefix<S: Into<String>>(prefix: S) -> PathPrefixFilter {
    PathPrefixFilter(prefix.into())
}

#[inline]
pub fn header(header_name: HeaderName, header_value: HeaderValue) -> HeaderFilter {
    HeaderFilter(header_name, header_value)
}

#[derive(Debug)]
pub struct HeaderFilter(HeaderName, HeaderValue);

impl Filter for HeaderFilter {
    fn check(&self, req: &Request) -> bool {
        req.headers().get(&self.0).is_some_and(|value| self.1.eq(value))
    }
}

/// Runs `middleware` only for requests accepted by `filter`; other requests pass through with
/// [`Flow::Continue`].
pub fn filtered<M: Middleware, F: Filter>(middleware: M, filter: F) -> Filtered<M, F> {
    Filtered { middleware, filter }
}

#[derive(Debug)]
pub struct Filtered<M, F> {
    middleware: M,
    filter: F,
}

impl<M: Middleware, F: Filter> Middleware for Filtered<M, F> {
    fn name(&self) -> &str {
        self.middleware.name()
    }

    fn handle(&self, req: &Request, res: &mut Response) -> Result<Flow, MiddlewareError> {
        if self.filter.check(req) {
            self.middleware.handle(req, res)
        } else {
            Ok(Flow::Continue)
        }
    }
}
