//! Per-route middleware metadata.

use crate::redact::default_redactor;
use http::header::HeaderName;
use http::Method;
use std::fmt;
use std::sync::Arc;
use tracing::Span;

/// Default header carrying the trace id.
pub const DEFAULT_TRACE_HEADER: &str = "x-request-id";

/// A function that masks sensitive data in a request or response dump.
pub type Redactor = Arc<dyn Fn(&str) -> String + Send + Sync>;

/// Immutable metadata handed to every middleware stage of a route.
///
/// Created once per route when the router is built and shared by all
/// requests hitting that route.
///
/// # Example
///
/// ```
/// use portico_middleware::MiddlewareArgs;
/// use http::Method;
///
/// let args = MiddlewareArgs::new(Method::GET, "/ping", "Ping this service");
/// assert_eq!(args.path(), "/ping");
/// assert_eq!(args.trace_header().as_str(), "x-request-id");
/// ```
#[derive(Clone)]
pub struct MiddlewareArgs {
    method: Method,
    path: String,
    description: String,
    trace_header: HeaderName,
    redactor: Redactor,
    span: Span,
}

impl MiddlewareArgs {
    /// Creates route metadata with the default trace header, the default
    /// redactor and no parent span.
    #[must_use]
    pub fn new(method: Method, path: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            description: description.into(),
            trace_header: HeaderName::from_static(DEFAULT_TRACE_HEADER),
            redactor: Arc::new(default_redactor),
            span: Span::none(),
        }
    }

    /// Sets the trace header name.
    #[must_use]
    pub fn with_trace_header(mut self, trace_header: HeaderName) -> Self {
        self.trace_header = trace_header;
        self
    }

    /// Sets the redaction function.
    #[must_use]
    pub fn with_redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    /// Sets the span every request span of this route is nested under.
    #[must_use]
    pub fn with_span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Returns the route method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the route path pattern.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the human readable route description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the trace header name.
    #[must_use]
    pub fn trace_header(&self) -> &HeaderName {
        &self.trace_header
    }

    /// Returns the parent span for request logging.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Applies the redaction function.
    #[must_use]
    pub fn redact(&self, dump: &str) -> String {
        (self.redactor)(dump)
    }
}

impl fmt::Debug for MiddlewareArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MiddlewareArgs")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("description", &self.description)
            .field("trace_header", &self.trace_header)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_defaults() {
        let args = MiddlewareArgs::new(Method::POST, "/orders", "Create an order");

        assert_eq!(args.method(), Method::POST);
        assert_eq!(args.description(), "Create an order");
        assert_eq!(args.trace_header(), DEFAULT_TRACE_HEADER);
    }

    #[test]
    fn test_custom_redactor() {
        let args = MiddlewareArgs::new(Method::GET, "/", "")
            .with_redactor(Arc::new(|_dump: &str| "***".to_string()));

        assert_eq!(args.redact("secret stuff"), "***");
    }

    #[test]
    fn test_custom_trace_header() {
        let args = MiddlewareArgs::new(Method::GET, "/", "")
            .with_trace_header(HeaderName::from_static("x-trace"));

        assert_eq!(args.trace_header().as_str(), "x-trace");
    }
}
