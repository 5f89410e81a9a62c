//! Per-route middleware pipeline.
//!
//! A [`Pipeline`] is assembled once per route when the router is built and
//! then shared by every request hitting that route. The effective stage list
//! is:
//!
//! 1. **Logging** - unless disabled globally or for the route
//! 2. **Timeout** - when the effective timeout is greater than zero
//! 3. **Global** - caller-supplied, in configured order
//! 4. **Route** - route-specific, closest to the handler

use crate::args::MiddlewareArgs;
use crate::middleware::{Middleware, Next};
use crate::stages::{LoggingMiddleware, TimeoutMiddleware};
use portico_core::{BoxHandler, Request, RequestContext, Response};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A type-erased middleware that can be stored in a vector.
pub type BoxedMiddleware = Arc<dyn Middleware>;

/// An ordered middleware chain wrapped around one terminal handler.
///
/// # Example
///
/// ```
/// use portico_core::{envelope, handler_fn};
/// use portico_middleware::{MiddlewareArgs, PipelineBuilder};
/// use http::{Method, StatusCode};
/// use std::time::Duration;
///
/// let args = MiddlewareArgs::new(Method::GET, "/ping", "Ping this service");
/// let pipeline = PipelineBuilder::new(args)
///     .logging(true)
///     .timeout(Duration::from_secs(5))
///     .build(handler_fn(|ctx, _req| async move {
///         envelope::send_status(&ctx, StatusCode::OK)
///     }));
///
/// assert_eq!(pipeline.stage_names(), vec!["logging", "timeout"]);
/// ```
pub struct Pipeline {
    args: Arc<MiddlewareArgs>,
    stages: Vec<BoxedMiddleware>,
    handler: BoxHandler,
}

impl Pipeline {
    /// Processes a request through every stage and the handler.
    pub async fn process(&self, ctx: &mut RequestContext, request: Request) -> Response {
        let next = self.build_chain();
        next.run(ctx, request).await
    }

    /// Builds the chain from back to front so the first stage is outermost.
    fn build_chain(&self) -> Next<'_> {
        let mut next = Next::handler(self.handler.as_ref());
        for middleware in self.stages.iter().rev() {
            next = Next::new(middleware.as_ref(), &self.args, next);
        }
        next
    }

    /// Returns the names of all stages in order.
    #[must_use]
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|mw| mw.name()).collect()
    }

    /// Returns the route metadata shared by all stages.
    #[must_use]
    pub fn args(&self) -> &MiddlewareArgs {
        &self.args
    }
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("args", &self.args)
            .field("stages", &self.stage_names())
            .finish_non_exhaustive()
    }
}

/// Builder for constructing a [`Pipeline`].
pub struct PipelineBuilder {
    args: MiddlewareArgs,
    logging: bool,
    timeout: Duration,
    global: Vec<BoxedMiddleware>,
    route: Vec<BoxedMiddleware>,
}

impl PipelineBuilder {
    /// Creates a builder with logging enabled and no timeout.
    #[must_use]
    pub fn new(args: MiddlewareArgs) -> Self {
        Self {
            args,
            logging: true,
            timeout: Duration::ZERO,
            global: Vec::new(),
            route: Vec::new(),
        }
    }

    /// Includes or excludes the logging stage.
    #[must_use]
    pub fn logging(mut self, enabled: bool) -> Self {
        self.logging = enabled;
        self
    }

    /// Sets the effective timeout. Zero disables the timeout stage.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Appends global middleware, in order.
    #[must_use]
    pub fn global(mut self, middleware: &[BoxedMiddleware]) -> Self {
        self.global.extend(middleware.iter().cloned());
        self
    }

    /// Appends route-specific middleware, in order.
    #[must_use]
    pub fn route(mut self, middleware: &[BoxedMiddleware]) -> Self {
        self.route.extend(middleware.iter().cloned());
        self
    }

    /// Assembles the pipeline around the terminal handler.
    #[must_use]
    pub fn build(self, handler: BoxHandler) -> Pipeline {
        let mut stages: Vec<BoxedMiddleware> = Vec::new();
        if self.logging {
            stages.push(Arc::new(LoggingMiddleware::new()));
        }
        if !self.timeout.is_zero() {
            stages.push(Arc::new(TimeoutMiddleware::new(self.timeout)));
        }
        stages.extend(self.global);
        stages.extend(self.route);

        Pipeline {
            args: Arc::new(self.args),
            stages,
            handler,
        }
    }
}

impl fmt::Debug for PipelineBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineBuilder")
            .field("args", &self.args)
            .field("logging", &self.logging)
            .field("timeout", &self.timeout)
            .field("global", &self.global.len())
            .field("route", &self.route.len())
            .finish()
    }
}
