//! Core middleware trait and types.
//!
//! This module defines the [`Middleware`] trait that all middleware stages
//! implement. A stage observes the request before the rest of the chain and
//! the response after it.
//!
//! # Example
//!
//! ```
//! use portico_core::{BoxFuture, Request, RequestContext, Response};
//! use portico_middleware::{Middleware, MiddlewareArgs, Next};
//!
//! struct Audit;
//!
//! impl Middleware for Audit {
//!     fn name(&self) -> &'static str {
//!         "audit"
//!     }
//!
//!     fn process<'a>(
//!         &'a self,
//!         args: &'a MiddlewareArgs,
//!         ctx: &'a mut RequestContext,
//!         request: Request,
//!         next: Next<'a>,
//!     ) -> BoxFuture<'a, Response> {
//!         Box::pin(async move {
//!             tracing::info!(route = args.path(), "audit: before");
//!             let response = next.run(ctx, request).await;
//!             tracing::info!(status = response.status().as_u16(), "audit: after");
//!             response
//!         })
//!     }
//! }
//! ```

use crate::args::MiddlewareArgs;
use crate::pipeline::BoxedMiddleware;
use portico_core::{BoxFuture, Handler, Request, RequestContext, Response};
use std::fmt;
use std::sync::Arc;

/// The core middleware trait.
///
/// # Invariants
///
/// - Middleware MUST call `next.run()` at most once
/// - Not calling it short-circuits the chain; the stage then returns its
///   own response
pub trait Middleware: Send + Sync + 'static {
    /// Returns the name of this stage, used in logs and diagnostics.
    fn name(&self) -> &'static str;

    /// Processes the request through this stage.
    ///
    /// # Arguments
    ///
    /// * `args` - The immutable route metadata
    /// * `ctx` - The mutable request context
    /// * `request` - The incoming HTTP request
    /// * `next` - Callback to invoke the rest of the chain
    fn process<'a>(
        &'a self,
        args: &'a MiddlewareArgs,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response>;
}

/// Callback to invoke the next middleware in the chain.
///
/// Consumed on use so the rest of the chain runs at most once.
pub struct Next<'a> {
    inner: NextInner<'a>,
}

enum NextInner<'a> {
    /// More middleware to process
    Chain {
        middleware: &'a dyn Middleware,
        args: &'a MiddlewareArgs,
        next: Box<Next<'a>>,
    },
    /// End of chain
    Handler(&'a dyn Handler),
}

impl<'a> Next<'a> {
    /// Creates a `Next` that invokes the given middleware.
    pub(crate) fn new(middleware: &'a dyn Middleware, args: &'a MiddlewareArgs, next: Self) -> Self {
        Self {
            inner: NextInner::Chain {
                middleware,
                args,
                next: Box::new(next),
            },
        }
    }

    /// Creates a terminal `Next` that invokes the handler.
    pub(crate) fn handler(handler: &'a dyn Handler) -> Self {
        Self {
            inner: NextInner::Handler(handler),
        }
    }

    /// Invokes the next middleware or the handler.
    ///
    /// The handler receives a snapshot of the context as it stands after
    /// every stage before it ran.
    pub async fn run(self, ctx: &mut RequestContext, request: Request) -> Response {
        match self.inner {
            NextInner::Chain {
                middleware,
                args,
                next,
            } => middleware.process(args, ctx, request, *next).await,
            NextInner::Handler(handler) => handler.call(ctx.clone(), request).await,
        }
    }
}

impl fmt::Debug for Next<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            NextInner::Chain { middleware, .. } => f
                .debug_struct("Next")
                .field("middleware", &middleware.name())
                .finish_non_exhaustive(),
            NextInner::Handler(_) => f.write_str("Next(handler)"),
        }
    }
}

/// A middleware built from a function.
///
/// Created by [`middleware_fn`].
pub struct FnMiddleware<F> {
    name: &'static str,
    func: F,
}

impl<F> FnMiddleware<F> {
    /// Creates a new function-based middleware.
    pub const fn new(name: &'static str, func: F) -> Self {
        Self { name, func }
    }
}

impl<F> fmt::Debug for FnMiddleware<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnMiddleware")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl<F> Middleware for FnMiddleware<F>
where
    F: for<'a> Fn(&'a MiddlewareArgs, &'a mut RequestContext, Request, Next<'a>) -> BoxFuture<'a, Response>
        + Send
        + Sync
        + 'static,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn process<'a>(
        &'a self,
        args: &'a MiddlewareArgs,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        (self.func)(args, ctx, request, next)
    }
}

/// Wraps a function into a shareable middleware.
///
/// # Example
///
/// ```
/// use portico_middleware::{middleware_fn, Middleware};
///
/// let stamp = middleware_fn("stamp", |_args, ctx, request, next| {
///     Box::pin(async move {
///         let mut response = next.run(ctx, request).await;
///         response
///             .headers_mut()
///             .insert("x-served-by", http::HeaderValue::from_static("portico"));
///         response
///     })
/// });
/// assert_eq!(stamp.name(), "stamp");
/// ```
pub fn middleware_fn<F>(name: &'static str, func: F) -> BoxedMiddleware
where
    F: for<'a> Fn(&'a MiddlewareArgs, &'a mut RequestContext, Request, Next<'a>) -> BoxFuture<'a, Response>
        + Send
        + Sync
        + 'static,
{
    Arc::new(FnMiddleware::new(name, func))
}
