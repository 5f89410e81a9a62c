//! Terminal handler contract.
//!
//! Every route, default route and fallback ends in a [`Handler`]. Handlers
//! are stored type-erased as [`BoxHandler`] so heterogeneous handlers can
//! live in one routing table.

use crate::{BoxFuture, Request, RequestContext, Response};
use std::fmt;
use std::future::Future;
use std::sync::Arc;

/// A request handler.
///
/// Handlers receive an owned snapshot of the [`RequestContext`] (so the
/// returned future can be `'static`) together with the request.
///
/// # Example
///
/// ```
/// use portico_core::{envelope, BoxFuture, Handler, Request, RequestContext, Response};
/// use http::StatusCode;
///
/// struct Pong;
///
/// impl Handler for Pong {
///     fn call(&self, ctx: RequestContext, _request: Request) -> BoxFuture<'static, Response> {
///         Box::pin(async move { envelope::send_text(&ctx, StatusCode::OK, "pong") })
///     }
/// }
/// ```
pub trait Handler: Send + Sync + 'static {
    /// Handles a request and produces a response.
    fn call(&self, ctx: RequestContext, request: Request) -> BoxFuture<'static, Response>;
}

/// A shared, type-erased handler.
pub type BoxHandler = Arc<dyn Handler>;

/// A handler built from an async function or closure.
///
/// Created by [`handler_fn`].
pub struct FnHandler<F> {
    func: F,
}

impl<F> fmt::Debug for FnHandler<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHandler").finish_non_exhaustive()
    }
}

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn call(&self, ctx: RequestContext, request: Request) -> BoxFuture<'static, Response> {
        Box::pin((self.func)(ctx, request))
    }
}

/// Wraps an async function or closure into a [`BoxHandler`].
///
/// # Example
///
/// ```
/// use portico_core::{envelope, handler_fn};
/// use http::StatusCode;
///
/// let handler = handler_fn(|ctx, _req| async move {
///     envelope::send_status(&ctx, StatusCode::NO_CONTENT)
/// });
/// ```
pub fn handler_fn<F, Fut>(func: F) -> BoxHandler
where
    F: Fn(RequestContext, Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(FnHandler { func })
}
