//! Timeout middleware.
//!
//! Bounds the rest of the chain with a hard deadline. When the deadline
//! elapses the pending handler future is dropped, so no further handler
//! output reaches the client, and a fixed `503 timeout` payload is sent
//! through the envelope instead.

use crate::args::MiddlewareArgs;
use crate::middleware::{Middleware, Next};
use http::StatusCode;
use portico_core::{envelope, BoxFuture, Request, RequestContext, Response};
use std::time::Duration;

/// Body of the response sent when the deadline elapses.
pub const TIMEOUT_MESSAGE: &str = "timeout";

/// Response extension marking a response produced by [`TimeoutMiddleware`].
///
/// The logging stage uses it to raise the completion record to info level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimedOut;

/// Middleware enforcing a per-route deadline.
#[derive(Debug, Clone, Copy)]
pub struct TimeoutMiddleware {
    timeout: Duration,
}

impl TimeoutMiddleware {
    /// Creates a timeout stage.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Returns the deadline.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }
}

impl Middleware for TimeoutMiddleware {
    fn name(&self) -> &'static str {
        "timeout"
    }

    fn process<'a>(
        &'a self,
        args: &'a MiddlewareArgs,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let outcome = tokio::time::timeout(self.timeout, next.run(ctx, request)).await;
            match outcome {
                Ok(response) => response,
                Err(_) => {
                    tracing::warn!(
                        route = args.path(),
                        timeout_ms = u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                        "handler deadline elapsed"
                    );
                    let mut response =
                        envelope::send_text(ctx, StatusCode::SERVICE_UNAVAILABLE, TIMEOUT_MESSAGE);
                    response.extensions_mut().insert(TimedOut);
                    response
                }
            }
        })
    }
}
