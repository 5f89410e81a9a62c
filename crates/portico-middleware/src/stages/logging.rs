//! Request logging middleware.
//!
//! The outermost built-in stage. For every request it:
//!
//! - takes the trace id from the configured trace header, or generates a
//!   UUID v7 when the header is absent or empty
//! - stores the trace id in the [`RequestContext`], on the request headers
//!   seen by inner stages, and on the response headers
//! - opens an `http_request` span carrying the trace id and request
//!   metadata, nested under the route's parent span
//! - when debug logging is active, captures a redacted dump of the raw
//!   request before the handler runs
//! - emits exactly one completion record after the handler returns, at
//!   debug level, or at info level when the timeout stage fired

use crate::args::MiddlewareArgs;
use crate::middleware::{Middleware, Next};
use crate::stages::timeout::TimedOut;
use chrono::{SecondsFormat, Utc};
use http::header::{HeaderValue, USER_AGENT};
use portico_core::{BoxFuture, Request, RequestContext, Response};
use std::fmt::Write as _;
use std::time::Instant;
use tracing::{Instrument, Level};
use uuid::Uuid;

const X_FORWARDED_FOR: &str = "x-forwarded-for";

/// Middleware attaching a trace id and a per-request span.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingMiddleware;

impl LoggingMiddleware {
    /// Creates the logging stage.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for LoggingMiddleware {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn process<'a>(
        &'a self,
        args: &'a MiddlewareArgs,
        ctx: &'a mut RequestContext,
        mut request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let started = Instant::now();
            let trace_id = trace_id_from(args, &request);
            ctx.set_trace_id(trace_id.clone());
            if let Ok(value) = HeaderValue::from_str(&trace_id) {
                request
                    .headers_mut()
                    .insert(args.trace_header().clone(), value);
            }

            let remote_address = ctx
                .remote_addr()
                .map(|addr| addr.to_string())
                .unwrap_or_default();
            let span = tracing::info_span!(
                parent: args.span(),
                "http_request",
                trace_id = %trace_id,
                request_method = %request.method(),
                request_path = request.uri().path(),
                request_query = request.uri().query().unwrap_or_default(),
                request_remote_address = %remote_address,
                request_user_agent = header_str(&request, USER_AGENT.as_str()),
                request_x_forwarded_for = header_str(&request, X_FORWARDED_FOR),
                request_time = %Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            );

            let request_dump = if tracing::enabled!(Level::DEBUG) {
                Some(args.redact(&dump_request(&request)))
            } else {
                None
            };

            let mut response = next.run(ctx, request).instrument(span.clone()).await;

            if let Ok(value) = HeaderValue::from_str(&trace_id) {
                response
                    .headers_mut()
                    .insert(args.trace_header().clone(), value);
            }

            let timed_out = response.extensions().get::<TimedOut>().is_some();
            let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            let response_code = response.status().as_u16();
            span.in_scope(|| {
                if timed_out {
                    tracing::info!(
                        request_dump = request_dump.as_deref(),
                        response_code,
                        duration_ms,
                        timed_out,
                        "request completed"
                    );
                } else {
                    tracing::debug!(
                        request_dump = request_dump.as_deref(),
                        response_code,
                        duration_ms,
                        "request completed"
                    );
                }
            });

            response
        })
    }
}

fn trace_id_from(args: &MiddlewareArgs, request: &Request) -> String {
    request
        .headers()
        .get(args.trace_header())
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map_or_else(|| Uuid::now_v7().to_string(), ToString::to_string)
}

fn header_str<'r>(request: &'r Request, name: &str) -> &'r str {
    request
        .headers()
        .get(name)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
}

/// Renders the request the way it appeared on the wire.
fn dump_request(request: &Request) -> String {
    let mut dump = format!(
        "{} {} {:?}\r\n",
        request.method(),
        request.uri(),
        request.version()
    );
    for (name, value) in request.headers() {
        let _ = write!(dump, "{}: {}\r\n", name, String::from_utf8_lossy(value.as_bytes()));
    }
    dump.push_str("\r\n");
    dump.push_str(&String::from_utf8_lossy(request.body()));
    dump
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PipelineBuilder;
    use crate::DEFAULT_TRACE_HEADER;
    use bytes::Bytes;
    use http::{Method, StatusCode};
    use http_body_util::Full;
    use portico_core::handler_fn;
    use std::time::Duration;

    fn echo_trace_pipeline(timeout: Duration) -> crate::Pipeline {
        PipelineBuilder::new(MiddlewareArgs::new(Method::GET, "/echo", "Echo trace id"))
            .timeout(timeout)
            .build(handler_fn(|ctx: RequestContext, req: Request| async move {
                let seen = req
                    .headers()
                    .get(DEFAULT_TRACE_HEADER)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string();
                let mut response = Response::new(Full::new(Bytes::from(seen.clone())));
                if ctx.trace_id() != Some(seen.as_str()) {
                    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
                }
                response
            }))
    }

    #[tokio::test]
    async fn test_propagates_incoming_trace_id() {
        let pipeline = echo_trace_pipeline(Duration::ZERO);
        let request = http::Request::builder()
            .uri("/echo")
            .header(DEFAULT_TRACE_HEADER, "trace-123")
            .body(Bytes::new())
            .unwrap();
        let mut ctx = RequestContext::new();

        let response = pipeline.process(&mut ctx, request).await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers().get(DEFAULT_TRACE_HEADER).unwrap(), "trace-123");
        assert_eq!(ctx.trace_id(), Some("trace-123"));
    }

    #[tokio::test]
    async fn test_generates_trace_id_when_absent() {
        let pipeline = echo_trace_pipeline(Duration::ZERO);
        let request = http::Request::builder().uri("/echo").body(Bytes::new()).unwrap();
        let mut ctx = RequestContext::new();

        let response = pipeline.process(&mut ctx, request).await;

        let header = response
            .headers()
            .get(DEFAULT_TRACE_HEADER)
            .unwrap()
            .to_str()
            .unwrap()
            .to_string();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(Uuid::parse_str(&header).is_ok());
        assert_eq!(ctx.trace_id(), Some(header.as_str()));
    }

    #[tokio::test]
    async fn test_empty_header_is_replaced() {
        let pipeline = echo_trace_pipeline(Duration::ZERO);
        let request = http::Request::builder()
            .uri("/echo")
            .header(DEFAULT_TRACE_HEADER, "")
            .body(Bytes::new())
            .unwrap();
        let mut ctx = RequestContext::new();

        pipeline.process(&mut ctx, request).await;

        assert!(ctx.trace_id().is_some_and(|id| !id.is_empty()));
    }

    #[test]
    fn test_dump_request() {
        let request = http::Request::builder()
            .method(Method::POST)
            .uri("/login?next=/home")
            .header("content-type", "application/json")
            .body(Bytes::from(r#"{"user":"bob"}"#))
            .unwrap();

        let dump = dump_request(&request);

        assert!(dump.starts_with("POST /login?next=/home HTTP/1.1\r\n"));
        assert!(dump.contains("content-type: application/json\r\n"));
        assert!(dump.ends_with("\r\n\r\n{\"user\":\"bob\"}"));
    }
}
