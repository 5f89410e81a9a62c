//! Request routing.
//!
//! The router is assembled once per server instance from the enabled
//! default routes followed by the routes supplied by the [`Binder`]. Each
//! route is wrapped in its own [`Pipeline`]. Requests that match no route
//! go to one of three fallbacks, each routed through the response envelope
//! and individually replaceable:
//!
//! - not found (404)
//! - method not allowed (405, with an `Allow` header)
//! - panic (500), for handlers that panicked
//!
//! Paths support `{name}` segments capturing one segment and a trailing
//! `{*name}` segment capturing the rest of the path.
//!
//! [`Binder`]: crate::Binder

use crate::config::ServerConfig;
use crate::route::{Route, RouteInfo};
use crate::routes::{default_routes, status_handler, RouteListing};
use futures_util::FutureExt;
use http::header::{HeaderValue, ALLOW};
use http::{Method, StatusCode};
use portico_core::{envelope, BoxHandler, Request, RequestContext, Response};
use portico_middleware::{MiddlewareArgs, Pipeline, PipelineBuilder};
use std::any::Any;
use std::backtrace::Backtrace;
use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Handler for panics recovered from a route.
///
/// Receives the request context as it stood when the panic unwound.
pub type PanicHandler = Arc<dyn Fn(&RequestContext, Recovered) -> Response + Send + Sync>;

/// A panic recovered from a handler or middleware.
#[derive(Debug)]
pub struct Recovered {
    message: String,
    backtrace: String,
}

impl Recovered {
    fn new(payload: &(dyn Any + Send)) -> Self {
        let message = payload
            .downcast_ref::<&str>()
            .map(ToString::to_string)
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "Box<dyn Any>".to_string());
        Self {
            message,
            backtrace: Backtrace::force_capture().to_string(),
        }
    }

    /// Returns the panic message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the backtrace captured where the panic was recovered.
    #[must_use]
    pub fn backtrace(&self) -> &str {
        &self.backtrace
    }
}

/// Logs the panic with its stack trace and answers 500.
#[must_use]
pub fn default_panic_handler(ctx: &RequestContext, recovered: Recovered) -> Response {
    tracing::error!(
        trace_id = ctx.trace_id().unwrap_or_default(),
        panic = recovered.message(),
        stacktrace = recovered.backtrace(),
        "recovered from handler panic"
    );
    envelope::send_status(ctx, StatusCode::INTERNAL_SERVER_ERROR)
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PathSegment {
    Literal(String),
    Param(String),
    CatchAll(String),
}

fn parse_segments(pattern: &str) -> Vec<PathSegment> {
    pattern
        .split('/')
        .filter(|s| !s.is_empty())
        .map(|s| match s.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
            Some(name) => name.strip_prefix('*').map_or_else(
                || PathSegment::Param(name.to_string()),
                |rest| PathSegment::CatchAll(rest.to_string()),
            ),
            None => PathSegment::Literal(s.to_string()),
        })
        .collect()
}

fn match_segments(segments: &[PathSegment], path: &str) -> Option<HashMap<String, String>> {
    let actual: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
    let mut params = HashMap::new();

    for (index, segment) in segments.iter().enumerate() {
        match segment {
            PathSegment::CatchAll(name) => {
                let rest = actual.get(index..).map(|rest| rest.join("/")).unwrap_or_default();
                params.insert(name.clone(), rest);
                return Some(params);
            }
            PathSegment::Literal(expected) => {
                if actual.get(index) != Some(&expected.as_str()) {
                    return None;
                }
            }
            PathSegment::Param(name) => {
                let value = actual.get(index)?;
                params.insert(name.clone(), (*value).to_string());
            }
        }
    }

    (actual.len() == segments.len()).then_some(params)
}

struct RouteEntry {
    method: Method,
    segments: Vec<PathSegment>,
    pipeline: Pipeline,
}

enum Resolution<'r> {
    Found(&'r RouteEntry, HashMap<String, String>),
    NotAllowed(Vec<Method>),
    NotFound,
}

/// Routing table of one server instance.
pub struct Router {
    entries: Vec<RouteEntry>,
    listing: Vec<RouteInfo>,
    not_found: Pipeline,
    method_not_allowed: Pipeline,
    panic_handler: PanicHandler,
}

impl Router {
    /// Assembles the router from the enabled default routes followed by the
    /// bound routes.
    #[must_use]
    pub fn new(config: &ServerConfig, routes: Vec<Route>) -> Self {
        let listing_cell = RouteListing::default();
        let mut all = default_routes(config, &listing_cell);
        all.extend(routes);

        let listing: Vec<RouteInfo> = all.iter().map(Route::info).collect();
        // Only this router ever fills the cell, so the set cannot fail
        let _ = listing_cell.set(listing.clone());

        let entries = all
            .into_iter()
            .map(|route| RouteEntry {
                method: route.method().clone(),
                segments: parse_segments(route.path()),
                pipeline: route_pipeline(config, &route),
            })
            .collect();

        let not_found = fallback_pipeline(
            config,
            "not found",
            config
                .not_found_handler()
                .cloned()
                .unwrap_or_else(|| status_handler(StatusCode::NOT_FOUND)),
        );
        let method_not_allowed = fallback_pipeline(
            config,
            "method not allowed",
            config
                .method_not_allowed_handler()
                .cloned()
                .unwrap_or_else(|| status_handler(StatusCode::METHOD_NOT_ALLOWED)),
        );
        let panic_handler = config
            .panic_handler()
            .cloned()
            .unwrap_or_else(|| Arc::new(default_panic_handler));

        Self {
            entries,
            listing,
            not_found,
            method_not_allowed,
            panic_handler,
        }
    }

    /// Returns every bound route, defaults first.
    #[must_use]
    pub fn routes(&self) -> &[RouteInfo] {
        &self.listing
    }

    /// Dispatches a request to its route or to a fallback.
    ///
    /// Panics raised anywhere in the chain are recovered and answered by
    /// the panic handler.
    pub async fn dispatch(&self, mut ctx: RequestContext, request: Request) -> Response {
        let resolution = self.resolve(request.method(), request.uri().path());
        match resolution {
            Resolution::Found(entry, params) => {
                ctx.set_params(params);
                self.run(&entry.pipeline, ctx, request).await
            }
            Resolution::NotAllowed(allowed) => {
                let mut response = self.run(&self.method_not_allowed, ctx, request).await;
                let allow = allowed
                    .iter()
                    .map(Method::as_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                if let Ok(value) = HeaderValue::from_str(&allow) {
                    response.headers_mut().insert(ALLOW, value);
                }
                response
            }
            Resolution::NotFound => self.run(&self.not_found, ctx, request).await,
        }
    }

    fn resolve(&self, method: &Method, path: &str) -> Resolution<'_> {
        let mut allowed = Vec::new();
        for entry in &self.entries {
            if let Some(params) = match_segments(&entry.segments, path) {
                if entry.method == *method {
                    return Resolution::Found(entry, params);
                }
                if !allowed.contains(&entry.method) {
                    allowed.push(entry.method.clone());
                }
            }
        }

        if allowed.is_empty() {
            Resolution::NotFound
        } else {
            Resolution::NotAllowed(allowed)
        }
    }

    async fn run(&self, pipeline: &Pipeline, mut ctx: RequestContext, request: Request) -> Response {
        let method = request.method().clone();
        let path = request.uri().path().to_string();
        let outcome = AssertUnwindSafe(pipeline.process(&mut ctx, request))
            .catch_unwind()
            .await;
        match outcome {
            Ok(response) => response,
            Err(payload) => self.recover(pipeline.args(), &ctx, &method, &path, payload.as_ref()),
        }
    }

    /// Answers a panic inside a fresh request span; the logging stage's span
    /// is gone once the chain unwound.
    fn recover(
        &self,
        args: &MiddlewareArgs,
        ctx: &RequestContext,
        method: &Method,
        path: &str,
        payload: &(dyn Any + Send),
    ) -> Response {
        let trace_id = ctx.trace_id().unwrap_or_default();
        let span = tracing::error_span!(
            parent: args.span(),
            "http_request",
            trace_id,
            request_method = %method,
            request_path = path,
        );
        let mut response = span.in_scope(|| (self.panic_handler)(ctx, Recovered::new(payload)));

        let header = Some(trace_id)
            .filter(|id| !id.is_empty())
            .and_then(|id| HeaderValue::from_str(id).ok());
        if let Some(value) = header {
            response.headers_mut().insert(args.trace_header().clone(), value);
        }
        response
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("routes", &self.listing)
            .finish_non_exhaustive()
    }
}

fn middleware_args(config: &ServerConfig, method: Method, path: &str, description: &str) -> MiddlewareArgs {
    MiddlewareArgs::new(method, path, description)
        .with_trace_header(config.trace_header().clone())
        .with_redactor(Arc::clone(config.redactor()))
        .with_span(config.span().clone())
}

fn route_pipeline(config: &ServerConfig, route: &Route) -> Pipeline {
    let args = middleware_args(config, route.method().clone(), route.path(), route.description());
    PipelineBuilder::new(args)
        .logging(!config.is_logger_disabled() && !route.is_logger_disabled())
        .timeout(route.timeout().unwrap_or_else(|| config.request_timeout()))
        .global(config.middleware())
        .route(route.middleware())
        .build(Arc::clone(route.handler()))
}

/// Fallbacks get the logging stage only.
fn fallback_pipeline(config: &ServerConfig, description: &str, handler: BoxHandler) -> Pipeline {
    let args = middleware_args(config, Method::GET, "", description);
    PipelineBuilder::new(args)
        .logging(!config.is_logger_disabled())
        .timeout(Duration::ZERO)
        .build(handler)
}
