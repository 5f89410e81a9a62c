//! Prometheus metrics.
//!
//! | Metric                             | Type      | Labels                     |
//! |------------------------------------|-----------|----------------------------|
//! | `portico_requests_total`           | Counter   | `method`, `path`, `status` |
//! | `portico_request_duration_seconds` | Histogram | `method`, `path`           |
//! | `portico_in_flight_requests`       | Gauge     | -                          |
//!
//! `path` is the route pattern (`/orders/{id}`), never the raw request path,
//! so the label set stays bounded.
//!
//! # Example
//!
//! ```rust,ignore
//! use portico_server::{DefaultRoute, ServerConfig};
//! use portico_telemetry::metrics::{install_recorder, InstrumentMiddleware, MetricsConfig, MetricsHandler};
//! use std::sync::Arc;
//!
//! let handle = install_recorder(&MetricsConfig::default())?;
//! let builder = ServerConfig::builder()
//!     .enable_default_routes(&[DefaultRoute::Metrics])
//!     .default_route_handler(DefaultRoute::Metrics, Arc::new(MetricsHandler::new(handle)))
//!     .middleware(Arc::new(InstrumentMiddleware::new()));
//! ```

use crate::error::TelemetryError;
use crate::TelemetryResult;
use http::StatusCode;
use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle, PrometheusRecorder};
use portico_core::{envelope, BoxFuture, Handler, Request, RequestContext, Response};
use portico_middleware::{Middleware, MiddlewareArgs, Next};
use std::time::{Duration, Instant};

/// Request counter.
pub const REQUESTS_TOTAL: &str = "portico_requests_total";

/// Request latency histogram.
pub const REQUEST_DURATION_SECONDS: &str = "portico_request_duration_seconds";

/// Requests being processed.
pub const IN_FLIGHT_REQUESTS: &str = "portico_in_flight_requests";

/// Metrics configuration.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    /// Histogram buckets for request duration, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

fn builder(config: &MetricsConfig) -> TelemetryResult<PrometheusBuilder> {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION_SECONDS.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Installs the global Prometheus recorder and returns its render handle.
///
/// # Errors
///
/// Returns [`TelemetryError::MetricsInit`] if the buckets are empty or a
/// global recorder is already installed.
pub fn install_recorder(config: &MetricsConfig) -> TelemetryResult<PrometheusHandle> {
    let handle = builder(config)?
        .install_recorder()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    describe_metrics();
    Ok(handle)
}

/// Builds a recorder without installing it.
///
/// # Errors
///
/// Returns [`TelemetryError::MetricsInit`] if the buckets are empty.
pub fn build_recorder(config: &MetricsConfig) -> TelemetryResult<PrometheusRecorder> {
    Ok(builder(config)?.build_recorder())
}

fn describe_metrics() {
    describe_counter!(REQUESTS_TOTAL, "Total number of HTTP requests processed");
    describe_histogram!(REQUEST_DURATION_SECONDS, "HTTP request duration in seconds");
    describe_gauge!(IN_FLIGHT_REQUESTS, "Number of HTTP requests currently being processed");
}

/// Records a completed request.
pub fn record_request(method: &str, path: &str, status: StatusCode, duration: Duration) {
    counter!(
        REQUESTS_TOTAL,
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status.as_u16().to_string()
    )
    .increment(1);

    histogram!(
        REQUEST_DURATION_SECONDS,
        "method" => method.to_string(),
        "path" => path.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Keeps the in-flight gauge raised while alive, including across unwinds.
struct InFlightGuard;

impl InFlightGuard {
    fn new() -> Self {
        gauge!(IN_FLIGHT_REQUESTS).increment(1.0);
        Self
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        gauge!(IN_FLIGHT_REQUESTS).decrement(1.0);
    }
}

/// Global middleware recording the request metrics of every route.
#[derive(Debug, Clone, Copy, Default)]
pub struct InstrumentMiddleware;

impl InstrumentMiddleware {
    /// Creates the middleware.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl Middleware for InstrumentMiddleware {
    fn name(&self) -> &'static str {
        "instrument"
    }

    fn process<'a>(
        &'a self,
        args: &'a MiddlewareArgs,
        ctx: &'a mut RequestContext,
        request: Request,
        next: Next<'a>,
    ) -> BoxFuture<'a, Response> {
        Box::pin(async move {
            let _in_flight = InFlightGuard::new();
            let started = Instant::now();

            let response = next.run(ctx, request).await;

            record_request(
                args.method().as_str(),
                args.path(),
                response.status(),
                started.elapsed(),
            );
            response
        })
    }
}

/// Handler for the metrics default route, rendering the Prometheus text
/// exposition format.
#[derive(Clone)]
pub struct MetricsHandler {
    handle: PrometheusHandle,
}

impl MetricsHandler {
    /// Creates a handler rendering `handle`.
    #[must_use]
    pub const fn new(handle: PrometheusHandle) -> Self {
        Self { handle }
    }
}

impl std::fmt::Debug for MetricsHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsHandler").finish_non_exhaustive()
    }
}

impl Handler for MetricsHandler {
    fn call(&self, ctx: RequestContext, _request: Request) -> BoxFuture<'static, Response> {
        let rendered = self.handle.render();
        Box::pin(async move { envelope::send_text(&ctx, StatusCode::OK, rendered) })
    }
}
