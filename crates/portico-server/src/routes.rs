//! Default operational routes.
//!
//! | Route   | Path                | Built-in behaviour                              |
//! |---------|---------------------|-------------------------------------------------|
//! | index   | `/`                 | JSON listing of every bound route               |
//! | ip      | `/ip`               | public IP as text, 424 when the provider fails  |
//! | ping    | `/ping`             | bare 200                                        |
//! | status  | `/status`           | bare 200, replaceable by a health check         |
//! | metrics | `/metrics`          | 501 unless a metrics handler is injected        |
//! | pprof   | `/pprof/{*option}`  | runtime introspection, see [`crate::profiling`] |
//!
//! Every default route is disabled until enabled through the
//! [`ConfigBuilder`](crate::ConfigBuilder).

use crate::config::ServerConfig;
use crate::profiling::ProfilingHandler;
use crate::route::{Route, RouteInfo};
use http::StatusCode;
use portico_core::{envelope, handler_fn, BoxFuture, BoxHandler, Handler, ProviderError, Request, RequestContext, Response};
use serde::Serialize;
use std::fmt;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

/// The runtime's own operational endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DefaultRoute {
    /// Listing of every bound route.
    Index,
    /// Public IP of the host.
    Ip,
    /// Liveness check.
    Ping,
    /// Health check.
    Status,
    /// Metrics exposition.
    Metrics,
    /// Runtime introspection.
    Pprof,
}

impl DefaultRoute {
    /// Every default route, in routing order.
    pub const ALL: [Self; 6] = [
        Self::Index,
        Self::Ip,
        Self::Ping,
        Self::Status,
        Self::Metrics,
        Self::Pprof,
    ];

    /// Returns the route name, as accepted by [`FromStr`].
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Index => "index",
            Self::Ip => "ip",
            Self::Ping => "ping",
            Self::Status => "status",
            Self::Metrics => "metrics",
            Self::Pprof => "pprof",
        }
    }

    /// Returns the path pattern.
    #[must_use]
    pub const fn path(self) -> &'static str {
        match self {
            Self::Index => "/",
            Self::Ip => "/ip",
            Self::Ping => "/ping",
            Self::Status => "/status",
            Self::Metrics => "/metrics",
            Self::Pprof => "/pprof/{*option}",
        }
    }

    /// Returns the description shown by the index route.
    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Self::Index => "List all routes",
            Self::Ip => "Public IP address of this service",
            Self::Ping => "Ping this service",
            Self::Status => "Health status of this service",
            Self::Metrics => "Metrics of this service",
            Self::Pprof => "Runtime profiling data",
        }
    }
}

impl fmt::Display for DefaultRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DefaultRoute {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|route| route.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown default route '{s}'"))
    }
}

/// Supplies the externally visible address of the host.
pub trait IpProvider: Send + Sync + 'static {
    /// Resolves the public IP.
    fn public_ip(&self) -> BoxFuture<'static, Result<String, ProviderError>>;
}

struct FnIpProvider<F>(F);

impl<F, Fut> IpProvider for FnIpProvider<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, ProviderError>> + Send + 'static,
{
    fn public_ip(&self) -> BoxFuture<'static, Result<String, ProviderError>> {
        Box::pin((self.0)())
    }
}

/// Wraps an async function into an [`IpProvider`].
///
/// # Example
///
/// ```rust
/// use portico_server::ip_provider_fn;
///
/// let provider = ip_provider_fn(|| async { Ok("203.0.113.7".to_string()) });
/// ```
pub fn ip_provider_fn<F, Fut>(func: F) -> Arc<dyn IpProvider>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<String, ProviderError>> + Send + 'static,
{
    Arc::new(FnIpProvider(func))
}

/// Default public IP lookup service.
pub const DEFAULT_IP_PROVIDER_URL: &str = "https://api.ipify.org";

/// Looks up the public IP through an HTTP echo service.
#[derive(Debug, Clone)]
pub struct HttpIpProvider {
    client: reqwest::Client,
    url: String,
    timeout: Duration,
}

impl HttpIpProvider {
    /// Creates a provider querying [`DEFAULT_IP_PROVIDER_URL`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_url(DEFAULT_IP_PROVIDER_URL)
    }

    /// Creates a provider querying `url`, which must answer the bare IP.
    #[must_use]
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
            timeout: Duration::from_secs(10),
        }
    }

    /// Sets the lookup timeout.
    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

impl Default for HttpIpProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl IpProvider for HttpIpProvider {
    fn public_ip(&self) -> BoxFuture<'static, Result<String, ProviderError>> {
        let request = self.client.get(&self.url).timeout(self.timeout);
        Box::pin(async move {
            let response = request
                .send()
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;
            let status = response.status();
            if !status.is_success() {
                return Err(ProviderError::Status(status.as_u16()));
            }
            let body = response
                .text()
                .await
                .map_err(|e| ProviderError::Transport(e.to_string()))?;
            let ip = body.trim();
            if ip.is_empty() {
                return Err(ProviderError::InvalidPayload("empty body".to_string()));
            }
            Ok(ip.to_string())
        })
    }
}

/// Route listing filled in once the full route table is assembled.
pub(crate) type RouteListing = Arc<OnceLock<Vec<RouteInfo>>>;

#[derive(Serialize)]
struct IndexBody<'a> {
    routes: &'a [RouteInfo],
}

struct IndexHandler {
    listing: RouteListing,
}

impl Handler for IndexHandler {
    fn call(&self, ctx: RequestContext, _request: Request) -> BoxFuture<'static, Response> {
        let listing = Arc::clone(&self.listing);
        Box::pin(async move {
            let routes = listing.get().map_or(&[][..], Vec::as_slice);
            envelope::send_json(&ctx, StatusCode::OK, &IndexBody { routes })
        })
    }
}

struct IpHandler {
    provider: Arc<dyn IpProvider>,
}

impl Handler for IpHandler {
    fn call(&self, ctx: RequestContext, _request: Request) -> BoxFuture<'static, Response> {
        let lookup = self.provider.public_ip();
        Box::pin(async move {
            match lookup.await {
                Ok(ip) => envelope::send_text(&ctx, StatusCode::OK, ip),
                Err(e) => {
                    tracing::warn!(error = %e, trace_id = ctx.trace_id().unwrap_or_default(), "public IP lookup failed");
                    envelope::send_status(&ctx, StatusCode::FAILED_DEPENDENCY)
                }
            }
        })
    }
}

pub(crate) fn status_handler(status: StatusCode) -> BoxHandler {
    handler_fn(move |ctx, _req| async move { envelope::send_status(&ctx, status) })
}

/// Builds the enabled default routes, in routing order.
///
/// The index handler reads `listing`, which the router fills once every
/// route is known.
pub(crate) fn default_routes(config: &ServerConfig, listing: &RouteListing) -> Vec<Route> {
    config
        .default_routes()
        .into_iter()
        .map(|kind| {
            let handler = config
                .default_route_handler(kind)
                .cloned()
                .unwrap_or_else(|| builtin_handler(kind, config, listing));
            let route = Route::get(kind.path(), kind.description(), handler);
            if config.is_default_route_logger_disabled(kind) {
                route.without_logger()
            } else {
                route
            }
        })
        .collect()
}

fn builtin_handler(kind: DefaultRoute, config: &ServerConfig, listing: &RouteListing) -> BoxHandler {
    match kind {
        DefaultRoute::Index => Arc::new(IndexHandler {
            listing: Arc::clone(listing),
        }),
        DefaultRoute::Ip => Arc::new(IpHandler {
            provider: config
                .ip_provider()
                .cloned()
                .unwrap_or_else(|| Arc::new(HttpIpProvider::new())),
        }),
        DefaultRoute::Ping | DefaultRoute::Status => status_handler(StatusCode::OK),
        DefaultRoute::Metrics => status_handler(StatusCode::NOT_IMPLEMENTED),
        DefaultRoute::Pprof => Arc::new(ProfilingHandler::new()),
    }
}
