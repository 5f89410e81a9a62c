//! Route definitions and the binder contract.

use crate::config::ServerConfig;
use http::Method;
use portico_core::BoxHandler;
use portico_middleware::BoxedMiddleware;
use serde::Serialize;
use std::fmt;
use std::time::Duration;

/// A route bound by the application.
///
/// Method and path pairs are expected to be unique; the router does not
/// detect duplicates and the first registered route wins.
///
/// # Example
///
/// ```rust
/// use portico_core::{envelope, handler_fn};
/// use portico_server::Route;
/// use http::StatusCode;
/// use std::time::Duration;
///
/// let route = Route::get("/orders/{id}", "Fetch one order", handler_fn(|ctx, _req| async move {
///     let id = ctx.param("id").unwrap_or_default().to_string();
///     envelope::send_text(&ctx, StatusCode::OK, id)
/// }))
/// .with_timeout(Duration::from_secs(2));
///
/// assert_eq!(route.path(), "/orders/{id}");
/// ```
#[derive(Clone)]
pub struct Route {
    method: Method,
    path: String,
    description: String,
    handler: BoxHandler,
    middleware: Vec<BoxedMiddleware>,
    timeout: Option<Duration>,
    logger_disabled: bool,
}

impl Route {
    /// Creates a route.
    ///
    /// Path segments written `{name}` capture one segment; a final
    /// `{*name}` segment captures the rest of the path.
    #[must_use]
    pub fn new(
        method: Method,
        path: impl Into<String>,
        description: impl Into<String>,
        handler: BoxHandler,
    ) -> Self {
        Self {
            method,
            path: path.into(),
            description: description.into(),
            handler,
            middleware: Vec::new(),
            timeout: None,
            logger_disabled: false,
        }
    }

    /// Creates a GET route.
    #[must_use]
    pub fn get(path: impl Into<String>, description: impl Into<String>, handler: BoxHandler) -> Self {
        Self::new(Method::GET, path, description, handler)
    }

    /// Creates a POST route.
    #[must_use]
    pub fn post(path: impl Into<String>, description: impl Into<String>, handler: BoxHandler) -> Self {
        Self::new(Method::POST, path, description, handler)
    }

    /// Appends route-specific middleware, run closest to the handler.
    #[must_use]
    pub fn with_middleware(mut self, middleware: BoxedMiddleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Overrides the server's request timeout for this route. Zero disables it.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Disables request logging for this route.
    #[must_use]
    pub fn without_logger(mut self) -> Self {
        self.logger_disabled = true;
        self
    }

    /// Returns the method.
    #[must_use]
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the path pattern.
    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Returns the description.
    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Returns the handler.
    #[must_use]
    pub fn handler(&self) -> &BoxHandler {
        &self.handler
    }

    /// Returns the route-specific middleware.
    #[must_use]
    pub fn middleware(&self) -> &[BoxedMiddleware] {
        &self.middleware
    }

    /// Returns the timeout override, if any.
    #[must_use]
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Returns `true` if request logging is disabled for this route.
    #[must_use]
    pub fn is_logger_disabled(&self) -> bool {
        self.logger_disabled
    }

    /// Returns the listing entry of this route.
    #[must_use]
    pub fn info(&self) -> RouteInfo {
        RouteInfo {
            method: self.method.to_string(),
            path: self.path.clone(),
            description: self.description.clone(),
        }
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("description", &self.description)
            .field("middleware", &self.middleware.len())
            .field("timeout", &self.timeout)
            .field("logger_disabled", &self.logger_disabled)
            .finish_non_exhaustive()
    }
}

/// A route as listed by the index route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RouteInfo {
    /// HTTP method.
    pub method: String,
    /// Path pattern.
    pub path: String,
    /// Description.
    pub description: String,
}

/// Supplies the application's routes.
///
/// Implemented for every `Fn(&ServerConfig) -> Vec<Route>`.
pub trait Binder: Send + Sync {
    /// Returns the routes to bind.
    fn bind(&self, config: &ServerConfig) -> Vec<Route>;
}

impl<F> Binder for F
where
    F: Fn(&ServerConfig) -> Vec<Route> + Send + Sync,
{
    fn bind(&self, config: &ServerConfig) -> Vec<Route> {
        self(config)
    }
}
