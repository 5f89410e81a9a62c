//! Server configuration.
//!
//! [`ConfigBuilder`] accumulates options with no side effects; every method
//! is a pure mutation applied in call order, so a later call wins.
//! [`ConfigBuilder::build`] runs the single validation pass and produces an
//! immutable [`ServerConfig`].
//!
//! # Example
//!
//! ```rust
//! use portico_server::{DefaultRoute, ServerConfig};
//! use std::time::Duration;
//!
//! let config = ServerConfig::builder()
//!     .address("127.0.0.1:8080")
//!     .shutdown_timeout(Duration::from_secs(10))
//!     .enable_default_routes(&[DefaultRoute::Ping, DefaultRoute::Status])
//!     .build()
//!     .unwrap();
//!
//! assert_eq!(config.address(), "127.0.0.1:8080");
//! assert!(config.is_default_route_enabled(DefaultRoute::Ping));
//! assert!(!config.is_default_route_enabled(DefaultRoute::Index));
//! ```

use crate::error::ConfigError;
use crate::router::PanicHandler;
use crate::routes::{DefaultRoute, IpProvider};
use crate::shutdown::{ShutdownSignal, WaitGroup};
use http::header::HeaderName;
use portico_core::BoxHandler;
use portico_middleware::{BoxedMiddleware, Redactor, DEFAULT_TRACE_HEADER};
use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::net::Ipv6Addr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::Span;

/// Default bind address: port 8017 on all interfaces.
pub const DEFAULT_ADDRESS: &str = ":8017";

/// Default request, read, write and header timeout in seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default shutdown timeout in seconds.
pub const DEFAULT_SHUTDOWN_TIMEOUT_SECS: u64 = 30;

/// PEM encoded certificate chain and private key.
#[derive(Clone, PartialEq, Eq)]
pub struct TlsConfig {
    cert_pem: Vec<u8>,
    key_pem: Vec<u8>,
}

impl TlsConfig {
    /// Creates TLS material from in-memory PEM data.
    #[must_use]
    pub fn from_pem(cert_pem: impl Into<Vec<u8>>, key_pem: impl Into<Vec<u8>>) -> Self {
        Self {
            cert_pem: cert_pem.into(),
            key_pem: key_pem.into(),
        }
    }

    /// Reads TLS material from PEM files.
    ///
    /// # Errors
    ///
    /// Returns an error if either file cannot be read.
    pub fn from_files(cert_path: impl AsRef<Path>, key_path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            cert_pem: std::fs::read(cert_path)?,
            key_pem: std::fs::read(key_path)?,
        })
    }

    /// Returns the PEM encoded certificate chain.
    #[must_use]
    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }

    /// Returns the PEM encoded private key.
    #[must_use]
    pub fn key_pem(&self) -> &[u8] {
        &self.key_pem
    }
}

impl fmt::Debug for TlsConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TlsConfig")
            .field("cert_pem", &format_args!("{} bytes", self.cert_pem.len()))
            .field("key_pem", &"[REDACTED]")
            .finish()
    }
}

/// Validated, immutable server configuration.
///
/// Use [`ServerConfig::builder()`] to construct instances.
#[derive(Clone)]
pub struct ServerConfig {
    address: String,
    host: String,
    port: u16,
    trace_header: HeaderName,
    request_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    header_timeout: Duration,
    shutdown_timeout: Duration,
    tls: Option<TlsConfig>,
    default_routes: BTreeSet<DefaultRoute>,
    default_route_handlers: HashMap<DefaultRoute, BoxHandler>,
    default_route_loggers_disabled: BTreeSet<DefaultRoute>,
    ip_provider: Option<Arc<dyn IpProvider>>,
    redactor: Redactor,
    middleware: Vec<BoxedMiddleware>,
    logger_disabled: bool,
    wait_group: WaitGroup,
    shutdown_signal: ShutdownSignal,
    span: Span,
    not_found_handler: Option<BoxHandler>,
    method_not_allowed_handler: Option<BoxHandler>,
    panic_handler: Option<PanicHandler>,
}

impl ServerConfig {
    /// Creates a configuration builder with default values.
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::new()
    }

    /// Creates a builder seeded from `PORTICO_*` environment variables.
    ///
    /// A `.env` file in the working directory is loaded first, when present.
    /// See [`ConfigBuilder::from_env`].
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] if a variable cannot be parsed.
    pub fn from_env() -> Result<ConfigBuilder, ConfigError> {
        let _ = dotenvy::dotenv();
        ConfigBuilder::from_env()
    }

    /// Returns the bind address as configured.
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Returns the host to bind, with brackets removed and an empty host
    /// replaced by the unspecified IPv4 address.
    #[must_use]
    pub fn bind_host(&self) -> &str {
        if self.host.is_empty() {
            "0.0.0.0"
        } else {
            &self.host
        }
    }

    /// Returns the port to bind.
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Returns the trace header name.
    #[must_use]
    pub fn trace_header(&self) -> &HeaderName {
        &self.trace_header
    }

    /// Returns the default per-route handler deadline. Zero disables it.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    /// Returns the deadline for reading a request body. Zero disables it.
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        self.read_timeout
    }

    /// Returns the deadline from request head to response. Zero disables it.
    #[must_use]
    pub fn write_timeout(&self) -> Duration {
        self.write_timeout
    }

    /// Returns the deadline for reading request headers. Zero disables it.
    #[must_use]
    pub fn header_timeout(&self) -> Duration {
        self.header_timeout
    }

    /// Returns the graceful drain deadline.
    #[must_use]
    pub fn shutdown_timeout(&self) -> Duration {
        self.shutdown_timeout
    }

    /// Returns the TLS material, if any.
    #[must_use]
    pub fn tls(&self) -> Option<&TlsConfig> {
        self.tls.as_ref()
    }

    /// Returns `true` if the default route is enabled.
    #[must_use]
    pub fn is_default_route_enabled(&self, route: DefaultRoute) -> bool {
        self.default_routes.contains(&route)
    }

    /// Returns the enabled default routes in routing order.
    #[must_use]
    pub fn default_routes(&self) -> Vec<DefaultRoute> {
        self.default_routes.iter().copied().collect()
    }

    /// Returns the override handler of a default route, if any.
    #[must_use]
    pub fn default_route_handler(&self, route: DefaultRoute) -> Option<&BoxHandler> {
        self.default_route_handlers.get(&route)
    }

    /// Returns `true` if request logging is disabled for a default route.
    #[must_use]
    pub fn is_default_route_logger_disabled(&self, route: DefaultRoute) -> bool {
        self.default_route_loggers_disabled.contains(&route)
    }

    /// Returns the public IP provider, if one was injected.
    #[must_use]
    pub fn ip_provider(&self) -> Option<&Arc<dyn IpProvider>> {
        self.ip_provider.as_ref()
    }

    /// Returns the redaction function.
    #[must_use]
    pub fn redactor(&self) -> &Redactor {
        &self.redactor
    }

    /// Returns the global middleware, in order.
    #[must_use]
    pub fn middleware(&self) -> &[BoxedMiddleware] {
        &self.middleware
    }

    /// Returns `true` if request logging is disabled for every route.
    #[must_use]
    pub fn is_logger_disabled(&self) -> bool {
        self.logger_disabled
    }

    /// Returns the shared counter handle.
    #[must_use]
    pub fn wait_group(&self) -> &WaitGroup {
        &self.wait_group
    }

    /// Returns the shared cancellation signal handle.
    #[must_use]
    pub fn shutdown_signal(&self) -> &ShutdownSignal {
        &self.shutdown_signal
    }

    /// Returns the span every record of the instance is nested under.
    #[must_use]
    pub fn span(&self) -> &Span {
        &self.span
    }

    /// Returns the not-found override handler, if any.
    #[must_use]
    pub fn not_found_handler(&self) -> Option<&BoxHandler> {
        self.not_found_handler.as_ref()
    }

    /// Returns the method-not-allowed override handler, if any.
    #[must_use]
    pub fn method_not_allowed_handler(&self) -> Option<&BoxHandler> {
        self.method_not_allowed_handler.as_ref()
    }

    /// Returns the panic override handler, if any.
    #[must_use]
    pub fn panic_handler(&self) -> Option<&PanicHandler> {
        self.panic_handler.as_ref()
    }
}

impl fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServerConfig")
            .field("address", &self.address)
            .field("trace_header", &self.trace_header)
            .field("request_timeout", &self.request_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("write_timeout", &self.write_timeout)
            .field("header_timeout", &self.header_timeout)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("tls", &self.tls)
            .field("default_routes", &self.default_routes)
            .field("middleware", &self.middleware.len())
            .field("logger_disabled", &self.logger_disabled)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ServerConfig`].
#[derive(Clone)]
pub struct ConfigBuilder {
    address: String,
    trace_header: String,
    request_timeout: Duration,
    read_timeout: Duration,
    write_timeout: Duration,
    header_timeout: Duration,
    shutdown_timeout: Duration,
    tls: Option<TlsConfig>,
    default_routes: BTreeSet<DefaultRoute>,
    default_route_handlers: HashMap<DefaultRoute, BoxHandler>,
    default_route_loggers_disabled: BTreeSet<DefaultRoute>,
    ip_provider: Option<Arc<dyn IpProvider>>,
    redactor: Redactor,
    middleware: Vec<BoxedMiddleware>,
    logger_disabled: bool,
    wait_group: WaitGroup,
    shutdown_signal: ShutdownSignal,
    span: Span,
    not_found_handler: Option<BoxHandler>,
    method_not_allowed_handler: Option<BoxHandler>,
    panic_handler: Option<PanicHandler>,
}

impl ConfigBuilder {
    /// Creates a builder with default values.
    #[must_use]
    pub fn new() -> Self {
        let timeout = Duration::from_secs(DEFAULT_TIMEOUT_SECS);
        Self {
            address: DEFAULT_ADDRESS.to_string(),
            trace_header: DEFAULT_TRACE_HEADER.to_string(),
            request_timeout: timeout,
            read_timeout: timeout,
            write_timeout: timeout,
            header_timeout: timeout,
            shutdown_timeout: Duration::from_secs(DEFAULT_SHUTDOWN_TIMEOUT_SECS),
            tls: None,
            default_routes: BTreeSet::new(),
            default_route_handlers: HashMap::new(),
            default_route_loggers_disabled: BTreeSet::new(),
            ip_provider: None,
            redactor: Arc::new(portico_middleware::default_redactor),
            middleware: Vec::new(),
            logger_disabled: false,
            wait_group: WaitGroup::new(),
            shutdown_signal: ShutdownSignal::new(),
            span: Span::none(),
            not_found_handler: None,
            method_not_allowed_handler: None,
            panic_handler: None,
        }
    }

    /// Creates a builder seeded from the process environment.
    ///
    /// | Variable                        | Option                            |
    /// |---------------------------------|-----------------------------------|
    /// | `PORTICO_ADDRESS`               | [`address`](Self::address)        |
    /// | `PORTICO_TRACE_HEADER`          | [`trace_header`](Self::trace_header) |
    /// | `PORTICO_SHUTDOWN_TIMEOUT_SECS` | [`shutdown_timeout`](Self::shutdown_timeout) |
    /// | `PORTICO_REQUEST_TIMEOUT_SECS`  | [`request_timeout`](Self::request_timeout) |
    /// | `PORTICO_DEFAULT_ROUTES`        | comma separated route names, or `all` |
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidOption`] if a variable cannot be parsed.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::new().apply_vars(|name| std::env::var(name).ok())
    }

    /// Applies `PORTICO_*` variables looked up through `lookup`.
    pub(crate) fn apply_vars<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(address) = lookup("PORTICO_ADDRESS") {
            self = self.address(address);
        }
        if let Some(header) = lookup("PORTICO_TRACE_HEADER") {
            self = self.trace_header(header);
        }
        if let Some(secs) = lookup("PORTICO_SHUTDOWN_TIMEOUT_SECS") {
            self = self.shutdown_timeout(parse_secs("PORTICO_SHUTDOWN_TIMEOUT_SECS", &secs)?);
        }
        if let Some(secs) = lookup("PORTICO_REQUEST_TIMEOUT_SECS") {
            self = self.request_timeout(parse_secs("PORTICO_REQUEST_TIMEOUT_SECS", &secs)?);
        }
        if let Some(routes) = lookup("PORTICO_DEFAULT_ROUTES") {
            if routes.trim().eq_ignore_ascii_case("all") {
                self = self.enable_all_default_routes();
            } else {
                let routes = routes
                    .split(',')
                    .map(str::trim)
                    .filter(|name| !name.is_empty())
                    .map(|name| {
                        name.parse::<DefaultRoute>()
                            .map_err(|reason| ConfigError::invalid_option("PORTICO_DEFAULT_ROUTES", reason))
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                self = self.enable_default_routes(&routes);
            }
        }
        Ok(self)
    }

    /// Sets the bind address (`host:port`).
    #[must_use]
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Sets the trace header name.
    #[must_use]
    pub fn trace_header(mut self, name: impl Into<String>) -> Self {
        self.trace_header = name.into();
        self
    }

    /// Sets the default per-route handler deadline. Zero disables it.
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Sets the request body read deadline. Zero disables it.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Sets the deadline from request head to response. Zero disables it.
    #[must_use]
    pub fn write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = timeout;
        self
    }

    /// Sets the request header read deadline. Zero disables it.
    #[must_use]
    pub fn header_timeout(mut self, timeout: Duration) -> Self {
        self.header_timeout = timeout;
        self
    }

    /// Sets the graceful drain deadline.
    #[must_use]
    pub fn shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Serves TLS with the given material.
    #[must_use]
    pub fn tls(mut self, tls: TlsConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Enables the given default routes.
    #[must_use]
    pub fn enable_default_routes(mut self, routes: &[DefaultRoute]) -> Self {
        self.default_routes.extend(routes.iter().copied());
        self
    }

    /// Enables every default route.
    #[must_use]
    pub fn enable_all_default_routes(self) -> Self {
        self.enable_default_routes(&DefaultRoute::ALL)
    }

    /// Replaces the built-in handler of a default route.
    #[must_use]
    pub fn default_route_handler(mut self, route: DefaultRoute, handler: BoxHandler) -> Self {
        self.default_route_handlers.insert(route, handler);
        self
    }

    /// Injects the public IP provider used by the ip route.
    #[must_use]
    pub fn ip_provider(mut self, provider: Arc<dyn IpProvider>) -> Self {
        self.ip_provider = Some(provider);
        self
    }

    /// Sets the redaction function applied to request dumps.
    #[must_use]
    pub fn redactor(mut self, redactor: Redactor) -> Self {
        self.redactor = redactor;
        self
    }

    /// Appends one global middleware.
    #[must_use]
    pub fn middleware(mut self, middleware: BoxedMiddleware) -> Self {
        self.middleware.push(middleware);
        self
    }

    /// Appends several global middleware, in order.
    #[must_use]
    pub fn middlewares(mut self, middleware: impl IntoIterator<Item = BoxedMiddleware>) -> Self {
        self.middleware.extend(middleware);
        self
    }

    /// Disables request logging for every route.
    #[must_use]
    pub fn disable_logger(mut self) -> Self {
        self.logger_disabled = true;
        self
    }

    /// Disables request logging for one default route.
    #[must_use]
    pub fn disable_default_route_logger(mut self, route: DefaultRoute) -> Self {
        self.default_route_loggers_disabled.insert(route);
        self
    }

    /// Sets the shared counter handle.
    #[must_use]
    pub fn wait_group(mut self, wait_group: WaitGroup) -> Self {
        self.wait_group = wait_group;
        self
    }

    /// Sets the shared cancellation signal handle.
    #[must_use]
    pub fn shutdown_signal(mut self, signal: ShutdownSignal) -> Self {
        self.shutdown_signal = signal;
        self
    }

    /// Sets the span every record of the instance is nested under.
    #[must_use]
    pub fn span(mut self, span: Span) -> Self {
        self.span = span;
        self
    }

    /// Replaces the not-found fallback.
    #[must_use]
    pub fn not_found_handler(mut self, handler: BoxHandler) -> Self {
        self.not_found_handler = Some(handler);
        self
    }

    /// Replaces the method-not-allowed fallback.
    #[must_use]
    pub fn method_not_allowed_handler(mut self, handler: BoxHandler) -> Self {
        self.method_not_allowed_handler = Some(handler);
        self
    }

    /// Replaces the panic fallback.
    #[must_use]
    pub fn panic_handler(mut self, handler: PanicHandler) -> Self {
        self.panic_handler = Some(handler);
        self
    }

    /// Validates the accumulated options and builds the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidAddress`] if the address is not
    /// `host:port` with a port in `[1, 65535]`, and
    /// [`ConfigError::InvalidOption`] if the trace header is not a valid
    /// header name.
    pub fn build(self) -> Result<ServerConfig, ConfigError> {
        let (host, port) = parse_address(&self.address)?;
        let trace_header = HeaderName::from_bytes(self.trace_header.as_bytes())
            .map_err(|e| ConfigError::invalid_option("trace_header", e.to_string()))?;

        Ok(ServerConfig {
            address: self.address,
            host,
            port,
            trace_header,
            request_timeout: self.request_timeout,
            read_timeout: self.read_timeout,
            write_timeout: self.write_timeout,
            header_timeout: self.header_timeout,
            shutdown_timeout: self.shutdown_timeout,
            tls: self.tls,
            default_routes: self.default_routes,
            default_route_handlers: self.default_route_handlers,
            default_route_loggers_disabled: self.default_route_loggers_disabled,
            ip_provider: self.ip_provider,
            redactor: self.redactor,
            middleware: self.middleware,
            logger_disabled: self.logger_disabled,
            wait_group: self.wait_group,
            shutdown_signal: self.shutdown_signal,
            span: self.span,
            not_found_handler: self.not_found_handler,
            method_not_allowed_handler: self.method_not_allowed_handler,
            panic_handler: self.panic_handler,
        })
    }
}

impl Default for ConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConfigBuilder")
            .field("address", &self.address)
            .field("trace_header", &self.trace_header)
            .field("default_routes", &self.default_routes)
            .field("middleware", &self.middleware.len())
            .finish_non_exhaustive()
    }
}

/// Splits `host:port`, returning the bindable host and the port.
///
/// The host may be empty (all interfaces), a name, an IPv4 address or a
/// bracketed IPv6 address.
pub(crate) fn parse_address(address: &str) -> Result<(String, u16), ConfigError> {
    if address.chars().any(char::is_whitespace) {
        return Err(ConfigError::invalid_address(address, "contains whitespace"));
    }
    let Some((host, port)) = address.rsplit_once(':') else {
        return Err(ConfigError::invalid_address(address, "missing port"));
    };

    if port.is_empty() || !port.bytes().all(|b| b.is_ascii_digit()) {
        return Err(ConfigError::invalid_address(address, "port is not numeric"));
    }
    let port = match port.parse::<u16>() {
        Ok(0) | Err(_) => {
            return Err(ConfigError::invalid_address(address, "port must be in [1, 65535]"));
        }
        Ok(port) => port,
    };

    let host = if let Some(inner) = host.strip_prefix('[') {
        let Some(inner) = inner.strip_suffix(']') else {
            return Err(ConfigError::invalid_address(address, "unterminated IPv6 bracket"));
        };
        if inner.parse::<Ipv6Addr>().is_err() {
            return Err(ConfigError::invalid_address(address, "invalid IPv6 address"));
        }
        inner
    } else if host.contains([':', '[', ']']) {
        return Err(ConfigError::invalid_address(address, "IPv6 hosts must be bracketed"));
    } else {
        host
    };

    Ok((host.to_string(), port))
}

fn parse_secs(option: &str, value: &str) -> Result<Duration, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map(Duration::from_secs)
        .map_err(|e| ConfigError::invalid_option(option, e.to_string()))
}
