//! # Portico
//!
//! HTTP server runtime with default operational routes, per-route
//! middleware pipelines and coordinated graceful shutdown.
//!
//! - 🧭 **Default routes** - index, public IP, ping, status, metrics and
//!   runtime profiling, each opt-in and individually replaceable
//! - 🧅 **Middleware pipeline** - request logging, request timeout, global
//!   and route middleware, composed per route
//! - 🛑 **Group shutdown** - instances sharing a shutdown signal and a wait
//!   group drain together within their own deadline
//! - 📨 **Response envelope** - every response, including 404, 405, 500 and
//!   timeouts, is sent and logged the same way
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use portico::prelude::*;
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     init_logging(&LogConfig::production())?;
//!
//!     let group = WaitGroup::new();
//!     let server = Server::new(
//!         |_config: &ServerConfig| {
//!             vec![Route::get("/hello", "Say hello", handler_fn(|ctx, _req| async move {
//!                 envelope::send_text(&ctx, StatusCode::OK, "hello")
//!             }))]
//!         },
//!         ServerConfig::builder()
//!             .enable_default_routes(&[DefaultRoute::Index, DefaultRoute::Ping])
//!             .shutdown_signal(ShutdownSignal::with_os_signals())
//!             .wait_group(group.clone()),
//!     )
//!     .await?;
//!
//!     server.start(std::future::pending())?;
//!     group.wait().await;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/portico/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

// Re-export core types
pub use portico_core as core;

// Re-export middleware types
pub use portico_middleware as middleware;

// Re-export server types
pub use portico_server as server;

// Re-export telemetry types
pub use portico_telemetry as telemetry;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust,ignore
/// use portico::prelude::*;
/// ```
pub mod prelude {
    pub use portico_core::{
        envelope, handler_fn, BoxHandler, Classification, Handler, ProviderError, Request,
        RequestContext, Response,
    };

    pub use portico_middleware::{middleware_fn, BoxedMiddleware, Middleware, MiddlewareArgs, Next};

    pub use portico_server::{
        ip_provider_fn, Binder, ConfigBuilder, ConfigError, DefaultRoute, HttpIpProvider, Route,
        Server, ServerConfig, ServerError, ServerState, ShutdownSignal, TlsConfig, WaitGroup,
    };

    pub use portico_telemetry::{
        init_logging, install_recorder, InstrumentMiddleware, LogConfig, MetricsConfig,
        MetricsHandler,
    };
}
