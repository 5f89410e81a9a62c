//! # Portico Server
//!
//! HTTP server runtime for the Portico toolkit.
//!
//! This crate turns a list of routes into a running server instance:
//!
//! - [`ConfigBuilder`] - fluent, side-effect-free configuration validated once
//! - [`DefaultRoute`] - the runtime's own operational endpoints
//! - [`Router`] - default plus bound routes, each wrapped in its middleware
//!   pipeline, with not-found, method-not-allowed and panic fallbacks
//! - [`Server`] - bind, non-blocking start and bounded graceful shutdown
//! - [`ShutdownSignal`] and [`WaitGroup`] - handles shared by every instance
//!   that must shut down as a group
//!
//! ## Example
//!
//! ```rust,ignore
//! use portico_core::{envelope, handler_fn};
//! use portico_server::{DefaultRoute, Route, Server, ServerConfig, WaitGroup};
//! use http::StatusCode;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let group = WaitGroup::new();
//!     let server = Server::new(
//!         |_config: &ServerConfig| {
//!             vec![Route::get("/hello", "Say hello", handler_fn(|ctx, _req| async move {
//!                 envelope::send_text(&ctx, StatusCode::OK, "hello")
//!             }))]
//!         },
//!         ServerConfig::builder()
//!             .address("127.0.0.1:8080")
//!             .enable_default_routes(&[DefaultRoute::Index, DefaultRoute::Ping])
//!             .wait_group(group.clone()),
//!     )
//!     .await?;
//!
//!     server.start(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })?;
//!     group.wait().await;
//!     Ok(())
//! }
//! ```

#![doc(html_root_url = "https://docs.rs/portico-server/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod config;
mod error;
mod listener;
pub mod profiling;
mod route;
mod router;
mod routes;
mod server;
mod shutdown;

pub use config::{
    ConfigBuilder, ServerConfig, TlsConfig, DEFAULT_ADDRESS, DEFAULT_SHUTDOWN_TIMEOUT_SECS,
    DEFAULT_TIMEOUT_SECS,
};
pub use error::{ConfigError, ServerError};
pub use portico_middleware::DEFAULT_TRACE_HEADER;
pub use route::{Binder, Route, RouteInfo};
pub use router::{default_panic_handler, PanicHandler, Recovered, Router};
pub use routes::{ip_provider_fn, DefaultRoute, HttpIpProvider, IpProvider, DEFAULT_IP_PROVIDER_URL};
pub use server::{Server, ServerState};
pub use shutdown::{ShutdownReceiver, ShutdownSignal, WaitGroup};
