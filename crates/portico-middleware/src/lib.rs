//! # Portico Middleware
//!
//! Per-route middleware pipeline for the Portico runtime.
//!
//! Each route owns a [`Pipeline`]: an ordered list of [`Middleware`] stages
//! wrapped around the route's terminal handler, together with the immutable
//! [`MiddlewareArgs`] created once when the route is bound.
//!
//! ## Stage Order
//!
//! ```text
//! Request → Logging → Timeout → Global[0..n] → Route[0..m] → Handler
//!                                                              ↓
//! Response ← Logging ← Timeout ← Global[n..0] ← Route[m..0] ←──┘
//! ```
//!
//! | Stage    | Included when                                         |
//! |----------|-------------------------------------------------------|
//! | Logging  | not disabled globally nor for the route               |
//! | Timeout  | effective timeout (route override, else global) > 0   |
//! | Global   | always, in configured order                           |
//! | Route    | always, closest to the handler                        |
//!
//! Composition wraps from the end of the list toward the start, so the
//! first stage is the outermost: first to see the request, last to see the
//! response.

#![doc(html_root_url = "https://docs.rs/portico-middleware/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod args;
pub mod middleware;
pub mod pipeline;
pub mod redact;
pub mod stages;

pub use args::{MiddlewareArgs, Redactor, DEFAULT_TRACE_HEADER};
pub use middleware::{middleware_fn, FnMiddleware, Middleware, Next};
pub use pipeline::{BoxedMiddleware, Pipeline, PipelineBuilder};
pub use redact::default_redactor;
pub use stages::{LoggingMiddleware, TimedOut, TimeoutMiddleware, TIMEOUT_MESSAGE};
