//! # Portico Telemetry
//!
//! Observability collaborators for the Portico server runtime.
//!
//! - [`logging`] - installs the `tracing` subscriber (JSON or pretty)
//! - [`metrics`] - Prometheus recorder, the handler for the metrics default
//!   route and a global middleware recording per-route request metrics
//!
//! Neither is required: without a metrics handler the metrics route answers
//! 501, and without a subscriber the runtime's log records are discarded.

#![doc(html_root_url = "https://docs.rs/portico-telemetry/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::TelemetryError;
pub use logging::{init_logging, LogConfig};
pub use metrics::{install_recorder, InstrumentMiddleware, MetricsConfig, MetricsHandler};

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
