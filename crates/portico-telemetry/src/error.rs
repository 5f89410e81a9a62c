//! Telemetry error types.

use thiserror::Error;

/// Errors raised while setting up logging or metrics.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The metrics recorder could not be built or installed.
    #[error("failed to initialize metrics: {0}")]
    MetricsInit(String),

    /// The log subscriber could not be built or installed.
    #[error("failed to initialize logging: {0}")]
    LoggingInit(String),
}
