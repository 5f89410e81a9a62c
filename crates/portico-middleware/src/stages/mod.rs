//! Built-in middleware stages.
//!
//! 1. [`logging`] - trace id, per-request span, completion record
//! 2. [`timeout`] - hard deadline around the rest of the chain

pub mod logging;
pub mod timeout;

pub use logging::LoggingMiddleware;
pub use timeout::{TimedOut, TimeoutMiddleware, TIMEOUT_MESSAGE};
