//! Collaborator error types.

use thiserror::Error;

/// Error reported by an injected collaborator, such as the public IP provider.
///
/// These errors are logged by the runtime and never forwarded to clients.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The collaborator could not reach its upstream.
    #[error("transport error: {0}")]
    Transport(String),

    /// The upstream answered with a non-success status.
    #[error("unexpected upstream status: {0}")]
    Status(u16),

    /// The upstream answered with a payload that could not be used.
    #[error("invalid upstream payload: {0}")]
    InvalidPayload(String),
}
