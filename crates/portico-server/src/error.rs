//! Server error types.

use thiserror::Error;

/// Configuration errors, returned before any network resource is touched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The bind address is not `host:port` with a port in `[1, 65535]`.
    #[error("invalid address '{address}': {reason}")]
    InvalidAddress {
        /// The rejected address.
        address: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An option could not be applied.
    #[error("invalid value for option {option}: {reason}")]
    InvalidOption {
        /// The option name.
        option: String,
        /// Why the value was rejected.
        reason: String,
    },
}

impl ConfigError {
    pub(crate) fn invalid_address(address: &str, reason: impl Into<String>) -> Self {
        Self::InvalidAddress {
            address: address.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_option(option: &str, reason: impl Into<String>) -> Self {
        Self::InvalidOption {
            option: option.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors raised by a server instance.
#[derive(Error, Debug)]
pub enum ServerError {
    /// The configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The listener could not be bound.
    #[error("failed to bind listener on {address}: {source}")]
    Listener {
        /// The configured address.
        address: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The TLS material is invalid.
    #[error("invalid TLS material: {0}")]
    Tls(String),

    /// The accept loop failed with something other than an orderly close.
    #[error("serve loop failed: {0}")]
    Serve(#[source] std::io::Error),

    /// The drain deadline elapsed before every connection finished.
    #[error("graceful shutdown exceeded its deadline of {0:?}")]
    Shutdown(std::time::Duration),

    /// The operation is not allowed in the current lifecycle state.
    #[error("cannot {operation} a server in state {state}")]
    InvalidState {
        /// The attempted operation.
        operation: &'static str,
        /// The current state.
        state: crate::ServerState,
    },

    /// A supervised task panicked.
    #[error("server task '{0}' panicked")]
    TaskPanicked(&'static str),
}

impl ServerError {
    /// Returns `true` for errors raised while opening the listener.
    #[must_use]
    pub fn is_listener(&self) -> bool {
        matches!(self, Self::Listener { .. } | Self::Tls(_))
    }
}
