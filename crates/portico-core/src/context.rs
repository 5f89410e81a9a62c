//! Request-scoped state.
//!
//! The [`RequestContext`] is created by the server when a request arrives,
//! enriched by middleware (the logging stage sets the trace id, the router
//! sets path parameters) and handed to the terminal handler.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::net::SocketAddr;

/// Per-request context that flows through the middleware chain into handlers.
///
/// # Example
///
/// ```
/// use portico_core::RequestContext;
///
/// let mut ctx = RequestContext::new();
/// ctx.set_trace_id("7f0c3a8e");
/// ctx.set_param("id", "42");
///
/// assert_eq!(ctx.trace_id(), Some("7f0c3a8e"));
/// assert_eq!(ctx.param("id"), Some("42"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct RequestContext {
    /// Correlation id, set by the logging stage.
    trace_id: Option<String>,

    /// When the server received the request head.
    received_at: Option<DateTime<Utc>>,

    /// Address of the remote peer.
    remote_addr: Option<SocketAddr>,

    /// Path parameters extracted by the router.
    params: HashMap<String, String>,
}

impl RequestContext {
    /// Creates an empty context.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the arrival time of the request.
    #[must_use]
    pub fn with_received_at(mut self, received_at: DateTime<Utc>) -> Self {
        self.received_at = Some(received_at);
        self
    }

    /// Sets the remote peer address.
    #[must_use]
    pub fn with_remote_addr(mut self, remote_addr: SocketAddr) -> Self {
        self.remote_addr = Some(remote_addr);
        self
    }

    /// Returns the trace id, if the logging stage assigned one.
    #[must_use]
    pub fn trace_id(&self) -> Option<&str> {
        self.trace_id.as_deref()
    }

    /// Sets the trace id.
    pub fn set_trace_id(&mut self, trace_id: impl Into<String>) {
        self.trace_id = Some(trace_id.into());
    }

    /// Returns the arrival time of the request, if recorded.
    #[must_use]
    pub fn received_at(&self) -> Option<DateTime<Utc>> {
        self.received_at
    }

    /// Returns the remote peer address, if known.
    #[must_use]
    pub fn remote_addr(&self) -> Option<SocketAddr> {
        self.remote_addr
    }

    /// Returns a path parameter by name.
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Returns all path parameters.
    #[must_use]
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Sets a single path parameter.
    pub fn set_param(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.params.insert(name.into(), value.into());
    }

    /// Replaces all path parameters.
    pub fn set_params(&mut self, params: HashMap<String, String>) {
        self.params = params;
    }
}
