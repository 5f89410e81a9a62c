//! # Portico Core
//!
//! Core types shared by every Portico crate:
//!
//! - [`Request`] / [`Response`] - the HTTP types flowing through routes
//! - [`RequestContext`] - request-scoped state (trace id, arrival time, path params)
//! - [`Handler`] - the terminal handler contract, plus [`handler_fn`]
//! - [`envelope`] - the response envelope: status classification and the
//!   single structured log record emitted per response
//! - [`ProviderError`] - failures reported by injected collaborators

#![doc(html_root_url = "https://docs.rs/portico-core/0.1.0")]
#![warn(missing_docs)]
#![forbid(unsafe_code)]

mod context;
pub mod envelope;
mod error;
mod handler;
mod types;

pub use context::RequestContext;
pub use envelope::Classification;
pub use error::ProviderError;
pub use handler::{handler_fn, BoxHandler, FnHandler, Handler};
pub use types::{BoxFuture, Request, Response};
