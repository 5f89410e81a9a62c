//! HTTP types used by routes, middleware and handlers.

use bytes::Bytes;
use http_body_util::Full;
use std::future::Future;
use std::pin::Pin;

/// The request type seen by middleware and handlers.
///
/// The body has already been collected by the server, bounded by the
/// configured read timeout.
pub type Request = http::Request<Bytes>;

/// The response type produced by handlers.
pub type Response = http::Response<Full<Bytes>>;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;
