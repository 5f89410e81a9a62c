//! Response envelope.
//!
//! Every response produced by the runtime (default routes, fallbacks,
//! timeouts, recovered panics) and by well-behaved handlers goes through one
//! of the `send_*` primitives below. Each primitive:
//!
//! 1. sets the no-cache headers
//! 2. sets the content type for the payload kind
//! 3. sets the status
//! 4. sets the body (if any)
//! 5. emits exactly one structured log record
//!
//! The record carries `response_code`, `response_message`, `response_status`
//! (the [`Classification`]), `response_time`, `response_duration` (ms since
//! the request arrival recorded in the [`RequestContext`]) and
//! `response_data`. It is emitted at error level for status >= 400 and at
//! debug level otherwise.

use crate::{RequestContext, Response};
use bytes::Bytes;
use chrono::{SecondsFormat, Utc};
use http::header::{HeaderValue, CACHE_CONTROL, CONTENT_TYPE, EXPIRES, PRAGMA};
use http::StatusCode;
use http_body_util::Full;
use serde::Serialize;
use std::fmt;

/// Content type of plain-text payloads.
pub const TEXT_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Content type of JSON payloads.
pub const JSON_CONTENT_TYPE: &str = "application/json";

/// Content type of XML payloads.
pub const XML_CONTENT_TYPE: &str = "application/xml; charset=utf-8";

/// Tri-state classification of a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Status below 400.
    Success,
    /// Status in 400..=499.
    Fail,
    /// Status 500 and above.
    Error,
}

impl Classification {
    /// Returns the lower-case label used in log records.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Fail => "fail",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for Classification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classifies a status code.
///
/// # Example
///
/// ```
/// use portico_core::envelope::{classify, Classification};
/// use http::StatusCode;
///
/// assert_eq!(classify(StatusCode::OK), Classification::Success);
/// assert_eq!(classify(StatusCode::NOT_FOUND), Classification::Fail);
/// assert_eq!(classify(StatusCode::BAD_GATEWAY), Classification::Error);
/// ```
#[must_use]
pub fn classify(status: StatusCode) -> Classification {
    match status.as_u16() {
        0..=399 => Classification::Success,
        400..=499 => Classification::Fail,
        _ => Classification::Error,
    }
}

/// Sends a status-only response with an empty body.
#[must_use]
pub fn send_status(ctx: &RequestContext, status: StatusCode) -> Response {
    send(ctx, status, None, Bytes::new(), "")
}

/// Sends a plain-text response.
#[must_use]
pub fn send_text(ctx: &RequestContext, status: StatusCode, text: impl Into<String>) -> Response {
    let text = text.into();
    let data = text.clone();
    send(ctx, status, Some(TEXT_CONTENT_TYPE), Bytes::from(text), &data)
}

/// Sends a JSON response.
///
/// A payload that fails to serialize is answered with a bare 500.
#[must_use]
pub fn send_json<T: Serialize + ?Sized>(ctx: &RequestContext, status: StatusCode, payload: &T) -> Response {
    match serde_json::to_string(payload) {
        Ok(json) => {
            let data = json.clone();
            send(ctx, status, Some(JSON_CONTENT_TYPE), Bytes::from(json), &data)
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to serialize JSON response payload");
            send_status(ctx, StatusCode::INTERNAL_SERVER_ERROR)
        }
    }
}

/// Sends an already rendered XML document.
#[must_use]
pub fn send_xml(ctx: &RequestContext, status: StatusCode, document: impl Into<String>) -> Response {
    let document = document.into();
    let data = document.clone();
    send(ctx, status, Some(XML_CONTENT_TYPE), Bytes::from(document), &data)
}

fn send(
    ctx: &RequestContext,
    status: StatusCode,
    content_type: Option<&'static str>,
    body: Bytes,
    data: &str,
) -> Response {
    let mut response = Response::new(Full::new(body));

    let headers = response.headers_mut();
    headers.insert(
        CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-store, must-revalidate"),
    );
    headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
    headers.insert(EXPIRES, HeaderValue::from_static("0"));
    if let Some(content_type) = content_type {
        headers.insert(CONTENT_TYPE, HeaderValue::from_static(content_type));
    }

    *response.status_mut() = status;

    log_response(ctx, status, data);
    response
}

fn log_response(ctx: &RequestContext, status: StatusCode, data: &str) {
    let now = Utc::now();
    let received_at = ctx.received_at().unwrap_or(now);
    let duration_ms = (now - received_at).num_milliseconds().max(0);
    let classification = classify(status);

    macro_rules! emit {
        ($level:ident) => {
            tracing::$level!(
                response_code = status.as_u16(),
                response_message = status.canonical_reason().unwrap_or_default(),
                response_status = classification.as_str(),
                response_time = %now.to_rfc3339_opts(SecondsFormat::Nanos, true),
                response_duration = duration_ms,
                response_data = data,
                "response"
            )
        };
    }

    if status.as_u16() >= 400 {
        emit!(error);
    } else {
        emit!(debug);
    }
}
