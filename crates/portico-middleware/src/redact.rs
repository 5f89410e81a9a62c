//! Redaction of sensitive data in request dumps.
//!
//! The default redactor masks credentials carried in headers, JSON bodies
//! and query or form parameters.

use regex::Regex;
use std::sync::OnceLock;

/// Replacement text for masked values.
pub const REDACTED: &str = "[REDACTED]";

struct Patterns {
    headers: Regex,
    json_fields: Regex,
    params: Regex,
}

fn patterns() -> &'static Patterns {
    static PATTERNS: OnceLock<Patterns> = OnceLock::new();
    PATTERNS.get_or_init(|| Patterns {
        headers: Regex::new(
            r"(?im)^(authorization|proxy-authorization|cookie|set-cookie|x-api-key)[ \t]*:[^\r\n]*",
        )
        .expect("valid regex"),
        json_fields: Regex::new(
            r#"(?i)"([a-z_]*(?:password|secret|token|key))"[ \t]*:[ \t]*"[^"]*""#,
        )
        .expect("valid regex"),
        params: Regex::new(r"(?i)\b([a-z_]*(?:password|secret|token|key))=([^&\s]*)")
            .expect("valid regex"),
    })
}

/// Masks credentials in a raw HTTP dump.
///
/// # Example
///
/// ```
/// use portico_middleware::default_redactor;
///
/// let dump = "GET /login?password=hunter2 HTTP/1.1\r\nAuthorization: Bearer abc\r\n";
/// let redacted = default_redactor(dump);
///
/// assert!(!redacted.contains("hunter2"));
/// assert!(!redacted.contains("Bearer abc"));
/// ```
#[must_use]
pub fn default_redactor(dump: &str) -> String {
    let patterns = patterns();
    let out = patterns
        .headers
        .replace_all(dump, format!("${{1}}: {REDACTED}").as_str());
    let out = patterns
        .json_fields
        .replace_all(&out, format!("\"${{1}}\":\"{REDACTED}\"").as_str());
    let out = patterns
        .params
        .replace_all(&out, format!("${{1}}={REDACTED}").as_str());
    out.into_owned()
}
