// -------------------------------------------------------------------------------------------------
//  Copyright (c) Alpaca Rust Client Contributors
//  Licensed under the MIT License. See LICENSE in the repository root for details.
// -------------------------------------------------------------------------------------------------

//! The crate's single error type and the response classifier of §4.2.

use std::{collections::BTreeMap, time::Duration};

use apca_net::http::Headers;
use thiserror::Error;

/// One of the taxonomy's tagged kinds. The classifier in [`classify`] picks exactly one by the
/// first matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 401, or a credential-failure machine code/message.
    Authentication,
    /// 403, or a forbidden/permission machine code/message.
    Permission,
    /// 404, or a not-found machine code/message.
    NotFound,
    /// 400/422, or a validation machine code/message.
    Validation,
    /// 429, or a rate-limit machine code/message.
    RateLimit,
    /// Any other 4xx.
    Client,
    /// 5xx.
    Server,
    /// A requested header was absent.
    HeaderNotFound,
    /// The HTTP transport failed to initialize.
    TransportInit,
    /// The HTTP transport failed to create a request handle.
    TransportHandle,
    /// The HTTP transport failed to append a header.
    TransportHeaderAppend,
    /// The HTTP transport failed while performing the request.
    TransportPerform,
    /// The WebSocket pending-send queue exceeded its configured bound.
    WebSocketSendQueueLimit,
    /// A non-positive ping interval was configured.
    InvalidPingInterval,
    /// A backfill request was issued with no market-data client configured.
    NullBackfillCoordinator,
    /// A caller-supplied argument failed validation.
    InvalidArgument,
    /// The OAuth client was misconfigured (missing endpoint, bad PKCE length, etc).
    OAuthConfigurationError,
    /// The market-data client was misconfigured.
    MarketDataConfigurationError,
    /// The REST client is missing a required configuration field.
    RestClientConfigurationMissing,
    /// An HTTP client/transport was required but not supplied.
    HttpClientRequired,
    /// The server returned a well-formed but unclassifiable error body.
    ApiResponseError,
    /// Everything else.
    Unknown,
}

/// HTTP context attached to an error raised from a response.
#[derive(Debug, Clone)]
pub struct HttpContext {
    /// HTTP status code.
    pub status: u16,
    /// Raw response body.
    pub body: String,
    /// Response headers.
    pub headers: Headers,
    /// Parsed `Retry-After`, if present and parseable.
    pub retry_after: Option<Duration>,
}

/// The crate's single error type.
#[derive(Debug, Error)]
#[error("{message}")]
pub struct Error {
    kind: ErrorKind,
    message: String,
    metadata: BTreeMap<String, String>,
    http: Option<HttpContext>,
}

impl Error {
    /// Builds an error with no HTTP context.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            metadata: BTreeMap::new(),
            http: None,
        }
    }

    /// Builds an error carrying free-form metadata.
    pub fn with_metadata(
        kind: ErrorKind,
        message: impl Into<String>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            kind,
            message: message.into(),
            metadata,
            http: None,
        }
    }

    /// Builds an [`InvalidArgument`](ErrorKind::InvalidArgument) error for argument `name`.
    pub fn invalid_argument(name: &str, reason: impl Into<String>) -> Self {
        let mut metadata = BTreeMap::new();
        metadata.insert("argument".to_string(), name.to_string());
        Self::with_metadata(ErrorKind::InvalidArgument, reason, metadata)
    }

    /// Classifies an HTTP error response per §4.2 and attaches its context. `code`, if `None`,
    /// falls back to a `code` field in the parsed body.
    pub fn from_response(status: u16, body: &str, headers: Headers, code: Option<&str>) -> Self {
        let message = extract_message(body).unwrap_or_else(|| format!("HTTP {status}"));
        let body_code = extract_code(body);
        let code = code.or(body_code.as_deref());
        let kind = classify(status, &message, code);
        let retry_after = parse_retry_after(&headers);
        Self {
            kind,
            message,
            metadata: BTreeMap::new(),
            http: Some(HttpContext {
                status,
                body: body.to_string(),
                headers,
                retry_after,
            }),
        }
    }

    /// Replaces the message, keeping kind, metadata, and HTTP context as-is. Used where a
    /// caller extracts a more specific message from the body than the generic classifier did.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    /// The classified kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// The human-readable message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Free-form metadata attached at construction.
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// The HTTP context, if this error was raised from a response.
    #[must_use]
    pub fn http_context(&self) -> Option<&HttpContext> {
        self.http.as_ref()
    }

    /// The parsed `Retry-After` duration, if any.
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        self.http.as_ref().and_then(|ctx| ctx.retry_after)
    }
}

impl From<apca_net::HttpClientError> for Error {
    fn from(err: apca_net::HttpClientError) -> Self {
        match err {
            apca_net::HttpClientError::Build(msg) => Self::new(ErrorKind::TransportInit, msg),
            apca_net::HttpClientError::Transport(msg) => Self::new(ErrorKind::TransportPerform, msg),
            apca_net::HttpClientError::Timeout(d) => {
                Self::new(ErrorKind::TransportPerform, format!("request timed out after {d:?}"))
            }
            apca_net::HttpClientError::InvalidUrl(e) => Self::new(ErrorKind::InvalidArgument, e.to_string()),
        }
    }
}

impl From<apca_net::WebSocketError> for Error {
    fn from(err: apca_net::WebSocketError) -> Self {
        match err {
            apca_net::WebSocketError::Connect(msg) => Self::new(ErrorKind::TransportPerform, msg),
            apca_net::WebSocketError::Disconnected => {
                Self::new(ErrorKind::TransportPerform, "WebSocket client is disconnected")
            }
            apca_net::WebSocketError::QueueLimit { limit } => {
                let mut metadata = BTreeMap::new();
                metadata.insert("limit".to_string(), limit.to_string());
                Self::with_metadata(
                    ErrorKind::WebSocketSendQueueLimit,
                    format!("send queue limit of {limit} exceeded"),
                    metadata,
                )
            }
            apca_net::WebSocketError::InvalidPingInterval(d) => Self::new(
                ErrorKind::InvalidPingInterval,
                format!("ping interval must be positive, got {d:?}"),
            ),
        }
    }
}

fn extract_message(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    value.get("message")?.as_str().map(str::to_string)
}

fn extract_code(body: &str) -> Option<String> {
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    match value.get("code")? {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Classifies `(status, message, code)` per §4.2's ordered rules. The first matching rule wins.
#[must_use]
pub fn classify(status: u16, message: &str, code: Option<&str>) -> ErrorKind {
    let message_lower = message.to_lowercase();
    let code = code.unwrap_or("");

    let contains_any = |haystack: &str, needles: &[&str]| needles.iter().any(|n| haystack.contains(n));

    if status == 401
        || matches!(
            code,
            "40110000"
                | "authentication_error"
                | "unauthorized"
                | "invalid_client"
                | "invalid_grant"
                | "authentication_failed"
                | "client_authentication_failed"
        )
        || contains_any(&message_lower, &["authentication", "credential", "unauthorized"])
    {
        return ErrorKind::Authentication;
    }

    if status == 403
        || matches!(
            code,
            "forbidden" | "permission_denied" | "insufficient_permission" | "access_denied" | "unauthorized_client"
        )
        || contains_any(&message_lower, &["forbidden", "permission", "access denied"])
    {
        return ErrorKind::Permission;
    }

    if status == 404
        || matches!(code, "40410000" | "not_found" | "resource_not_found")
        || message_lower.contains("not found")
    {
        return ErrorKind::NotFound;
    }

    if status == 429
        || matches!(
            code,
            "42910000" | "rate_limit" | "too_many_requests" | "rate_limit_exceeded" | "slow_down"
        )
        || contains_any(&message_lower, &["rate limit", "too many request", "throttle", "slow down"])
    {
        return ErrorKind::RateLimit;
    }

    if status >= 500
        || matches!(code, "50010000" | "internal_error" | "service_unavailable")
        || contains_any(&message_lower, &["internal server", "service unavailable", "server error"])
    {
        return ErrorKind::Server;
    }

    if status == 400
        || status == 422
        || matches!(
            code,
            "validation_error" | "invalid_request" | "invalid_scope" | "unsupported_response_type"
        )
        || contains_any(&message_lower, &["validation", "invalid", "unsupported response", "invalid scope"])
    {
        return ErrorKind::Validation;
    }

    if (400..500).contains(&status) {
        return ErrorKind::Client;
    }

    ErrorKind::Unknown
}

/// Parses a `Retry-After` header value, either an integer delta-seconds or an HTTP-date (RFC
/// 1123 / RFC 850 / asctime, via `httpdate`). A date in the past clamps to zero. Absent or
/// unparseable yields `None`.
#[must_use]
pub fn parse_retry_after(headers: &Headers) -> Option<Duration> {
    let raw = headers.get("Retry-After")?;
    let trimmed = raw.trim();

    if let Ok(seconds) = trimmed.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let when = httpdate::parse_http_date(trimmed).ok()?;
    let now = std::time::SystemTime::now();
    match when.duration_since(now) {
        Ok(delta) => Some(delta),
        Err(_) => Some(Duration::ZERO),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_authentication_by_status() {
        assert_eq!(classify(401, "nope", None), ErrorKind::Authentication);
    }

    #[test]
    fn classifies_by_machine_code_over_generic_message() {
        assert_eq!(classify(400, "bad stuff", Some("forbidden")), ErrorKind::Permission);
    }

    #[test]
    fn classifies_rate_limit_by_message_substring() {
        assert_eq!(classify(418, "please slow down", None), ErrorKind::RateLimit);
    }

    #[test]
    fn classifies_other_4xx_as_client() {
        assert_eq!(classify(418, "teapot", None), ErrorKind::Client);
    }

    #[test]
    fn classifies_everything_else_as_unknown() {
        assert_eq!(classify(200, "ok", None), ErrorKind::Unknown);
    }

    #[test]
    fn retry_after_absent_is_none() {
        let headers = Headers::new();
        assert_eq!(parse_retry_after(&headers), None);
    }

    #[test]
    fn retry_after_integer_seconds() {
        let mut headers = Headers::new();
        headers.append("Retry-After", "120");
        assert_eq!(parse_retry_after(&headers), Some(Duration::from_secs(120)));
    }

    #[test]
    fn retry_after_past_http_date_clamps_to_zero() {
        let mut headers = Headers::new();
        headers.append("Retry-After", "Sun, 06 Nov 1994 08:49:37 GMT");
        assert_eq!(parse_retry_after(&headers), Some(Duration::ZERO));
    }
}
