use axum::http::StatusCode;
use axum::response::{ IntoResponse, Response };
use axum::Json;
use std::time::Duration;
use thiserror::Error;

use crate::models::chat::{ ProxyErrorBody, ProxyErrorResponse };

/// Every failure the relay can produce. Each variant maps to exactly one
/// HTTP status and one fixed user-facing sentence, so classification is an
/// exhaustive match instead of substring dispatch.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("invalid request: {0}")]
    Validation(String),

    #[error("server configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Timeout(String),

    #[error("rate limited: {message}")]
    RateLimited {
        message: String,
        /// Hint for the client, carried in the response `details` field.
        retry_after: Option<Duration>,
    },

    #[error("upstream unavailable (status {status}): {message}")]
    UpstreamUnavailable {
        status: u16,
        message: String,
    },

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid upstream response: {0}")]
    InvalidUpstream(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl RelayError {
    pub fn timeout_after(after: Duration) -> Self {
        RelayError::Timeout(format!("request timed out after {}s", after.as_secs()))
    }

    pub fn rate_limited(message: impl Into<String>) -> Self {
        RelayError::RateLimited { message: message.into(), retry_after: None }
    }

    /// Classify a transport-level failure from reqwest. A timed-out call is
    /// a timeout even when it also looks like a connection failure.
    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return RelayError::timeout_after(timeout);
        }
        if err.is_decode() {
            return RelayError::InvalidUpstream(err.without_url().to_string());
        }
        // Covers refused/unreachable/DNS as well as mid-stream resets.
        RelayError::Network(err.without_url().to_string())
    }

    /// HTTP status returned to the client. Upstream statuses pass through
    /// for the unavailable case, with 502 as the fallback.
    pub fn status(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::Configuration(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            RelayError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            RelayError::UpstreamUnavailable { status, .. } =>
                StatusCode::from_u16(*status).unwrap_or(StatusCode::BAD_GATEWAY),
            RelayError::Network(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::InvalidUpstream(_) => StatusCode::INTERNAL_SERVER_ERROR,
            RelayError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable discriminant carried in the JSON error body, so the client can
    /// rebuild the kind without sniffing message text.
    pub fn error_type(&self) -> &'static str {
        match self {
            RelayError::Validation(_) => "validation_error",
            RelayError::Configuration(_) => "configuration_error",
            RelayError::Timeout(_) => "timeout_error",
            RelayError::RateLimited { .. } => "rate_limited",
            RelayError::UpstreamUnavailable { .. } => "upstream_unavailable",
            RelayError::Network(_) => "network_error",
            RelayError::InvalidUpstream(_) => "invalid_upstream_response",
            RelayError::Internal(_) => "internal_error",
        }
    }

    /// The one fixed sentence the widget renders for this kind.
    pub fn user_message(&self) -> &'static str {
        match self {
            RelayError::Validation(_) => "Your message couldn't be sent. Please try again.",
            RelayError::Configuration(_) =>
                "The service is not configured correctly. Please try again later.",
            RelayError::Timeout(_) => "The request took too long. Try a shorter message.",
            RelayError::RateLimited { .. } =>
                "You've reached the rate limit. Please wait a moment and try again.",
            RelayError::UpstreamUnavailable { .. } =>
                "The AI service is temporarily unavailable. Please try again later.",
            RelayError::Network(_) =>
                "Unable to connect to the AI service. Please try again later.",
            RelayError::InvalidUpstream(_) =>
                "The AI service returned an unexpected response. Please try again.",
            RelayError::Internal(_) => "Something went wrong. Please try again.",
        }
    }

    /// Kinds worth another attempt: transient upstream conditions only.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            RelayError::Timeout(_) |
                RelayError::RateLimited { .. } |
                RelayError::UpstreamUnavailable { .. }
        )
    }

    /// Rebuild a `RelayError` from a relay error body received over the
    /// wire. Falls back to the HTTP status when the discriminant is absent.
    pub fn from_wire(status: u16, body: Option<ProxyErrorResponse>) -> Self {
        let (message, kind) = match body {
            Some(b) => (b.error.message, b.error.kind),
            None => (format!("server error (status {})", status), None),
        };
        match kind.as_deref() {
            Some("validation_error") => RelayError::Validation(message),
            Some("configuration_error") => RelayError::Configuration(message),
            Some("timeout_error") => RelayError::Timeout(message),
            Some("rate_limited") => RelayError::rate_limited(message),
            Some("upstream_unavailable") => RelayError::UpstreamUnavailable { status, message },
            Some("network_error") => RelayError::Network(message),
            Some("invalid_upstream_response") => RelayError::InvalidUpstream(message),
            Some("internal_error") => RelayError::Internal(message),
            _ => match status {
                400 => RelayError::Validation(message),
                429 => RelayError::rate_limited(message),
                502 | 503 => RelayError::UpstreamUnavailable { status, message },
                504 => RelayError::Timeout(message),
                _ => RelayError::Internal(message),
            },
        }
    }

    pub fn to_response_body(&self) -> ProxyErrorResponse {
        let details = match self {
            RelayError::RateLimited { retry_after: Some(after), .. } =>
                Some(format!("retry after {}s", after.as_secs())),
            _ => None,
        };
        ProxyErrorResponse {
            error: ProxyErrorBody {
                message: self.to_string(),
                code: Some(self.status().as_u16()),
                kind: Some(self.error_type().to_string()),
                details,
            },
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        (self.status(), Json(self.to_response_body())).into_response()
    }
}

/// Upstream error messages that indicate quota or rate-limit pressure even
/// when the status alone does not say so.
pub fn looks_rate_limited(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("rate limit") ||
        lower.contains("quota") ||
        lower.contains("resource_exhausted") ||
        lower.contains("resource has been exhausted")
}

/// Cap a message for log output. Upstream error bodies can be large.
pub fn truncate_message(message: &str, max_chars: usize) -> String {
    if message.chars().count() <= max_chars {
        return message.to_string();
    }
    let kept: String = message.chars().take(max_chars).collect();
    format!("{}...", kept)
}
