//! Error types for chatrelay.

use std::time::Duration;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::relay::types::ModelSelector;

/// Result type alias for chatrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of a relay failure, exposed to clients as `kind`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    MissingCredential,
    UnknownModel,
    InvalidRequest,
    UpstreamTimeout,
    UpstreamNetworkError,
    UpstreamHttpError,
    UpstreamMalformedResponse,
    UpstreamUnexpectedShape,
    InternalError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::MissingCredential => "missing_credential",
            ErrorKind::UnknownModel => "unknown_model",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::UpstreamTimeout => "upstream_timeout",
            ErrorKind::UpstreamNetworkError => "upstream_network_error",
            ErrorKind::UpstreamHttpError => "upstream_http_error",
            ErrorKind::UpstreamMalformedResponse => "upstream_malformed_response",
            ErrorKind::UpstreamUnexpectedShape => "upstream_unexpected_shape",
            ErrorKind::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for chatrelay.
///
/// Upstream variants carry messages that have already been scrubbed of the
/// caller's credential.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("API key is required")]
    MissingCredential,

    #[error("Invalid model selected: '{model}'")]
    UnknownModel { model: String },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("{provider} did not respond within {}s", .after.as_secs())]
    UpstreamTimeout {
        provider: ModelSelector,
        after: Duration,
    },

    #[error("Network error reaching {provider}: {message}")]
    UpstreamNetwork {
        provider: ModelSelector,
        message: String,
    },

    #[error("{message}")]
    UpstreamHttp {
        provider: ModelSelector,
        status: u16,
        message: String,
    },

    #[error("{provider} returned an unreadable response: {message}")]
    UpstreamMalformed {
        provider: ModelSelector,
        message: String,
    },

    #[error("{provider} response is missing `{expected}`")]
    UpstreamUnexpectedShape {
        provider: ModelSelector,
        expected: &'static str,
    },

    #[error("Server error: {0}")]
    Internal(String),
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Internal(_) => ErrorKind::InternalError,
            Error::MissingCredential => ErrorKind::MissingCredential,
            Error::UnknownModel { .. } => ErrorKind::UnknownModel,
            Error::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Error::UpstreamTimeout { .. } => ErrorKind::UpstreamTimeout,
            Error::UpstreamNetwork { .. } => ErrorKind::UpstreamNetworkError,
            Error::UpstreamHttp { .. } => ErrorKind::UpstreamHttpError,
            Error::UpstreamMalformed { .. } => ErrorKind::UpstreamMalformedResponse,
            Error::UpstreamUnexpectedShape { .. } => ErrorKind::UpstreamUnexpectedShape,
        }
    }

    /// HTTP status reported to the browser for this failure.
    pub fn status_code(&self) -> u16 {
        match self {
            Error::MissingCredential | Error::UnknownModel { .. } | Error::InvalidRequest(_) => 400,
            Error::UpstreamTimeout { .. } => 504,
            Error::UpstreamNetwork { .. } => 503,
            // Upstream statuses outside the valid range would make axum panic
            Error::UpstreamHttp { status, .. } if (400..=599).contains(status) => *status,
            Error::UpstreamHttp { .. } => 502,
            Error::UpstreamMalformed { .. } | Error::UpstreamUnexpectedShape { .. } => 502,
            Error::Internal(_) => 500,
        }
    }

    /// Whether another attempt against the same provider may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::UpstreamTimeout { .. }
            | Error::UpstreamNetwork { .. }
            | Error::UpstreamMalformed { .. } => true,
            Error::UpstreamHttp { status, .. } => is_retryable_status(*status),
            _ => false,
        }
    }
}

/// Upstream statuses that are typically transient.
pub fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.status_code())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);

        let body = serde_json::json!({
            "error": self.to_string(),
            "status": status.as_u16(),
            "kind": self.kind(),
        });

        (status, axum::Json(body)).into_response()
    }
}
