// src/error.rs

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{error, warn};

/// Fallback error body used when the upstream response carries no parseable
/// error object (network failure, truncated body, non-JSON payload).
pub fn default_upstream_error() -> Value {
    json!({ "code": 500, "message": "Unknown error." })
}

/// Represents the possible errors that can occur in the application.
///
/// Implements `IntoResponse` so handlers and middleware can propagate errors
/// with `?` and still produce the documented `{code, message, ...}` JSON body.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Reqwest HTTP client error: {0}")]
    Reqwest(#[from] reqwest::Error),

    /// The client omitted the proxy access key from its request.
    #[error("No key provided")]
    MissingClientKey,

    /// The client supplied an access key that does not match the shared secret.
    #[error("Invalid client key")]
    InvalidClientKey,

    /// Every key in the pool is inside its failure cooldown window.
    #[error("All keys are expired")]
    PoolExhausted,

    /// The forwarding loop spent its whole retry budget on quota errors.
    #[error("Recursion limit reached without resolution")]
    RetryLimitExceeded,

    /// Non-quota upstream failure, passed through to the client verbatim.
    #[error("Upstream service error (code {code})")]
    Upstream { code: u16, error: Value },

    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status this error maps to on the client-facing side.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingClientKey => StatusCode::BAD_REQUEST,
            Self::InvalidClientKey => StatusCode::UNAUTHORIZED,
            Self::PoolExhausted => StatusCode::FORBIDDEN,
            Self::Upstream { code, .. } => {
                StatusCode::from_u16(*code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
            }
            Self::Config(_)
            | Self::Io(_)
            | Self::Reqwest(_)
            | Self::RetryLimitExceeded
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Internal failure details stay in the logs.
    fn client_message(&self) -> &str {
        match self {
            Self::MissingClientKey => "No key provided.",
            Self::InvalidClientKey => "Invalid key.",
            Self::PoolExhausted => "All keys are expired.",
            Self::RetryLimitExceeded => "Recursion limit reached without resolution.",
            _ => "Unknown error.",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        if status.is_server_error() {
            error!(error = %self, status = status.as_u16(), "Request failed");
        } else {
            warn!(error = %self, status = status.as_u16(), "Request rejected");
        }

        // Upstream errors are passed through in their original shape, with the
        // numeric code merged in so clients always see `{code, message, ...}`.
        let body = match self {
            Self::Upstream { code, error } => {
                let mut body = match error {
                    Value::Object(map) => Value::Object(map),
                    other => json!({ "message": other }),
                };
                body["code"] = json!(code);
                body
            }
            other => json!({
                "code": status.as_u16(),
                "message": other.client_message(),
            }),
        };

        (status, Json(body)).into_response()
    }
}

/// Result type alias for the application.
pub type Result<T, E = AppError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_follow_the_error_taxonomy() {
        assert_eq!(AppError::MissingClientKey.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(AppError::InvalidClientKey.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AppError::PoolExhausted.status_code(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::RetryLimitExceeded.status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn upstream_error_uses_embedded_code() {
        let err = AppError::Upstream {
            code: 404,
            error: json!({ "code": 404, "message": "Not found." }),
        };
        assert_eq!(err.status_code(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn upstream_error_with_bogus_code_falls_back_to_500() {
        let err = AppError::Upstream {
            code: 42,
            error: default_upstream_error(),
        };
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn pool_exhausted_renders_fixed_message() {
        let response = AppError::PoolExhausted.into_response();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["code"], 403);
        assert_eq!(body["message"], "All keys are expired.");
    }

    #[tokio::test]
    async fn upstream_error_body_is_passed_through() {
        let err = AppError::Upstream {
            code: 400,
            error: json!({
                "code": 400,
                "message": "Bad Request",
                "errors": [{ "reason": "badRequest" }],
            }),
        };
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["errors"][0]["reason"], "badRequest");
        assert_eq!(body["code"], 400);
    }
}
