use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::middleware::RateLimitError;

/// Application-wide error types with appropriate HTTP status codes.
///
/// The gating stages answer 401/429 themselves and never surface an
/// `AppError`; these variants cover startup and handler failures. JSON-RPC
/// level failures are reported inside the JSON-RPC envelope instead.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<RateLimitError> for AppError {
    fn from(e: RateLimitError) -> Self {
        AppError::ConfigError(format!("Invalid rate limit settings: {e}"))
    }
}

/// Error response body for API endpoints.
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        // Log the full error details server-side for debugging
        // but only expose sanitized messages to clients
        tracing::error!(error = %self, "Request failed");

        let (status, error_type, message) = match &self {
            AppError::ConfigError(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "config_error",
                "Service configuration error. Please contact support.",
            ),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.as_str()),
        };

        let body = ErrorResponse {
            error: error_type.to_string(),
            message: message.to_string(),
            details: None, // Never expose internal details to clients
        };

        (status, axum::Json(body)).into_response()
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
