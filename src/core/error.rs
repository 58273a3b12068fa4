//! Error types and handling for the routing proxy.
//!
//! This module provides a unified error type [`AppError`] that wraps various error sources
//! and converts them into the normalized `{error: {message, type, code}}` wire shape.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// Main error type for the application.
///
/// All errors in the application should be converted to this type for consistent handling.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed client input (bad JSON body, missing admin fields)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Authentication failure on a protected route
    #[error("Unauthorized")]
    Unauthorized,

    /// Request targets a wire format the proxy does not speak
    #[error("Unsupported request format: {0}")]
    UnsupportedFormat(String),

    /// No handler matched the request path
    #[error("Not found")]
    NotFound,

    /// HTTP request errors from the reqwest client
    #[error("Upstream request error: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic internal server errors with custom message
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status for this error.
    fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) | AppError::UnsupportedFormat(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::Request(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// Machine-readable error code for the normalized body.
    fn code(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) => "bad_request",
            AppError::Unauthorized => "unauthorized",
            AppError::UnsupportedFormat(_) => "unsupported_format",
            AppError::NotFound => "not_found",
            AppError::Request(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                "internal_error"
            }
        }
    }

    /// Error family, in the OpenAI wire vocabulary.
    fn error_type(&self) -> &'static str {
        match self {
            AppError::BadRequest(_) | AppError::UnsupportedFormat(_) | AppError::NotFound => {
                "invalid_request_error"
            }
            AppError::Unauthorized => "authentication_error",
            AppError::Request(_) | AppError::Serialization(_) | AppError::Internal(_) => {
                "api_error"
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": {
                "message": self.to_string(),
                "type": self.error_type(),
                "code": self.code(),
            }
        }));

        (status, body).into_response()
    }
}

/// Convenience type alias for Results using [`AppError`].
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = AppError::Unauthorized;
        assert_eq!(err.to_string(), "Unauthorized");

        let err = AppError::Internal("test error".to_string());
        assert_eq!(err.to_string(), "Internal server error: test error");
    }

    #[test]
    fn test_unauthorized_response() {
        let err = AppError::Unauthorized;
        assert_eq!(err.code(), "unauthorized");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_unsupported_format_response() {
        let err = AppError::UnsupportedFormat("anthropic messages".to_string());
        assert_eq!(err.code(), "unsupported_format");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_internal_error_response() {
        let err = AppError::Internal("custom error".to_string());
        assert_eq!(err.code(), "internal_error");
        let response = err.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_not_found_response() {
        let response = AppError::NotFound.into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[test]
    fn test_error_from_serde_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid").unwrap_err();
        let app_err: AppError = json_err.into();
        assert!(matches!(app_err, AppError::Serialization(_)));
    }
}
