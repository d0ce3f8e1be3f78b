// Error handling types for the API

use axum::{http::StatusCode, response::IntoResponse, Json};
use serde::Serialize;
use std::fmt;
use tracing::error;

/// API error types
#[derive(Debug)]
pub enum ApiError {
    Unauthorized(String),
    BadRequest(String),
    NotFound(String),
    InternalServer(String),
    DatabaseError(sqlx::Error),
    /// Login payload failed the signature check or lacked signed fields
    UntrustedPayload,
    /// Login payload is signed correctly but older than the freshness window
    OutdatedPayload,
    /// Login provider secret is not configured; logins fail closed
    ProviderNotConfigured,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::InternalServer(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::DatabaseError(e) => write!(f, "Database Error: {}", e),
            ApiError::UntrustedPayload => write!(f, "Untrusted login payload"),
            ApiError::OutdatedPayload => write!(f, "Outdated login payload"),
            ApiError::ProviderNotConfigured => write!(f, "Login provider not configured"),
        }
    }
}

/// JSON error response structure
#[derive(Serialize)]
pub struct ErrorResponse {
    pub status: &'static str,
    pub message: String,
    pub code: String,
}

impl ApiError {
    /// Status code, client-facing message and machine-readable code
    fn parts(self) -> (StatusCode, String, &'static str) {
        match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg, "UNAUTHORIZED"),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg, "BAD_REQUEST"),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg, "NOT_FOUND"),
            ApiError::InternalServer(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                msg,
                "INTERNAL_SERVER_ERROR",
            ),
            ApiError::DatabaseError(e) => {
                error!(error = %e, "Database error occurred");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Database operation failed".to_string(),
                    "DATABASE_ERROR",
                )
            }
            ApiError::UntrustedPayload => (
                StatusCode::BAD_REQUEST,
                "Login data could not be verified".to_string(),
                "UNTRUSTED_PAYLOAD",
            ),
            ApiError::OutdatedPayload => (
                StatusCode::BAD_REQUEST,
                "Login data is outdated, please log in again".to_string(),
                "OUTDATED_PAYLOAD",
            ),
            ApiError::ProviderNotConfigured => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Login is temporarily unavailable".to_string(),
                "PROVIDER_NOT_CONFIGURED",
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, message, code) = self.parts();

        let error_response = ErrorResponse {
            status: "error",
            message,
            code: code.to_string(),
        };

        (status, Json(error_response)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_login_errors_map_to_bad_request() {
        let (status, _, code) = ApiError::UntrustedPayload.parts();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "UNTRUSTED_PAYLOAD");

        let (status, _, code) = ApiError::OutdatedPayload.parts();
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(code, "OUTDATED_PAYLOAD");
    }

    #[test]
    fn test_untrusted_and_outdated_messages_differ() {
        let (_, untrusted, _) = ApiError::UntrustedPayload.parts();
        let (_, outdated, _) = ApiError::OutdatedPayload.parts();
        assert_ne!(untrusted, outdated);
    }

    #[test]
    fn test_database_error_hides_details() {
        let (status, message, code) = ApiError::DatabaseError(sqlx::Error::PoolTimedOut).parts();
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(message, "Database operation failed");
        assert_eq!(code, "DATABASE_ERROR");
    }
}
