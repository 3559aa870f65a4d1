/// Unified error types for the Opsdesk back office
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the service
#[derive(Error, Debug)]
pub enum OpsError {
    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Malformed input, rejected at the boundary
    #[error("Validation error: {0}")]
    Validation(String),

    /// Email or username already registered
    #[error("Email or username already registered")]
    DuplicateRegistration,

    /// Authentication failure. Deliberately identical for unknown
    /// account and wrong password to avoid account enumeration.
    #[error("Invalid email or password")]
    BadCredentials,

    /// Account locked after repeated failed logins or by an administrator
    #[error("Account is locked")]
    AccountLocked,

    /// Account disabled by an administrator
    #[error("Account is disabled")]
    AccountDisabled,

    /// Refresh token not present in the store
    #[error("Refresh token not found; please log in again")]
    TokenNotFound,

    /// Refresh token past its expiry (deleted on detection)
    #[error("Refresh token has expired; please log in again")]
    TokenExpired,

    /// Referenced role/permission/plan missing
    #[error("Not found: {0}")]
    NotFound(String),

    /// Deleting a role or permission that is still referenced
    #[error("Resource in use: {0}")]
    ResourceInUse(String),

    /// Storage-layer failure while creating a resource. The cause is
    /// logged but never exposed to the caller.
    #[error("Resource creation failed: {0}")]
    ResourceCreation(String),

    /// Authorization errors
    #[error("Not authorized: {0}")]
    Authorization(String),

    /// Access token errors (signature, expiry, malformed)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Wire error response format
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

/// Convert OpsError to HTTP response
impl IntoResponse for OpsError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            OpsError::Validation(_) => {
                (StatusCode::BAD_REQUEST, "ValidationError", self.to_string())
            }
            OpsError::DuplicateRegistration => (
                StatusCode::CONFLICT,
                "DuplicateRegistration",
                self.to_string(),
            ),
            OpsError::BadCredentials => {
                (StatusCode::UNAUTHORIZED, "BadCredentials", self.to_string())
            }
            OpsError::AccountLocked => {
                (StatusCode::UNAUTHORIZED, "AccountLocked", self.to_string())
            }
            OpsError::AccountDisabled => (
                StatusCode::UNAUTHORIZED,
                "AccountDisabled",
                self.to_string(),
            ),
            OpsError::TokenNotFound => {
                (StatusCode::UNAUTHORIZED, "TokenNotFound", self.to_string())
            }
            OpsError::TokenExpired => {
                (StatusCode::UNAUTHORIZED, "TokenExpired", self.to_string())
            }
            OpsError::Authentication(_) => (
                StatusCode::UNAUTHORIZED,
                "AuthenticationRequired",
                self.to_string(),
            ),
            OpsError::Authorization(_) => {
                (StatusCode::FORBIDDEN, "Forbidden", self.to_string())
            }
            OpsError::NotFound(_) => {
                (StatusCode::NOT_FOUND, "ResourceNotFound", self.to_string())
            }
            OpsError::ResourceInUse(_) => {
                (StatusCode::CONFLICT, "ResourceInUse", self.to_string())
            }
            OpsError::ResourceCreation(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "ResourceCreationFailure",
                "A resource could not be created".to_string(), // Don't leak details
            ),
            OpsError::Database(_) | OpsError::Internal(_) | OpsError::Io(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "InternalServerError",
                "Internal server error".to_string(), // Don't leak details
            ),
        };

        let body = Json(ErrorResponse {
            error: error_code.to_string(),
            message,
        });

        (status, body).into_response()
    }
}

/// Result type alias for back office operations
pub type OpsResult<T> = Result<T, OpsError>;
