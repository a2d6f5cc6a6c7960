/// Unified error types for Doorkeeper
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for the authentication core
#[derive(Error, Debug)]
pub enum AuthError {
    /// Bad, expired or already-used token, unknown bearer key, failed passkey assertion
    #[error("Invalid credential")]
    InvalidCredential,

    /// No credential presented where one is required
    #[error("Authentication required")]
    Unauthorized,

    /// Valid identity without the required privilege
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Duplicate registration
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Too many failed bearer attempts from one source
    #[error("Rate limit exceeded")]
    RateLimited { retry_after: std::time::Duration },

    /// Missing record, or a record owned by somebody else
    #[error("Not found: {0}")]
    NotFound(String),

    /// Malformed input
    #[error("Validation error: {0}")]
    Validation(String),

    /// Database errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Schema migration errors
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// Outbound mail errors
    #[error("Mail error: {0}")]
    Mail(String),

    /// WebAuthn ceremony errors
    #[error("WebAuthn error: {0}")]
    WebAuthn(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Internal server errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// JSON error body
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl AuthError {
    /// HTTP status and stable error code for this error
    pub fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            AuthError::InvalidCredential => (StatusCode::UNAUTHORIZED, "InvalidCredential"),
            AuthError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized"),
            AuthError::Forbidden(_) => (StatusCode::FORBIDDEN, "Forbidden"),
            AuthError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
            AuthError::RateLimited { .. } => (StatusCode::TOO_MANY_REQUESTS, "RateLimited"),
            AuthError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
            AuthError::Validation(_) => (StatusCode::BAD_REQUEST, "InvalidRequest"),
            AuthError::WebAuthn(_) => (StatusCode::BAD_REQUEST, "WebAuthnFailed"),
            AuthError::Database(_)
            | AuthError::Migration(_)
            | AuthError::Mail(_)
            | AuthError::Io(_)
            | AuthError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "InternalError"),
        }
    }
}

/// Convert AuthError to HTTP response
impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let (status, error_code) = self.status_and_code();

        let message = match &self {
            AuthError::Database(_)
            | AuthError::Migration(_)
            | AuthError::Mail(_)
            | AuthError::Io(_)
            | AuthError::Internal(_) => {
                // Don't leak details
                tracing::error!(error = %self, "Request failed with internal error");
                "Internal server error".to_string()
            }
            // Ceremony failures are logged but reported generically
            AuthError::WebAuthn(detail) => {
                tracing::warn!(detail = %detail, "Passkey ceremony rejected");
                "Passkey verification failed".to_string()
            }
            _ => self.to_string(),
        };

        let mut response = (
            status,
            Json(ErrorResponse {
                error: error_code.to_string(),
                message,
            }),
        )
            .into_response();

        if let AuthError::RateLimited { retry_after } = self {
            if let Ok(value) = retry_after.as_secs().max(1).to_string().parse() {
                response
                    .headers_mut()
                    .insert(axum::http::header::RETRY_AFTER, value);
            }
        }

        response
    }
}

impl From<webauthn_rs::prelude::WebauthnError> for AuthError {
    fn from(e: webauthn_rs::prelude::WebauthnError) -> Self {
        AuthError::WebAuthn(e.to_string())
    }
}

/// Result type alias for authentication operations
pub type AuthResult<T> = Result<T, AuthError>;
