//! Authentication errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;

/// Authentication errors.
#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was presented.
    #[error("missing authorization header")]
    MissingAuthHeader,

    /// The authorization header is not a bearer token.
    #[error("invalid authorization header format")]
    InvalidAuthHeader,

    /// The session token is unknown or expired.
    #[error("invalid or expired session")]
    InvalidToken,

    /// The session points at a user that no longer exists.
    #[error("user not found")]
    UserNotFound,

    /// The login challenge is unknown, expired, or already used.
    #[error("invalid or expired login attempt")]
    InvalidChallenge,

    /// The identity provider rejected the login.
    #[error("invalid credentials")]
    InvalidCredentials,

    /// Insufficient permissions.
    #[error("insufficient permissions: {0}")]
    InsufficientPermissions(String),

    /// Login is not configured on this server.
    #[error("no identity provider configured")]
    ProviderUnavailable,

    /// Internal error.
    #[error("internal auth error: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::InvalidToken
            | AuthError::UserNotFound
            | AuthError::InvalidCredentials => StatusCode::UNAUTHORIZED,
            AuthError::InvalidChallenge => StatusCode::BAD_REQUEST,
            AuthError::InsufficientPermissions(_) => StatusCode::FORBIDDEN,
            AuthError::ProviderUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "missing_auth_header",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::InvalidToken => "invalid_token",
            AuthError::UserNotFound => "user_not_found",
            AuthError::InvalidChallenge => "invalid_challenge",
            AuthError::InvalidCredentials => "invalid_credentials",
            AuthError::InsufficientPermissions(_) => "insufficient_permissions",
            AuthError::ProviderUnavailable => "provider_unavailable",
            AuthError::Internal(_) => "internal_error",
        }
    }
}

/// Error response body.
#[derive(Debug, Serialize)]
pub struct AuthErrorResponse {
    pub error: String,
    pub error_code: String,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let body = Json(AuthErrorResponse {
            error: self.to_string(),
            error_code: self.error_code().to_string(),
        });

        (self.status_code(), body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_error_display() {
        let err = AuthError::MissingAuthHeader;
        assert_eq!(err.to_string(), "missing authorization header");

        let err = AuthError::InsufficientPermissions("admin role required".to_string());
        assert_eq!(
            err.to_string(),
            "insufficient permissions: admin role required"
        );
    }

    #[test]
    fn test_auth_error_status() {
        assert_eq!(AuthError::InvalidToken.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(AuthError::InvalidChallenge.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AuthError::InsufficientPermissions(String::new()).status_code(),
            StatusCode::FORBIDDEN
        );
    }
}
