//! HTTP error type shared by every handler.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::auth::AuthError;
use crate::hub::HubError;
use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("{0} is unavailable")]
    ServiceUnavailable(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// HTTP status and stable machine-readable code.
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            Self::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
            Self::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            Self::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "unauthorized"),
            Self::Forbidden(_) => (StatusCode::FORBIDDEN, "forbidden"),
            Self::ServiceUnavailable(_) => (StatusCode::SERVICE_UNAVAILABLE, "unavailable"),
            Self::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        self.classify().0
    }
}

/// JSON body of every error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: &'static str,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();

        // Internal details stay in the log.
        let error = match &self {
            Self::Internal(detail) => {
                error!(code, %detail, "request failed");
                "internal server error".to_string()
            }
            Self::ServiceUnavailable(_) => {
                warn!(code, error = %self, "request refused");
                self.to_string()
            }
            _ => {
                debug!(code, error = %self, "client error");
                self.to_string()
            }
        };

        (status, Json(ErrorResponse { error, code })).into_response()
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::InvalidToken
            | AuthError::InvalidCredentials
            | AuthError::UserNotFound => Self::Unauthorized(err.to_string()),
            AuthError::InvalidChallenge => Self::BadRequest(err.to_string()),
            AuthError::InsufficientPermissions(msg) => Self::Forbidden(msg),
            AuthError::ProviderUnavailable => Self::ServiceUnavailable("login".to_string()),
            AuthError::Internal(msg) => Self::Internal(msg),
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(what) => Self::NotFound(what),
            other => Self::Internal(other.to_string()),
        }
    }
}

impl From<HubError> for ApiError {
    fn from(err: HubError) -> Self {
        match err {
            HubError::Validation(msg) => Self::BadRequest(msg),
            HubError::NotFound(what) => Self::NotFound(what),
            HubError::Storage(source) => Self::Internal(source.to_string()),
            HubError::Closed => Self::ServiceUnavailable("hub".to_string()),
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
