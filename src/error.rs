use axum::http::header::RETRY_AFTER;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;
use thiserror::Error;

use crate::auth::AuthError;
use crate::oauth::OAuthError;
use crate::store::StoreError;

/// Message shown for every failed login, whatever the cause.
///
/// CSRF mismatches and identity-provider failures deliberately share one
/// message so a caller cannot tell which check rejected them.
pub const LOGIN_FAILED_MESSAGE: &str = "Login failed, please retry login";

/// Application-wide error type and the single place typed errors become HTTP.
///
/// Lower layers (`auth`, `oauth`, `store`) return their own error enums;
/// they are converted into `AppError` at the handler/middleware boundary and
/// rendered here as `{"error": "<message>"}` with the matching status code.
#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed request or credential shape (400).
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Missing, invalid, expired or forged credential (401).
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Valid identity without the required rights (403).
    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Client exceeded its token bucket (429).
    #[error("Rate limit exceeded")]
    RateLimited { retry_after_secs: u64 },

    /// OAuth handshake rejected before identity was established (400).
    ///
    /// The inner string is for server logs only.
    #[error("Login rejected: {0}")]
    LoginRejected(String),

    /// Identity provider failed or timed out (502).
    ///
    /// The inner string is for server logs only.
    #[error("Identity provider failure: {0}")]
    Upstream(String),

    #[error("Internal server error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Error response body for every failed request.
#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
}

impl AppError {
    /// HTTP status for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            AppError::LoginRejected(_) => StatusCode::BAD_REQUEST,
            AppError::Upstream(_) => StatusCode::BAD_GATEWAY,
            AppError::Internal(_) | AppError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing message. Never carries internal details for 5xx or
    /// login failures.
    pub fn public_message(&self) -> &str {
        match self {
            AppError::BadRequest(msg)
            | AppError::Unauthorized(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg) => msg.as_str(),
            AppError::RateLimited { .. } => "Rate limit exceeded. Please retry later.",
            AppError::LoginRejected(_) | AppError::Upstream(_) => LOGIN_FAILED_MESSAGE,
            AppError::Internal(_) => {
                "An internal error occurred. Please contact support if the issue persists."
            }
            AppError::ConfigError(_) => "Service configuration error. Please contact support.",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        // Full detail stays server-side; 4xx noise is logged where it is
        // classified (auth middleware, OAuth coordinator).
        if status.is_server_error() {
            tracing::error!(error = %self, status = status.as_u16(), "Request failed");
        }

        let body = axum::Json(ErrorResponse {
            error: self.public_message(),
        });

        match self {
            AppError::RateLimited { retry_after_secs } => (
                status,
                [(RETRY_AFTER, retry_after_secs.to_string())],
                body,
            )
                .into_response(),
            _ => (status, body).into_response(),
        }
    }
}

impl From<AuthError> for AppError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::MalformedHeader(msg) => AppError::BadRequest(msg.to_string()),
            AuthError::Storage(e) => AppError::from(e),
            other => AppError::Unauthorized(other.to_string()),
        }
    }
}

impl From<OAuthError> for AppError {
    fn from(err: OAuthError) -> Self {
        match err {
            OAuthError::UnknownProvider(name) => {
                AppError::NotFound(format!("Unknown identity provider: {name}"))
            }
            OAuthError::InvalidLoginRequest(msg) => AppError::BadRequest(msg),
            OAuthError::AccountDisabled => {
                AppError::Forbidden("This account has been disabled".to_string())
            }
            OAuthError::Provider(e) => AppError::Upstream(e.to_string()),
            OAuthError::Store(e) => AppError::from(e),
            OAuthError::Session(e) => AppError::Internal(e.to_string()),
            rejected => AppError::LoginRejected(rejected.to_string()),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::UserNotFound(id) => AppError::NotFound(format!("User {id} not found")),
            StoreError::Unavailable(msg) => AppError::Internal(format!("storage unavailable: {msg}")),
        }
    }
}

/// Convenience type alias for Results with AppError.
pub type AppResult<T> = Result<T, AppError>;
