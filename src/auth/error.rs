use thiserror::Error;

use super::session::SessionTokenError;
use crate::store::StoreError;

/// Why a request's credentials could not be resolved to a principal.
///
/// Display strings are safe to show to clients.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Authentication required")]
    MissingCredentials,

    /// Authorization header present but not in `Bearer <token>` shape.
    #[error("{0}")]
    MalformedHeader(&'static str),

    /// Bad signature, wrong algorithm, unparseable token or unknown subject.
    #[error("Invalid or expired credentials")]
    InvalidToken,

    #[error("Session has expired, please log in again")]
    Expired,

    #[error("Invalid API key")]
    InvalidApiKey,

    #[error("Account is disabled")]
    InactiveUser,

    /// Durable storage failed while resolving the credential.
    #[error("credential lookup failed: {0}")]
    Storage(#[from] StoreError),
}

impl AuthError {
    /// Low-cardinality label for the auth failure metric.
    pub fn reason(&self) -> &'static str {
        match self {
            AuthError::MissingCredentials => "missing",
            AuthError::MalformedHeader(_) => "malformed",
            AuthError::InvalidToken => "invalid_token",
            AuthError::Expired => "expired",
            AuthError::InvalidApiKey => "invalid_api_key",
            AuthError::InactiveUser => "inactive",
            AuthError::Storage(_) => "storage",
        }
    }

    /// True when resolution failed because of the caller's credential rather
    /// than the server.
    pub fn is_credential_failure(&self) -> bool {
        !matches!(self, AuthError::Storage(_))
    }
}

impl From<SessionTokenError> for AuthError {
    fn from(err: SessionTokenError) -> Self {
        match err {
            SessionTokenError::Expired => AuthError::Expired,
            _ => AuthError::InvalidToken,
        }
    }
}
