use thiserror::Error;

use super::provider::ProviderError;
use super::state::StateTokenError;
use crate::auth::SessionTokenError;
use crate::store::StoreError;

/// Reasons an OAuth login can fail.
///
/// Display strings are for server logs. Clients see the generic
/// login-failed message for every variant that `AppError` maps to
/// `LoginRejected` or `Upstream`.
#[derive(Debug, Error)]
pub enum OAuthError {
    #[error("unknown identity provider: {0}")]
    UnknownProvider(String),

    /// Bad `cli` / `redirect_port` parameters on initiation.
    #[error("{0}")]
    InvalidLoginRequest(String),

    #[error("state cookie or state parameter missing")]
    MissingState,

    #[error("state parameter does not match state cookie")]
    StateMismatch,

    #[error("state token rejected: {0}")]
    InvalidState(#[from] StateTokenError),

    #[error("state token already used")]
    StateReplayed,

    /// Callback query string that does not deserialize, e.g. a repeated `state`.
    #[error("malformed callback query: {0}")]
    MalformedCallback(String),

    #[error("authorization code missing from callback")]
    MissingCode,

    /// The user declined consent at the provider.
    #[error("provider returned error: {0}")]
    Denied(String),

    #[error("account is disabled")]
    AccountDisabled,

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error("user store failed during login: {0}")]
    Store(#[from] StoreError),

    #[error("could not mint session: {0}")]
    Session(#[from] SessionTokenError),
}

impl OAuthError {
    /// Low-cardinality label for the login outcome metric.
    pub fn outcome(&self) -> &'static str {
        match self {
            OAuthError::UnknownProvider(_) => "unknown_provider",
            OAuthError::InvalidLoginRequest(_) => "invalid_request",
            OAuthError::MissingState | OAuthError::StateMismatch => "csrf",
            OAuthError::InvalidState(_) => "invalid_state",
            OAuthError::StateReplayed => "replayed",
            OAuthError::MalformedCallback(_) => "malformed_callback",
            OAuthError::MissingCode => "missing_code",
            OAuthError::Denied(_) => "denied",
            OAuthError::AccountDisabled => "disabled",
            OAuthError::Provider(_) => "provider_error",
            OAuthError::Store(_) => "store_error",
            OAuthError::Session(_) => "session_error",
        }
    }
}
