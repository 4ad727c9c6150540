//! Credential resolution.
//!
//! [`CredentialValidator`] turns request headers into a [`Principal`]. The
//! production implementation is [`TokenValidator`]; [`InsecureValidator`] is
//! a separate implementation chosen at startup when insecure mode is
//! explicitly enabled, so the production path carries no bypass branch.

use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use tracing::warn;

use super::api_key::hash_api_key;
use super::credential::Credential;
use super::error::AuthError;
use super::session::SessionSigner;
use crate::models::Principal;
use crate::store::{User, UserStore};

#[async_trait]
pub trait CredentialValidator: Send + Sync {
    /// Resolve the caller's principal from request headers.
    ///
    /// Pure read: never mutates or extends the presented credential.
    async fn resolve(&self, headers: &HeaderMap) -> Result<Principal, AuthError>;
}

/// Verifies bearer API keys and signed session tokens against the user store.
pub struct TokenValidator {
    sessions: SessionSigner,
    store: Arc<dyn UserStore>,
}

impl TokenValidator {
    pub fn new(sessions: SessionSigner, store: Arc<dyn UserStore>) -> Self {
        Self { sessions, store }
    }

    async fn resolve_api_key(&self, key: &str) -> Result<User, AuthError> {
        let hash = hash_api_key(key);
        self.store
            .find_by_api_key_hash(&hash)
            .await?
            .ok_or(AuthError::InvalidApiKey)
    }

    async fn resolve_session(&self, token: &str) -> Result<User, AuthError> {
        let claims = self.sessions.verify(token)?;
        let user_id = claims.user_id()?;
        // A deleted subject is a bad credential, not a server fault.
        self.store
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidToken)
    }
}

#[async_trait]
impl CredentialValidator for TokenValidator {
    async fn resolve(&self, headers: &HeaderMap) -> Result<Principal, AuthError> {
        let credential = Credential::from_headers(headers)?.ok_or(AuthError::MissingCredentials)?;

        let user = match &credential {
            Credential::ApiKey(key) => self.resolve_api_key(key).await?,
            Credential::SessionToken(token) => self.resolve_session(token).await?,
        };

        if !user.active {
            return Err(AuthError::InactiveUser);
        }

        Ok(user.principal())
    }
}

/// Development-only validator that ignores credentials.
///
/// Every request resolves to the user named by `INSECURE_USER_EMAIL` when it
/// exists, otherwise to a fixed test principal.
pub struct InsecureValidator {
    store: Arc<dyn UserStore>,
    email: Option<String>,
}

impl InsecureValidator {
    pub fn new(store: Arc<dyn UserStore>, email: Option<String>) -> Self {
        Self { store, email }
    }

    /// Principal used when no configured user is available.
    pub fn test_principal() -> Principal {
        Principal {
            id: 0,
            email: "insecure@localhost".to_string(),
            name: "Insecure Test User".to_string(),
            active: true,
        }
    }
}

#[async_trait]
impl CredentialValidator for InsecureValidator {
    async fn resolve(&self, _headers: &HeaderMap) -> Result<Principal, AuthError> {
        let Some(email) = &self.email else {
            return Ok(Self::test_principal());
        };

        match self.store.find_by_email(email).await? {
            Some(user) => Ok(user.principal()),
            None => {
                warn!(email = %email, "INSECURE_USER_EMAIL not found, using test principal");
                Ok(Self::test_principal())
            }
        }
    }
}
