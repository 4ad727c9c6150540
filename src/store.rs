//! Durable user storage.
//!
//! The gatekeeping layer only needs a handful of user-record operations, so
//! storage is modelled as the [`UserStore`] trait. [`InMemoryUserStore`] is the
//! bundled implementation used by the binary and the test suite; a database
//! backed store plugs in behind the same trait.
//!
//! # Not Found vs. Unavailable
//!
//! Lookups return `Ok(None)` when a record does not exist. `Err` is reserved
//! for genuine storage failures so callers never confuse "someone presented a
//! stale credential" with "the store is down".

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::RwLock;

use crate::models::Principal;

/// Storage failure.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A write targeted a user id that does not exist.
    #[error("user {0} not found")]
    UserNotFound(i64),

    /// The backing store could not be reached or returned an error.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
}

/// A local user record.
#[derive(Debug, Clone)]
pub struct User {
    pub id: i64,
    pub email: String,
    pub name: String,
    pub active: bool,
    /// Identity provider that created this account (e.g. `github`).
    pub provider: String,
    /// Stable subject identifier at the provider.
    pub provider_user_id: String,
    pub api_key_hash: Option<String>,
    pub api_key_prefix: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    /// The request-scoped view of this user.
    pub fn principal(&self) -> Principal {
        Principal {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            active: self.active,
        }
    }
}

/// Identity asserted by an external provider after a verified login.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    /// Stable subject identifier at the provider.
    pub subject: String,
    /// Verified email address.
    pub email: String,
    /// Display name (falls back to the email's local part when absent).
    pub name: String,
}

/// Persisted half of an API key: the hash and the display prefix only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredApiKey {
    pub hash: String,
    pub prefix: String,
}

/// Durable user storage used by credential resolution and the OAuth flow.
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError>;

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Look up the owner of an API key by the key's hash.
    async fn find_by_api_key_hash(&self, hash: &str) -> Result<Option<User>, StoreError>;

    /// Create or update the user keyed by `(provider, identity.subject)`.
    ///
    /// Existing users keep their id, active flag and API key; email and name
    /// are refreshed from the provider.
    async fn upsert_oauth_user(
        &self,
        provider: &str,
        identity: &ExternalIdentity,
    ) -> Result<User, StoreError>;

    /// Set or clear (`None`) the user's API key.
    async fn set_api_key(&self, user_id: i64, key: Option<StoredApiKey>) -> Result<(), StoreError>;

    async fn set_active(&self, user_id: i64, active: bool) -> Result<(), StoreError>;
}

// =============================================================================
// In-memory implementation
// =============================================================================

#[derive(Default)]
struct Records {
    next_id: i64,
    users: HashMap<i64, User>,
}

/// Process-local [`UserStore`].
///
/// Lookups by email and key hash are linear scans; this store is meant for
/// development deployments and tests, not for large user bases.
#[derive(Clone, Default)]
pub struct InMemoryUserStore {
    records: Arc<RwLock<Records>>,
}

impl InMemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored users.
    pub async fn len(&self) -> usize {
        self.records.read().await.users.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl UserStore for InMemoryUserStore {
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        Ok(self.records.read().await.users.get(&id).cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_api_key_hash(&self, hash: &str) -> Result<Option<User>, StoreError> {
        let records = self.records.read().await;
        Ok(records
            .users
            .values()
            .find(|u| u.api_key_hash.as_deref() == Some(hash))
            .cloned())
    }

    async fn upsert_oauth_user(
        &self,
        provider: &str,
        identity: &ExternalIdentity,
    ) -> Result<User, StoreError> {
        let mut records = self.records.write().await;
        let now = Utc::now();

        if let Some(existing) = records
            .users
            .values_mut()
            .find(|u| u.provider == provider && u.provider_user_id == identity.subject)
        {
            existing.email = identity.email.clone();
            existing.name = identity.name.clone();
            existing.updated_at = now;
            return Ok(existing.clone());
        }

        records.next_id += 1;
        let user = User {
            id: records.next_id,
            email: identity.email.clone(),
            name: identity.name.clone(),
            active: true,
            provider: provider.to_string(),
            provider_user_id: identity.subject.clone(),
            api_key_hash: None,
            api_key_prefix: None,
            created_at: now,
            updated_at: now,
        };
        records.users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn set_api_key(&self, user_id: i64, key: Option<StoredApiKey>) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let user = records
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;

        let (hash, prefix) = match key {
            Some(StoredApiKey { hash, prefix }) => (Some(hash), Some(prefix)),
            None => (None, None),
        };
        user.api_key_hash = hash;
        user.api_key_prefix = prefix;
        user.updated_at = Utc::now();
        Ok(())
    }

    async fn set_active(&self, user_id: i64, active: bool) -> Result<(), StoreError> {
        let mut records = self.records.write().await;
        let user = records
            .users
            .get_mut(&user_id)
            .ok_or(StoreError::UserNotFound(user_id))?;
        user.active = active;
        user.updated_at = Utc::now();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn identity(subject: &str, email: &str) -> ExternalIdentity {
        ExternalIdentity {
            subject: subject.to_string(),
            email: email.to_string(),
            name: "Ada".to_string(),
        }
    }

    #[tokio::test]
    async fn test_upsert_creates_then_updates() {
        let store = InMemoryUserStore::new();

        let created = store
            .upsert_oauth_user("github", &identity("42", "ada@example.com"))
            .await
            .unwrap();
        assert!(created.active);
        assert_eq!(created.id, 1);

        let updated = store
            .upsert_oauth_user("github", &identity("42", "ada@new.example.com"))
            .await
            .unwrap();
        assert_eq!(updated.id, created.id);
        assert_eq!(updated.email, "ada@new.example.com");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_same_subject_different_provider_is_a_new_user() {
        let store = InMemoryUserStore::new();
        let a = store
            .upsert_oauth_user("github", &identity("42", "a@example.com"))
            .await
            .unwrap();
        let b = store
            .upsert_oauth_user("google", &identity("42", "a@example.com"))
            .await
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_upsert_keeps_disabled_flag() {
        let store = InMemoryUserStore::new();
        let user = store
            .upsert_oauth_user("github", &identity("7", "x@example.com"))
            .await
            .unwrap();
        store.set_active(user.id, false).await.unwrap();

        let again = store
            .upsert_oauth_user("github", &identity("7", "x@example.com"))
            .await
            .unwrap();
        assert!(!again.active);
    }

    #[tokio::test]
    async fn test_api_key_set_lookup_and_clear() {
        let store = InMemoryUserStore::new();
        let user = store
            .upsert_oauth_user("github", &identity("1", "k@example.com"))
            .await
            .unwrap();

        let key = StoredApiKey {
            hash: "abc123".to_string(),
            prefix: "ghk_abcdefgh".to_string(),
        };
        store.set_api_key(user.id, Some(key)).await.unwrap();

        let found = store.find_by_api_key_hash("abc123").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.api_key_prefix.as_deref(), Some("ghk_abcdefgh"));

        store.set_api_key(user.id, None).await.unwrap();
        assert!(store.find_by_api_key_hash("abc123").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_missing_user_is_none_not_error() {
        let store = InMemoryUserStore::new();
        assert!(store.find_by_id(99).await.unwrap().is_none());
        assert!(store.find_by_email("nobody@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_write_to_missing_user_errors() {
        let store = InMemoryUserStore::new();
        let err = store.set_active(5, false).await.unwrap_err();
        assert!(matches!(err, StoreError::UserNotFound(5)));
    }

    #[test]
    fn test_principal_omits_api_key_hash() {
        let user = User {
            id: 1,
            email: "a@example.com".to_string(),
            name: "A".to_string(),
            active: true,
            provider: "github".to_string(),
            provider_user_id: "1".to_string(),
            api_key_hash: Some("secret-hash".to_string()),
            api_key_prefix: Some("ghk_abcdefgh".to_string()),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&user.principal()).unwrap();
        assert!(!json.contains("secret-hash"));
        assert!(json.contains("a@example.com"));
    }
}
