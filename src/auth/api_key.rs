//! Opaque API keys.
//!
//! A key is the literal [`API_KEY_PREFIX`] followed by 48 random alphanumeric
//! characters. Only the SHA-256 hex digest and a short display prefix are
//! persisted; the plaintext is handed to the caller once and never again
//! derivable from storage.

use rand::Rng;
use rand::distr::Alphanumeric;
use sha2::{Digest, Sha256};

use crate::store::StoredApiKey;

/// Literal prefix that marks a bearer token as an API key.
pub const API_KEY_PREFIX: &str = "ghk_";

/// Random characters following the prefix.
pub const API_KEY_RANDOM_LENGTH: usize = 48;

/// Leading characters (prefix included) kept for display.
pub const DISPLAY_PREFIX_LENGTH: usize = 12;

/// A freshly generated key. The plaintext must never be persisted.
pub struct GeneratedApiKey {
    pub plaintext: String,
    pub prefix: String,
    pub hash: String,
}

impl GeneratedApiKey {
    /// The parts of this key that may be stored.
    pub fn stored(&self) -> StoredApiKey {
        StoredApiKey {
            hash: self.hash.clone(),
            prefix: self.prefix.clone(),
        }
    }
}

impl std::fmt::Debug for GeneratedApiKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeneratedApiKey")
            .field("plaintext", &"**redacted**")
            .field("prefix", &self.prefix)
            .finish_non_exhaustive()
    }
}

pub fn generate_api_key() -> GeneratedApiKey {
    let random: String = rand::rng()
        .sample_iter(&Alphanumeric)
        .take(API_KEY_RANDOM_LENGTH)
        .map(char::from)
        .collect();
    let plaintext = format!("{API_KEY_PREFIX}{random}");

    GeneratedApiKey {
        prefix: display_prefix(&plaintext).to_string(),
        hash: hash_api_key(&plaintext),
        plaintext,
    }
}

/// SHA-256 hex digest of a key, used both at creation and at lookup.
pub fn hash_api_key(key: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    format!("{:x}", hasher.finalize())
}

pub fn display_prefix(key: &str) -> &str {
    key.get(..DISPLAY_PREFIX_LENGTH).unwrap_or(key)
}

/// Whether a bearer token is shaped like an API key.
pub fn is_api_key(token: &str) -> bool {
    token.starts_with(API_KEY_PREFIX)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_key_shape() {
        let key = generate_api_key();

        assert!(key.plaintext.starts_with(API_KEY_PREFIX));
        assert_eq!(
            key.plaintext.len(),
            API_KEY_PREFIX.len() + API_KEY_RANDOM_LENGTH
        );
        assert!(
            key.plaintext[API_KEY_PREFIX.len()..]
                .chars()
                .all(|c| c.is_ascii_alphanumeric())
        );
        assert_eq!(key.prefix.len(), DISPLAY_PREFIX_LENGTH);
        assert!(key.plaintext.starts_with(&key.prefix));
    }

    #[test]
    fn test_hash_is_stable_hex_and_not_plaintext() {
        let key = generate_api_key();
        assert_eq!(hash_api_key(&key.plaintext), key.hash);
        assert_eq!(key.hash.len(), 64);
        assert!(!key.hash.contains(&key.plaintext));
    }

    #[test]
    fn test_keys_are_unique() {
        let a = generate_api_key();
        let b = generate_api_key();
        assert_ne!(a.plaintext, b.plaintext);
        assert_ne!(a.hash, b.hash);
    }

    #[test]
    fn test_debug_redacts_plaintext() {
        let key = generate_api_key();
        let rendered = format!("{key:?}");
        assert!(!rendered.contains(&key.plaintext));
    }

    #[test]
    fn test_display_prefix_short_input() {
        assert_eq!(display_prefix("ghk_ab"), "ghk_ab");
    }
}
