//! Credential handling: session tokens, API keys, cookies and resolution.
//!
//! ```text
//! headers ──► Credential::from_headers ──► ApiKey(..)       ──► hash ──► store lookup
//!                                      └─► SessionToken(..) ──► verify ──► store lookup
//!                                                                              │
//!                                                      active? ──► Principal ◄─┘
//! ```

pub mod api_key;
pub mod cookies;
pub mod credential;
mod error;
pub mod session;
pub mod validator;

pub use api_key::{API_KEY_PREFIX, GeneratedApiKey, generate_api_key, hash_api_key};
pub use cookies::{CookiePolicy, SESSION_COOKIE, STATE_COOKIE, read_cookie};
pub use credential::Credential;
pub use error::AuthError;
pub use session::{SESSION_TTL_SECS, SessionClaims, SessionSigner, SessionTokenError};
pub use validator::{CredentialValidator, InsecureValidator, TokenValidator};
