use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Principal;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Always "healthy" while the process serves requests
    pub status: String,
    /// Crate version
    pub version: String,
    /// Seconds since the state was built
    pub uptime_seconds: u64,
    /// Server time of the response
    pub timestamp: DateTime<Utc>,
}

/// Response to `POST /api/v1/me/api-key`.
///
/// This is the only time the plaintext key leaves the server.
#[derive(Serialize)]
pub struct ApiKeyResponse {
    pub api_key: String,
    /// Display prefix kept in storage for identification
    pub prefix: String,
    pub created_at: DateTime<Utc>,
}

impl std::fmt::Debug for ApiKeyResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyResponse")
            .field("api_key", &"**redacted**")
            .field("prefix", &self.prefix)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Response to `GET /api/v1/session`.
#[derive(Debug, Serialize, Deserialize)]
pub struct SessionResponse {
    pub authenticated: bool,
    pub user: Option<Principal>,
}

/// Query parameters accepted by `GET /auth/{provider}`.
///
/// Kept as raw strings so malformed values surface as a JSON 400 from the
/// OAuth layer rather than an extractor rejection.
#[derive(Debug, Default, Deserialize)]
pub struct LoginQuery {
    /// `true` to complete the flow through a local CLI listener
    pub cli: Option<String>,
    /// Local listener port for the CLI flow (1024-65535)
    pub redirect_port: Option<String>,
}

/// Query parameters delivered by the identity provider to the callback.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    /// Set when the user declined consent (e.g. `access_denied`)
    pub error: Option<String>,
}
