//! Third-party identity providers.
//!
//! Each provider knows its consent URL, how to trade an authorization code
//! for an access token, and how to turn that token into a verified
//! [`ExternalIdentity`]. An unverified email is never accepted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use reqwest::header::ACCEPT;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::error;
use url::form_urlencoded;

use crate::config::{Config, OAuthClientConfig};
use crate::metrics;
use crate::store::ExternalIdentity;

/// Upper bound on provider error body bytes written to logs.
const MAX_LOGGED_BODY: usize = 512;

#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport failure (connect, TLS, decode).
    #[error("{provider} {call} request failed: {message}")]
    Http {
        provider: String,
        call: &'static str,
        message: String,
    },

    /// Provider answered with a non-success status. The body is logged, not kept.
    #[error("{provider} {call} returned HTTP {status}")]
    Status {
        provider: String,
        call: &'static str,
        status: u16,
    },

    /// Provider answered 200 but refused the request (e.g. `bad_verification_code`).
    #[error("{provider} rejected the request: {reason}")]
    Rejected { provider: String, reason: String },

    #[error("{provider} account has no verified email address")]
    UnverifiedEmail { provider: String },

    #[error("identity provider timed out")]
    Timeout,

    #[error("failed to build provider HTTP client: {0}")]
    Client(String),
}

/// An OAuth 2.0 authorization-code identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Path segment used in `/auth/{provider}`.
    fn name(&self) -> &str;

    /// Consent URL the browser is redirected to.
    fn authorize_url(&self, state: &str) -> String;

    /// Trade an authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError>;

    /// Fetch the verified identity behind an access token.
    async fn fetch_identity(&self, access_token: &str) -> Result<ExternalIdentity, ProviderError>;
}

/// Providers enabled by configuration, keyed by name.
pub type ProviderMap = HashMap<String, Arc<dyn IdentityProvider>>;

/// Build every provider whose client credentials are configured.
pub fn build_providers(config: &Config) -> Result<ProviderMap, ProviderError> {
    let client = reqwest::Client::builder()
        .timeout(config.provider_timeout)
        .user_agent(concat!("gatehouse/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ProviderError::Client(e.to_string()))?;

    let mut providers: ProviderMap = HashMap::new();
    if let Some(github) = &config.github {
        let provider = GitHubProvider::new(client.clone(), github, config.callback_url("github"));
        providers.insert("github".to_string(), Arc::new(provider));
    }
    if let Some(google) = &config.google {
        let provider = GoogleProvider::new(client.clone(), google, config.callback_url("google"));
        providers.insert("google".to_string(), Arc::new(provider));
    }
    Ok(providers)
}

// =============================================================================
// Shared request plumbing
// =============================================================================

#[derive(Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
}

impl TokenResponse {
    fn into_token(self, provider: &str) -> Result<String, ProviderError> {
        match self.access_token {
            Some(token) if !token.is_empty() => Ok(token),
            _ => Err(ProviderError::Rejected {
                provider: provider.to_string(),
                reason: self.error.unwrap_or_else(|| "no access token".to_string()),
            }),
        }
    }
}

/// Send a request and decode its JSON body, timing the call.
async fn send_json<T: DeserializeOwned>(
    provider: &str,
    call: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let started = Instant::now();
    let result = send_json_inner(provider, call, request).await;
    metrics::record_provider_request(provider, call, started.elapsed().as_secs_f64());
    result
}

async fn send_json_inner<T: DeserializeOwned>(
    provider: &str,
    call: &'static str,
    request: reqwest::RequestBuilder,
) -> Result<T, ProviderError> {
    let transport = |e: reqwest::Error| {
        if e.is_timeout() {
            ProviderError::Timeout
        } else {
            ProviderError::Http {
                provider: provider.to_string(),
                call,
                message: e.to_string(),
            }
        }
    };

    let response = request
        .header(ACCEPT, "application/json")
        .send()
        .await
        .map_err(transport)?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        error!(
            provider,
            call,
            status = status.as_u16(),
            body = %truncate(&body, MAX_LOGGED_BODY),
            "Identity provider returned an error"
        );
        return Err(ProviderError::Status {
            provider: provider.to_string(),
            call,
            status: status.as_u16(),
        });
    }

    response.json::<T>().await.map_err(transport)
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    s.get(..end).unwrap_or_default()
}

fn consent_url(base: &str, params: &[(&str, &str)]) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .extend_pairs(params)
        .finish();
    format!("{base}?{query}")
}

/// Display name, falling back to the email's local part.
fn display_name(name: Option<String>, fallback: &str, email: &str) -> String {
    name.filter(|n| !n.trim().is_empty())
        .or_else(|| (!fallback.is_empty()).then(|| fallback.to_string()))
        .unwrap_or_else(|| email.split('@').next().unwrap_or(email).to_string())
}

// =============================================================================
// GitHub
// =============================================================================

const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const GITHUB_USER_URL: &str = "https://api.github.com/user";
const GITHUB_EMAILS_URL: &str = "https://api.github.com/user/emails";

pub struct GitHubProvider {
    client: reqwest::Client,
    credentials: OAuthClientConfig,
    redirect_uri: String,
}

#[derive(Deserialize)]
struct GitHubUser {
    id: i64,
    login: String,
    name: Option<String>,
    email: Option<String>,
}

/// One entry of GitHub's `/user/emails` listing.
#[derive(Debug, Clone, Deserialize)]
pub struct GitHubEmail {
    pub email: String,
    pub primary: bool,
    pub verified: bool,
}

/// Pick the primary verified address, else the first verified one.
pub fn select_verified_email(emails: &[GitHubEmail]) -> Option<&str> {
    emails
        .iter()
        .find(|e| e.primary && e.verified)
        .or_else(|| emails.iter().find(|e| e.verified))
        .map(|e| e.email.as_str())
}

impl GitHubProvider {
    pub fn new(
        client: reqwest::Client,
        credentials: &OAuthClientConfig,
        redirect_uri: String,
    ) -> Self {
        Self {
            client,
            credentials: credentials.clone(),
            redirect_uri,
        }
    }
}

#[async_trait]
impl IdentityProvider for GitHubProvider {
    fn name(&self) -> &str {
        "github"
    }

    fn authorize_url(&self, state: &str) -> String {
        consent_url(
            GITHUB_AUTHORIZE_URL,
            &[
                ("client_id", self.credentials.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("scope", "read:user user:email"),
                ("state", state),
            ],
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
        let request = self.client.post(GITHUB_TOKEN_URL).form(&[
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
        ]);
        let response: TokenResponse = send_json(self.name(), "token", request).await?;
        response.into_token(self.name())
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<ExternalIdentity, ProviderError> {
        let user: GitHubUser = send_json(
            self.name(),
            "user",
            self.client.get(GITHUB_USER_URL).bearer_auth(access_token),
        )
        .await?;

        // A public profile email is always a verified one.
        let email = match user.email.filter(|e| !e.is_empty()) {
            Some(email) => email,
            None => {
                let emails: Vec<GitHubEmail> = send_json(
                    self.name(),
                    "emails",
                    self.client.get(GITHUB_EMAILS_URL).bearer_auth(access_token),
                )
                .await?;
                select_verified_email(&emails)
                    .map(str::to_string)
                    .ok_or_else(|| ProviderError::UnverifiedEmail {
                        provider: self.name().to_string(),
                    })?
            }
        };

        Ok(ExternalIdentity {
            subject: user.id.to_string(),
            name: display_name(user.name, &user.login, &email),
            email,
        })
    }
}

// =============================================================================
// Google
// =============================================================================

const GOOGLE_AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const GOOGLE_USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";

pub struct GoogleProvider {
    client: reqwest::Client,
    credentials: OAuthClientConfig,
    redirect_uri: String,
}

#[derive(Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    email_verified: Option<bool>,
    name: Option<String>,
}

impl GoogleUserInfo {
    fn into_identity(self, provider: &str) -> Result<ExternalIdentity, ProviderError> {
        let email = match (self.email, self.email_verified) {
            (Some(email), Some(true)) if !email.is_empty() => email,
            _ => {
                return Err(ProviderError::UnverifiedEmail {
                    provider: provider.to_string(),
                });
            }
        };
        Ok(ExternalIdentity {
            subject: self.sub,
            name: display_name(self.name, "", &email),
            email,
        })
    }
}

impl GoogleProvider {
    pub fn new(
        client: reqwest::Client,
        credentials: &OAuthClientConfig,
        redirect_uri: String,
    ) -> Self {
        Self {
            client,
            credentials: credentials.clone(),
            redirect_uri,
        }
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn name(&self) -> &str {
        "google"
    }

    fn authorize_url(&self, state: &str) -> String {
        consent_url(
            GOOGLE_AUTHORIZE_URL,
            &[
                ("client_id", self.credentials.client_id.as_str()),
                ("redirect_uri", self.redirect_uri.as_str()),
                ("response_type", "code"),
                ("scope", "openid email profile"),
                ("state", state),
            ],
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
        let request = self.client.post(GOOGLE_TOKEN_URL).form(&[
            ("client_id", self.credentials.client_id.as_str()),
            ("client_secret", self.credentials.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ]);
        let response: TokenResponse = send_json(self.name(), "token", request).await?;
        response.into_token(self.name())
    }

    async fn fetch_identity(&self, access_token: &str) -> Result<ExternalIdentity, ProviderError> {
        let info: GoogleUserInfo = send_json(
            self.name(),
            "userinfo",
            self.client.get(GOOGLE_USERINFO_URL).bearer_auth(access_token),
        )
        .await?;
        info.into_identity(self.name())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn email(address: &str, primary: bool, verified: bool) -> GitHubEmail {
        GitHubEmail {
            email: address.to_string(),
            primary,
            verified,
        }
    }

    #[test]
    fn test_select_primary_verified() {
        let emails = vec![
            email("first@example.com", false, true),
            email("primary@example.com", true, true),
        ];
        assert_eq!(select_verified_email(&emails), Some("primary@example.com"));
    }

    #[test]
    fn test_select_first_verified_when_primary_unverified() {
        let emails = vec![
            email("primary@example.com", true, false),
            email("other@example.com", false, true),
            email("later@example.com", false, true),
        ];
        assert_eq!(select_verified_email(&emails), Some("other@example.com"));
    }

    #[test]
    fn test_select_none_when_nothing_verified() {
        let emails = vec![email("primary@example.com", true, false)];
        assert_eq!(select_verified_email(&emails), None);
        assert_eq!(select_verified_email(&[]), None);
    }

    #[test]
    fn test_google_requires_verified_email() {
        let unverified = GoogleUserInfo {
            sub: "1".to_string(),
            email: Some("a@example.com".to_string()),
            email_verified: Some(false),
            name: None,
        };
        assert!(matches!(
            unverified.into_identity("google"),
            Err(ProviderError::UnverifiedEmail { .. })
        ));

        let missing_flag = GoogleUserInfo {
            sub: "1".to_string(),
            email: Some("a@example.com".to_string()),
            email_verified: None,
            name: None,
        };
        assert!(missing_flag.into_identity("google").is_err());

        let verified = GoogleUserInfo {
            sub: "1".to_string(),
            email: Some("a@example.com".to_string()),
            email_verified: Some(true),
            name: None,
        };
        let identity = verified.into_identity("google").unwrap();
        assert_eq!(identity.name, "a");
    }

    #[test]
    fn test_github_authorize_url_encodes_state() {
        let provider = GitHubProvider::new(
            reqwest::Client::new(),
            &OAuthClientConfig {
                client_id: "cid".to_string(),
                client_secret: "secret".to_string(),
            },
            "http://localhost:3000/auth/github/callback".to_string(),
        );
        let url = provider.authorize_url("abc~cli~5000.sig");

        assert!(url.starts_with("https://github.com/login/oauth/authorize?"));
        assert!(url.contains("client_id=cid"));
        assert!(url.contains("state=abc%7Ecli%7E5000.sig"));
        assert!(url.contains("scope=read%3Auser+user%3Aemail"));
        assert!(!url.contains("secret"));
    }

    #[test]
    fn test_token_response_error_is_rejected() {
        let response = TokenResponse {
            access_token: None,
            error: Some("bad_verification_code".to_string()),
        };
        let err = response.into_token("github").unwrap_err();
        assert!(err.to_string().contains("bad_verification_code"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "h");
        assert_eq!(truncate("short", 100), "short");
    }

    #[test]
    fn test_build_providers_only_configured() {
        let config = Config {
            github: Some(OAuthClientConfig {
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
            }),
            ..Config::default()
        };
        let providers = build_providers(&config).unwrap();
        assert!(providers.contains_key("github"));
        assert!(!providers.contains_key("google"));
    }
}
