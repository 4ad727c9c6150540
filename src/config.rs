//! Application configuration loaded from environment variables.
//!
//! # Configuration Hierarchy
//!
//! All configuration is loaded from environment variables with defaults
//! suitable for development. In production, configure via environment
//! variables or a `.env` file.
//!
//! # Security Configuration
//!
//! - `SESSION_SECRET`: HS256 key for session tokens (at least 32 bytes)
//! - `OAUTH_STATE_SECRET`: HMAC key for OAuth state tokens (defaults to `SESSION_SECRET`)
//! - `TRUSTED_PROXIES`: reverse proxies whose `X-Forwarded-For` is honoured
//! - `INSECURE_AUTH`: must be exactly `enable-insecure-auth` to bypass credential checks
//!
//! # Rate Limiting
//!
//! - `RATE_LIMIT_RPS`: Sustained requests per second per client (default: 10, 0 disables)
//! - `RATE_LIMIT_BURST`: Bucket capacity per client (default: 20)
//! - `RATE_LIMIT_MAX_VISITORS`: Hard cap on tracked clients (default: 10000)

use std::env;
use std::time::Duration;

use crate::error::{AppError, AppResult};

/// Minimum length of signing secrets outside insecure mode.
pub const MIN_SECRET_LENGTH: usize = 32;

/// The only value of `INSECURE_AUTH` that turns insecure mode on.
pub const INSECURE_AUTH_OPT_IN: &str = "enable-insecure-auth";

/// Secret used when insecure mode is on and no secret was configured.
const INSECURE_FALLBACK_SECRET: &str = "gatehouse-insecure-development-secret";

/// OAuth client credentials for one identity provider.
#[derive(Clone)]
pub struct OAuthClientConfig {
    pub client_id: String,
    pub client_secret: String,
}

impl std::fmt::Debug for OAuthClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthClientConfig")
            .field("client_id", &self.client_id)
            .field("client_secret", &"**redacted**")
            .finish()
    }
}

/// Application configuration loaded from environment variables.
///
/// # Example
///
/// ```rust,ignore
/// let config = Config::from_env()?;
/// println!("Server will listen on {}", config.server_addr());
/// ```
#[derive(Clone)]
pub struct Config {
    // =========================================================================
    // Server Configuration
    // =========================================================================
    /// Server host address (default: "0.0.0.0")
    pub host: String,

    /// Server port (default: 3000)
    pub port: u16,

    /// Externally visible base URL, used for OAuth `redirect_uri` values
    pub public_base_url: String,

    /// Origin of the web frontend that opened the login popup
    pub frontend_origin: String,

    // =========================================================================
    // Secrets
    // =========================================================================
    /// HS256 signing secret for session tokens
    pub session_secret: String,

    /// HMAC secret for OAuth state tokens (None = reuse `session_secret`)
    pub oauth_state_secret: Option<String>,

    // =========================================================================
    // Rate Limiting Configuration
    // =========================================================================
    /// Sustained requests per second per client (0 = disabled)
    pub rate_limit_rps: u32,

    /// Token bucket capacity per client
    pub rate_limit_burst: u32,

    /// Hard cap on the number of tracked client identities
    pub rate_limit_max_visitors: usize,

    /// Trusted reverse proxy addresses or CIDR ranges.
    /// `X-Forwarded-For` is ignored unless the direct peer matches one of these.
    pub trusted_proxies: Vec<String>,

    // =========================================================================
    // OAuth Configuration
    // =========================================================================
    /// GitHub OAuth app credentials (provider disabled when None)
    pub github: Option<OAuthClientConfig>,

    /// Google OAuth client credentials (provider disabled when None)
    pub google: Option<OAuthClientConfig>,

    /// Fixed timeout for every outbound identity-provider call
    pub provider_timeout: Duration,

    // =========================================================================
    // Security Configuration
    // =========================================================================
    /// Allowed CORS origins ("*" = any, no credentials)
    pub cors_allowed_origins: Vec<String>,

    /// Insecure mode: credentials are not checked. Development only.
    pub insecure_auth: bool,

    /// User looked up in insecure mode instead of the fixed test principal
    pub insecure_user_email: Option<String>,

    // =========================================================================
    // Observability Configuration
    // =========================================================================
    /// Log level (e.g., "info", "debug", "trace")
    pub log_level: String,

    /// Port for Prometheus metrics endpoint (default: 9090, 0 = disabled)
    pub metrics_port: u16,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("public_base_url", &self.public_base_url)
            .field("frontend_origin", &self.frontend_origin)
            .field("session_secret", &"**redacted**")
            .field("oauth_state_secret", &"**redacted**")
            .field("rate_limit_rps", &self.rate_limit_rps)
            .field("rate_limit_burst", &self.rate_limit_burst)
            .field("rate_limit_max_visitors", &self.rate_limit_max_visitors)
            .field("trusted_proxies", &self.trusted_proxies)
            .field("github", &self.github)
            .field("google", &self.google)
            .field("provider_timeout", &self.provider_timeout)
            .field("cors_allowed_origins", &self.cors_allowed_origins)
            .field("insecure_auth", &self.insecure_auth)
            .field("insecure_user_email", &self.insecure_user_email)
            .field("log_level", &self.log_level)
            .field("metrics_port", &self.metrics_port)
            .finish()
    }
}

impl Config {
    /// Load configuration from environment variables with sensible defaults.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if any value is malformed or a
    /// security requirement is not met (see [`Config::validate`]).
    pub fn from_env() -> AppResult<Self> {
        // Load an .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();

        let insecure_auth = Self::parse_insecure_opt_in(env::var("INSECURE_AUTH").ok().as_deref())?;

        let mut session_secret = env::var("SESSION_SECRET").unwrap_or_default();
        if session_secret.is_empty() && insecure_auth {
            session_secret = INSECURE_FALLBACK_SECRET.to_string();
        }

        let config = Self {
            // Server
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: Self::parse_env("PORT", 3000)?,
            public_base_url: env::var("PUBLIC_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:3000".to_string())
                .trim_end_matches('/')
                .to_string(),
            frontend_origin: env::var("FRONTEND_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:5173".to_string()),

            // Secrets
            session_secret,
            oauth_state_secret: env::var("OAUTH_STATE_SECRET").ok().filter(|s| !s.is_empty()),

            // Rate limiting
            rate_limit_rps: Self::parse_env("RATE_LIMIT_RPS", 10)?,
            rate_limit_burst: Self::parse_env("RATE_LIMIT_BURST", 20)?,
            rate_limit_max_visitors: Self::parse_env("RATE_LIMIT_MAX_VISITORS", 10_000)?,
            trusted_proxies: Self::parse_list("TRUSTED_PROXIES", ""),

            // OAuth
            github: Self::parse_oauth_client("GITHUB"),
            google: Self::parse_oauth_client("GOOGLE"),
            provider_timeout: Duration::from_secs(Self::parse_env(
                "OAUTH_PROVIDER_TIMEOUT_SECS",
                10,
            )?),

            // Security
            cors_allowed_origins: Self::parse_list("CORS_ALLOWED_ORIGINS", "*"),
            insecure_auth,
            insecure_user_email: env::var("INSECURE_USER_EMAIL").ok().filter(|s| !s.is_empty()),

            // Observability
            log_level: env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
            metrics_port: Self::parse_env("METRICS_PORT", 9090)?,
        };

        config.validate()?;

        Ok(config)
    }

    /// Validate configuration values for consistency and correctness.
    ///
    /// # Errors
    ///
    /// Returns `AppError::ConfigError` if validation fails.
    pub fn validate(&self) -> AppResult<()> {
        if !self.insecure_auth {
            if self.session_secret.len() < MIN_SECRET_LENGTH {
                return Err(AppError::ConfigError(format!(
                    "SESSION_SECRET must be at least {MIN_SECRET_LENGTH} bytes"
                )));
            }
            if let Some(secret) = &self.oauth_state_secret
                && secret.len() < MIN_SECRET_LENGTH
            {
                return Err(AppError::ConfigError(format!(
                    "OAUTH_STATE_SECRET must be at least {MIN_SECRET_LENGTH} bytes"
                )));
            }
        }

        if self.rate_limit_max_visitors == 0 {
            return Err(AppError::ConfigError(
                "RATE_LIMIT_MAX_VISITORS must be greater than 0".to_string(),
            ));
        }

        if self.provider_timeout.is_zero() {
            return Err(AppError::ConfigError(
                "OAUTH_PROVIDER_TIMEOUT_SECS must be greater than 0".to_string(),
            ));
        }

        if url::Url::parse(&self.public_base_url).is_err() {
            return Err(AppError::ConfigError(format!(
                "PUBLIC_BASE_URL is not a valid URL: {}",
                self.public_base_url
            )));
        }

        Ok(())
    }

    /// Get the full server address for binding.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if rate limiting is enabled.
    pub fn rate_limiting_enabled(&self) -> bool {
        self.rate_limit_rps > 0
    }

    /// Secret used to sign OAuth state tokens.
    pub fn state_secret(&self) -> &str {
        self.oauth_state_secret
            .as_deref()
            .unwrap_or(&self.session_secret)
    }

    /// Whether cookies should carry the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        !self.insecure_auth
    }

    /// OAuth callback URL registered with a provider.
    pub fn callback_url(&self, provider: &str) -> String {
        format!("{}/auth/{provider}/callback", self.public_base_url)
    }

    /// Check if Prometheus metrics export is enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics_port > 0
    }

    /// Get the metrics endpoint address.
    ///
    /// Returns `None` if metrics are disabled (port = 0).
    pub fn metrics_addr(&self) -> Option<std::net::SocketAddr> {
        if self.metrics_enabled() {
            Some(std::net::SocketAddr::from((
                [0, 0, 0, 0],
                self.metrics_port,
            )))
        } else {
            None
        }
    }

    /// Interpret `INSECURE_AUTH`.
    ///
    /// Unset, empty, `false` and `0` mean off; only the exact opt-in phrase
    /// means on. Anything else is rejected so a stray `true` or `yes` cannot
    /// silently disable authentication.
    fn parse_insecure_opt_in(value: Option<&str>) -> AppResult<bool> {
        match value.map(str::trim) {
            None | Some("" | "false" | "0") => Ok(false),
            Some(INSECURE_AUTH_OPT_IN) => Ok(true),
            Some(other) => Err(AppError::ConfigError(format!(
                "INSECURE_AUTH has unrecognised value {other:?}; \
                 set it to {INSECURE_AUTH_OPT_IN:?} to enable insecure mode"
            ))),
        }
    }

    /// Parse an environment variable into the specified type with a default value.
    fn parse_env<T>(name: &str, default: T) -> AppResult<T>
    where
        T: std::str::FromStr,
        T::Err: std::fmt::Display,
    {
        match env::var(name) {
            Ok(val) => val
                .parse()
                .map_err(|e| AppError::ConfigError(format!("Invalid {name}: {e}"))),
            Err(_) => Ok(default),
        }
    }

    /// Parse a comma-separated list, dropping empty entries.
    fn parse_list(name: &str, default: &str) -> Vec<String> {
        env::var(name)
            .unwrap_or_else(|_| default.to_string())
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Read `{PREFIX}_CLIENT_ID` / `{PREFIX}_CLIENT_SECRET`; both must be set.
    fn parse_oauth_client(prefix: &str) -> Option<OAuthClientConfig> {
        let client_id = env::var(format!("{prefix}_CLIENT_ID")).ok().filter(|s| !s.is_empty())?;
        let client_secret = env::var(format!("{prefix}_CLIENT_SECRET"))
            .ok()
            .filter(|s| !s.is_empty())?;
        Some(OAuthClientConfig {
            client_id,
            client_secret,
        })
    }
}

/// Default configuration for testing and development.
///
/// The session secret is empty, so this fails [`Config::validate`] until one
/// is supplied. Production deployments should use `Config::from_env()`.
impl Default for Config {
    fn default() -> Self {
        Self {
            // Server
            host: "0.0.0.0".to_string(),
            port: 3000,
            public_base_url: "http://localhost:3000".to_string(),
            frontend_origin: "http://localhost:5173".to_string(),
            // Secrets
            session_secret: String::new(),
            oauth_state_secret: None,
            // Rate limiting
            rate_limit_rps: 10,
            rate_limit_burst: 20,
            rate_limit_max_visitors: 10_000,
            trusted_proxies: vec![],
            // OAuth
            github: None,
            google: None,
            provider_timeout: Duration::from_secs(10),
            // Security
            cors_allowed_origins: vec!["*".to_string()],
            insecure_auth: false,
            insecure_user_email: None,
            // Observability
            log_level: "info".to_string(),
            metrics_port: 9090,
        }
    }
}
