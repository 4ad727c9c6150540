//! Shared application state for Axum handlers.
//!
//! Everything request handling needs is built once at startup from
//! [`Config`]: the user store, the credential validator, the OAuth
//! coordinator and the rate limiter. The state is cheap to clone; all
//! components are behind `Arc`.
//!
//! # Structured Concurrency
//!
//! The rate limiter owns the only background task (its idle sweep). Call
//! [`AppState::shutdown`] after the server stops to cancel it and wait for it
//! to finish.

use std::sync::Arc;
use std::time::Instant;

use tracing::{info, warn};

use crate::auth::{CookiePolicy, CredentialValidator, InsecureValidator, SessionSigner, TokenValidator};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::middleware::{LimiterSettings, VisitorLimiter};
use crate::oauth::{OAuthCoordinator, ProviderMap, StateSigner, build_providers};
use crate::store::{InMemoryUserStore, UserStore};

/// Shared application state for Axum handlers.
///
/// # Lifecycle
///
/// ```rust,ignore
/// let state = AppState::from_config(config)?;
/// // ... serve ...
/// state.shutdown().await;
/// ```
#[derive(Clone)]
pub struct AppState {
    /// Application configuration
    pub config: Arc<Config>,
    /// Durable user storage
    pub store: Arc<dyn UserStore>,
    /// Session token / API key resolution (or the insecure stand-in)
    pub validator: Arc<dyn CredentialValidator>,
    /// Session token signer, shared with the validator and the OAuth flow
    pub sessions: SessionSigner,
    /// OAuth handshake coordinator
    pub oauth: Arc<OAuthCoordinator>,
    /// Per-client limiter (None when `RATE_LIMIT_RPS=0`)
    pub limiter: Option<VisitorLimiter>,
    /// Cookie attributes for this deployment
    pub cookies: CookiePolicy,
    /// Timestamp when the application started
    pub started_at: Instant,
}

impl AppState {
    /// Build state with the bundled in-memory store and the identity
    /// providers enabled in `config`.
    ///
    /// Must be called inside a Tokio runtime when rate limiting is enabled.
    pub fn from_config(config: Config) -> AppResult<Self> {
        let providers = build_providers(&config).map_err(|e| {
            AppError::ConfigError(format!("Failed to build identity provider client: {e}"))
        })?;
        Self::new(config, Arc::new(InMemoryUserStore::new()), providers)
    }

    /// Build state from explicit collaborators.
    ///
    /// # Errors
    ///
    /// `AppError::ConfigError` if a secret is unusable or the limiter
    /// settings are invalid.
    pub fn new(
        config: Config,
        store: Arc<dyn UserStore>,
        providers: ProviderMap,
    ) -> AppResult<Self> {
        let sessions = SessionSigner::new(config.session_secret.as_bytes());
        let states = StateSigner::new(config.state_secret().as_bytes())
            .map_err(|e| AppError::ConfigError(format!("OAuth state secret: {e}")))?;

        let validator: Arc<dyn CredentialValidator> = if config.insecure_auth {
            warn!(
                user = config.insecure_user_email.as_deref().unwrap_or("<test principal>"),
                "INSECURE AUTH ENABLED: credentials are NOT checked. Never use this in production."
            );
            Arc::new(InsecureValidator::new(
                store.clone(),
                config.insecure_user_email.clone(),
            ))
        } else {
            Arc::new(TokenValidator::new(sessions.clone(), store.clone()))
        };

        let limiter = if config.rate_limiting_enabled() {
            let limiter = VisitorLimiter::new(LimiterSettings {
                rps: config.rate_limit_rps,
                burst: config.rate_limit_burst,
                max_visitors: config.rate_limit_max_visitors,
            })
            .map_err(|e| AppError::ConfigError(format!("Rate limiter: {e}")))?;
            Some(limiter)
        } else {
            None
        };

        let oauth = OAuthCoordinator::new(
            providers,
            states,
            sessions.clone(),
            store.clone(),
            config.provider_timeout,
            config.frontend_origin.clone(),
        );
        info!(providers = ?oauth.provider_names(), "Identity providers configured");

        Ok(Self {
            cookies: CookiePolicy::new(config.secure_cookies()),
            config: Arc::new(config),
            store,
            validator,
            sessions,
            oauth: Arc::new(oauth),
            limiter,
            started_at: Instant::now(),
        })
    }

    /// Stop background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown of background tasks");
        if let Some(limiter) = &self.limiter {
            limiter.stop().await;
        }
        info!("All background tasks have completed");
    }

    /// Get the application uptime in seconds.
    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
