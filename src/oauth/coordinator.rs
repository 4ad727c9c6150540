//! OAuth authorization-code handshake.
//!
//! ```text
//! begin ──► state token (cookie + `state` param) ──► provider consent
//!                                                         │
//! complete ◄── callback(state, code) ◄────────────────────┘
//!    1. state param == state cookie (constant time)   else reject, no provider call
//!    2. state signature + age, nonce not yet used
//!    3. exchange code, fetch verified identity        bounded by provider timeout
//!    4. upsert local user, refuse disabled accounts
//!    5. mint session ──► CLI redirect | browser completion page
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use subtle::ConstantTimeEq;
use tracing::{error, info, warn};
use url::form_urlencoded;

use super::completion::CompletionPage;
use super::error::OAuthError;
use super::provider::{IdentityProvider, ProviderError, ProviderMap};
use super::state::{ReturnFlow, STATE_TTL_SECS, StateSigner};
use crate::auth::SessionSigner;
use crate::metrics;
use crate::models::CallbackParams;
use crate::store::{ExternalIdentity, UserStore};

/// Where to send the browser to start a login.
#[derive(Debug, Clone)]
pub struct LoginRedirect {
    /// Provider consent URL.
    pub location: String,
    /// Signed state token; also the value of the state cookie.
    pub state: String,
}

/// A successful login.
#[derive(Debug)]
pub enum Completion {
    /// Redirect to the CLI's local listener, token in the query string.
    Cli { location: String },
    /// Set the session cookie and render the popup completion page.
    Browser {
        session_token: String,
        page: CompletionPage,
    },
}

pub struct OAuthCoordinator {
    providers: ProviderMap,
    states: StateSigner,
    sessions: SessionSigner,
    store: Arc<dyn UserStore>,
    provider_timeout: Duration,
    frontend_origin: String,
    /// Nonces of state tokens already presented at a callback, with their
    /// issue time. Entries older than the state lifetime are pruned.
    consumed: Mutex<HashMap<String, i64>>,
}

impl OAuthCoordinator {
    pub fn new(
        providers: ProviderMap,
        states: StateSigner,
        sessions: SessionSigner,
        store: Arc<dyn UserStore>,
        provider_timeout: Duration,
        frontend_origin: String,
    ) -> Self {
        Self {
            providers,
            states,
            sessions,
            store,
            provider_timeout,
            frontend_origin,
            consumed: Mutex::new(HashMap::new()),
        }
    }

    /// Names of the enabled providers, sorted.
    pub fn provider_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    fn provider(&self, name: &str) -> Result<&Arc<dyn IdentityProvider>, OAuthError> {
        self.providers
            .get(name)
            .ok_or_else(|| OAuthError::UnknownProvider(name.to_string()))
    }

    /// Start a login: sign a fresh state and build the consent URL.
    pub fn begin(&self, provider: &str, flow: ReturnFlow) -> Result<LoginRedirect, OAuthError> {
        let provider = self.provider(provider)?;
        let state = self.states.issue(flow);
        Ok(LoginRedirect {
            location: provider.authorize_url(&state),
            state,
        })
    }

    /// Finish a login from the provider's callback.
    ///
    /// `cookie_state` is the state cookie presented with the callback. The
    /// caller must clear that cookie whatever this returns.
    pub async fn complete(
        &self,
        provider: &str,
        params: &CallbackParams,
        cookie_state: Option<&str>,
    ) -> Result<Completion, OAuthError> {
        let result = self.complete_inner(provider, params, cookie_state).await;
        self.record_outcome(provider, result.as_ref().map(|_| ()));
        result
    }

    /// Record a callback that was rejected before the handshake could run.
    pub fn reject(&self, provider: &str, err: OAuthError) -> OAuthError {
        self.record_outcome(provider, Err(&err));
        err
    }

    fn record_outcome(&self, provider: &str, result: Result<(), &OAuthError>) {
        let label = if self.providers.contains_key(provider) {
            provider
        } else {
            "unknown"
        };
        match result {
            Ok(()) => metrics::record_oauth_login(label, "success"),
            Err(e) => {
                log_failure(label, e);
                metrics::record_oauth_login(label, e.outcome());
            }
        }
    }

    async fn complete_inner(
        &self,
        provider_name: &str,
        params: &CallbackParams,
        cookie_state: Option<&str>,
    ) -> Result<Completion, OAuthError> {
        let provider = self.provider(provider_name)?;

        let (Some(expected), Some(presented)) = (
            cookie_state.filter(|s| !s.is_empty()),
            params.state.as_deref().filter(|s| !s.is_empty()),
        ) else {
            return Err(OAuthError::MissingState);
        };
        if !bool::from(expected.as_bytes().ct_eq(presented.as_bytes())) {
            return Err(OAuthError::StateMismatch);
        }

        let state = self.states.verify(presented)?;
        self.consume_nonce(&state.nonce, state.issued_at)?;

        if let Some(error) = &params.error {
            return Err(OAuthError::Denied(error.clone()));
        }
        let code = params
            .code
            .as_deref()
            .filter(|c| !c.is_empty())
            .ok_or(OAuthError::MissingCode)?;

        let identity = self.fetch_identity(provider.as_ref(), code).await?;

        let user = self
            .store
            .upsert_oauth_user(provider.name(), &identity)
            .await?;
        if !user.active {
            return Err(OAuthError::AccountDisabled);
        }

        let session_token = self.sessions.issue(&user.principal())?;
        info!(
            user_id = user.id,
            provider = provider.name(),
            cli = matches!(state.flow, ReturnFlow::Cli { .. }),
            "OAuth login succeeded"
        );

        Ok(match state.flow {
            ReturnFlow::Cli { port } => Completion::Cli {
                location: cli_callback_url(port, &session_token),
            },
            ReturnFlow::Browser => Completion::Browser {
                session_token,
                page: CompletionPage::render(&self.frontend_origin),
            },
        })
    }

    /// Exchange the code and fetch the identity under one fixed deadline.
    async fn fetch_identity(
        &self,
        provider: &dyn IdentityProvider,
        code: &str,
    ) -> Result<ExternalIdentity, OAuthError> {
        let exchange = async {
            let access_token = provider.exchange_code(code).await?;
            provider.fetch_identity(&access_token).await
        };

        tokio::time::timeout(self.provider_timeout, exchange)
            .await
            .map_err(|_| ProviderError::Timeout)?
            .map_err(OAuthError::from)
    }

    /// Mark a state nonce as used. Fails if it was already used.
    fn consume_nonce(&self, nonce: &str, issued_at: i64) -> Result<(), OAuthError> {
        let mut consumed = self
            .consumed
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let horizon = Utc::now().timestamp() - STATE_TTL_SECS;
        consumed.retain(|_, issued| *issued >= horizon);

        if consumed.contains_key(nonce) {
            return Err(OAuthError::StateReplayed);
        }
        consumed.insert(nonce.to_string(), issued_at);
        Ok(())
    }
}

/// `http://localhost:<port>/callback?token=<urlencoded token>`
pub fn cli_callback_url(port: u16, token: &str) -> String {
    let query = form_urlencoded::Serializer::new(String::new())
        .append_pair("token", token)
        .finish();
    format!("http://localhost:{port}/callback?{query}")
}

fn log_failure(provider: &str, err: &OAuthError) {
    match err {
        OAuthError::Provider(_) | OAuthError::Store(_) | OAuthError::Session(_) => {
            error!(provider, error = %err, "OAuth login failed");
        }
        OAuthError::UnknownProvider(_) | OAuthError::Denied(_) | OAuthError::MissingCode => {
            info!(provider, error = %err, "OAuth login not completed");
        }
        _ => {
            warn!(provider, error = %err, "OAuth login rejected");
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::store::InMemoryUserStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SESSION_SECRET: &[u8] = b"coordinator-session-secret-0123456789";

    #[derive(Default)]
    struct CountingProvider {
        exchanges: AtomicUsize,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl IdentityProvider for CountingProvider {
        fn name(&self) -> &str {
            "mock"
        }
        fn authorize_url(&self, state: &str) -> String {
            format!("https://idp.example.com/authorize?state={state}")
        }
        async fn exchange_code(&self, _code: &str) -> Result<String, ProviderError> {
            self.exchanges.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok("access".to_string())
        }
        async fn fetch_identity(&self, _token: &str) -> Result<ExternalIdentity, ProviderError> {
            Ok(ExternalIdentity {
                subject: "99".to_string(),
                email: "mock@example.com".to_string(),
                name: "Mock".to_string(),
            })
        }
    }

    fn coordinator(provider: Arc<CountingProvider>) -> (OAuthCoordinator, Arc<InMemoryUserStore>) {
        let store = Arc::new(InMemoryUserStore::new());
        let mut providers: ProviderMap = HashMap::new();
        providers.insert("mock".to_string(), provider);
        let coordinator = OAuthCoordinator::new(
            providers,
            StateSigner::new(b"coordinator-state-secret-0123456789").unwrap(),
            SessionSigner::new(SESSION_SECRET),
            store.clone(),
            Duration::from_secs(5),
            "https://app.example.com".to_string(),
        );
        (coordinator, store)
    }

    fn callback(state: &str) -> CallbackParams {
        CallbackParams {
            state: Some(state.to_string()),
            code: Some("code".to_string()),
            error: None,
        }
    }

    #[tokio::test]
    async fn test_browser_flow_issues_session() {
        let provider = Arc::new(CountingProvider::default());
        let (coordinator, store) = coordinator(provider.clone());

        let redirect = coordinator.begin("mock", ReturnFlow::Browser).unwrap();
        assert!(redirect.location.contains(&redirect.state));

        let completion = coordinator
            .complete("mock", &callback(&redirect.state), Some(&redirect.state))
            .await
            .unwrap();

        let Completion::Browser { session_token, .. } = completion else {
            panic!("expected browser completion");
        };
        let claims = SessionSigner::new(SESSION_SECRET).verify(&session_token).unwrap();
        assert_eq!(claims.email, "mock@example.com");
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_cli_flow_redirects_to_localhost() {
        let (coordinator, _) = coordinator(Arc::new(CountingProvider::default()));
        let redirect = coordinator
            .begin("mock", ReturnFlow::Cli { port: 54231 })
            .unwrap();

        let completion = coordinator
            .complete("mock", &callback(&redirect.state), Some(&redirect.state))
            .await
            .unwrap();

        let Completion::Cli { location } = completion else {
            panic!("expected CLI completion");
        };
        assert!(location.starts_with("http://localhost:54231/callback?token="));
    }

    #[tokio::test]
    async fn test_state_mismatch_never_calls_provider() {
        let provider = Arc::new(CountingProvider::default());
        let (coordinator, _) = coordinator(provider.clone());
        let a = coordinator.begin("mock", ReturnFlow::Browser).unwrap();
        let b = coordinator.begin("mock", ReturnFlow::Browser).unwrap();

        let err = coordinator
            .complete("mock", &callback(&a.state), Some(&b.state))
            .await
            .unwrap_err();

        assert!(matches!(err, OAuthError::StateMismatch));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_malformed_callback_rejected_without_provider_call() {
        let provider = Arc::new(CountingProvider::default());
        let (coordinator, _) = coordinator(provider.clone());

        let err = coordinator.reject(
            "mock",
            OAuthError::MalformedCallback("duplicate field `state`".to_string()),
        );

        assert_eq!(err.outcome(), "malformed_callback");
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_missing_cookie_rejected() {
        let provider = Arc::new(CountingProvider::default());
        let (coordinator, _) = coordinator(provider.clone());
        let redirect = coordinator.begin("mock", ReturnFlow::Browser).unwrap();

        let err = coordinator
            .complete("mock", &callback(&redirect.state), None)
            .await
            .unwrap_err();

        assert!(matches!(err, OAuthError::MissingState));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_replayed_state_rejected() {
        let provider = Arc::new(CountingProvider::default());
        let (coordinator, _) = coordinator(provider.clone());
        let redirect = coordinator.begin("mock", ReturnFlow::Browser).unwrap();
        let params = callback(&redirect.state);

        coordinator
            .complete("mock", &params, Some(&redirect.state))
            .await
            .unwrap();
        let err = coordinator
            .complete("mock", &params, Some(&redirect.state))
            .await
            .unwrap_err();

        assert!(matches!(err, OAuthError::StateReplayed));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_disabled_account_gets_no_session() {
        let (coordinator, store) = coordinator(Arc::new(CountingProvider::default()));
        let first = coordinator.begin("mock", ReturnFlow::Browser).unwrap();
        coordinator
            .complete("mock", &callback(&first.state), Some(&first.state))
            .await
            .unwrap();
        let user = store.find_by_email("mock@example.com").await.unwrap().unwrap();
        store.set_active(user.id, false).await.unwrap();

        let second = coordinator.begin("mock", ReturnFlow::Browser).unwrap();
        let err = coordinator
            .complete("mock", &callback(&second.state), Some(&second.state))
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::AccountDisabled));
    }

    #[tokio::test]
    async fn test_denied_consent() {
        let (coordinator, _) = coordinator(Arc::new(CountingProvider::default()));
        let redirect = coordinator.begin("mock", ReturnFlow::Browser).unwrap();
        let params = CallbackParams {
            state: Some(redirect.state.clone()),
            code: None,
            error: Some("access_denied".to_string()),
        };

        let err = coordinator
            .complete("mock", &params, Some(&redirect.state))
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::Denied(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let provider = Arc::new(CountingProvider {
            delay: Some(Duration::from_secs(60)),
            ..CountingProvider::default()
        });
        let (coordinator, _) = coordinator(provider);
        let redirect = coordinator.begin("mock", ReturnFlow::Browser).unwrap();

        let err = coordinator
            .complete("mock", &callback(&redirect.state), Some(&redirect.state))
            .await
            .unwrap_err();
        assert!(matches!(err, OAuthError::Provider(ProviderError::Timeout)));
    }

    #[tokio::test]
    async fn test_unknown_provider() {
        let (coordinator, _) = coordinator(Arc::new(CountingProvider::default()));
        assert!(matches!(
            coordinator.begin("myspace", ReturnFlow::Browser),
            Err(OAuthError::UnknownProvider(_))
        ));
    }

    #[test]
    fn test_cli_callback_url_encodes_token() {
        assert_eq!(
            cli_callback_url(5000, "a.b+c/d"),
            "http://localhost:5000/callback?token=a.b%2Bc%2Fd"
        );
    }
}
