//! Shared harness for in-process router tests.
//!
//! Builds the full router over an [`InMemoryUserStore`] and a counting mock
//! identity provider, and sends requests with `tower::ServiceExt::oneshot`.
#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use axum::Router;
use axum::body::Body;
use axum::extract::ConnectInfo;
use axum::http::header::SET_COOKIE;
use axum::http::{Request, Response};
use http_body_util::BodyExt;
use tower::ServiceExt;

use gatehouse::auth::SessionSigner;
use gatehouse::oauth::{IdentityProvider, ProviderError, ProviderMap};
use gatehouse::store::{ExternalIdentity, StoreError, StoredApiKey, User};
use gatehouse::{AppState, Config, InMemoryUserStore, Principal, UserStore, build_router};

pub const SESSION_SECRET: &str = "integration-session-secret-0123456789";
pub const MOCK_PROVIDER: &str = "mock";
pub const MOCK_AUTHORIZE_URL: &str = "https://idp.example.com/authorize";

/// Config for tests: rate limiting off unless a test turns it on.
pub fn test_config() -> Config {
    Config {
        session_secret: SESSION_SECRET.to_string(),
        rate_limit_rps: 0,
        cors_allowed_origins: vec!["https://app.example.com".to_string()],
        frontend_origin: "https://app.example.com".to_string(),
        ..Config::default()
    }
}

// =============================================================================
// Mock Identity Provider
// =============================================================================

/// Identity provider that counts network-equivalent calls.
pub struct MockProvider {
    pub exchanges: AtomicUsize,
    pub identity_fetches: AtomicUsize,
    pub identity: ExternalIdentity,
    pub fail_exchange: bool,
}

impl MockProvider {
    pub fn new() -> Self {
        Self {
            exchanges: AtomicUsize::new(0),
            identity_fetches: AtomicUsize::new(0),
            identity: ExternalIdentity {
                subject: "1001".to_string(),
                email: "octo@example.com".to_string(),
                name: "Octo".to_string(),
            },
            fail_exchange: false,
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_exchange: true,
            ..Self::new()
        }
    }

    pub fn exchanges(&self) -> usize {
        self.exchanges.load(Ordering::SeqCst)
    }

    pub fn identity_fetches(&self) -> usize {
        self.identity_fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl IdentityProvider for MockProvider {
    fn name(&self) -> &str {
        MOCK_PROVIDER
    }

    fn authorize_url(&self, state: &str) -> String {
        format!("{MOCK_AUTHORIZE_URL}?client_id=test&state={state}")
    }

    async fn exchange_code(&self, code: &str) -> Result<String, ProviderError> {
        self.exchanges.fetch_add(1, Ordering::SeqCst);
        if self.fail_exchange {
            return Err(ProviderError::Status {
                provider: MOCK_PROVIDER.to_string(),
                call: "token",
                status: 500,
            });
        }
        Ok(format!("access-{code}"))
    }

    async fn fetch_identity(&self, _access_token: &str) -> Result<ExternalIdentity, ProviderError> {
        self.identity_fetches.fetch_add(1, Ordering::SeqCst);
        Ok(self.identity.clone())
    }
}

// =============================================================================
// Failing Store
// =============================================================================

/// Store whose every call reports an outage.
pub struct FailingStore;

fn outage<T>() -> Result<T, StoreError> {
    Err(StoreError::Unavailable("connection refused".to_string()))
}

#[async_trait]
impl UserStore for FailingStore {
    async fn find_by_id(&self, _id: i64) -> Result<Option<User>, StoreError> {
        outage()
    }
    async fn find_by_email(&self, _email: &str) -> Result<Option<User>, StoreError> {
        outage()
    }
    async fn find_by_api_key_hash(&self, _hash: &str) -> Result<Option<User>, StoreError> {
        outage()
    }
    async fn upsert_oauth_user(
        &self,
        _provider: &str,
        _identity: &ExternalIdentity,
    ) -> Result<User, StoreError> {
        outage()
    }
    async fn set_api_key(&self, _user_id: i64, _key: Option<StoredApiKey>) -> Result<(), StoreError> {
        outage()
    }
    async fn set_active(&self, _user_id: i64, _active: bool) -> Result<(), StoreError> {
        outage()
    }
}

// =============================================================================
// Test Application
// =============================================================================

pub struct TestApp {
    pub router: Router,
    pub state: AppState,
    pub store: Arc<InMemoryUserStore>,
    pub provider: Arc<MockProvider>,
}

impl TestApp {
    pub fn new() -> Self {
        Self::with(test_config(), MockProvider::new())
    }

    pub fn with_config(config: Config) -> Self {
        Self::with(config, MockProvider::new())
    }

    pub fn with(config: Config, provider: MockProvider) -> Self {
        let store = Arc::new(InMemoryUserStore::new());
        let provider = Arc::new(provider);
        let mut providers: ProviderMap = HashMap::new();
        providers.insert(MOCK_PROVIDER.to_string(), provider.clone());

        let state = AppState::new(config, store.clone(), providers).unwrap();
        Self {
            router: build_router(state.clone()),
            state,
            store,
            provider,
        }
    }

    pub async fn send(&self, req: Request<Body>) -> Response<Body> {
        self.router.clone().oneshot(req).await.unwrap()
    }

    /// Send from a specific peer address, as the real server would.
    pub async fn send_from(&self, peer: &str, mut req: Request<Body>) -> Response<Body> {
        let addr: SocketAddr = peer.parse().unwrap();
        req.extensions_mut().insert(ConnectInfo(addr));
        self.send(req).await
    }

    pub async fn get(&self, uri: &str) -> Response<Body> {
        self.send(get(uri)).await
    }

    /// Create an active user and return its principal.
    pub async fn create_user(&self, subject: &str, email: &str) -> Principal {
        self.store
            .upsert_oauth_user(
                MOCK_PROVIDER,
                &ExternalIdentity {
                    subject: subject.to_string(),
                    email: email.to_string(),
                    name: "Test User".to_string(),
                },
            )
            .await
            .unwrap()
            .principal()
    }

    pub fn session_token(&self, principal: &Principal) -> String {
        SessionSigner::new(SESSION_SECRET.as_bytes())
            .issue(principal)
            .unwrap()
    }
}

/// Router over a store that is always down.
pub fn failing_store_router(config: Config) -> Router {
    let state = AppState::new(config, Arc::new(FailingStore), HashMap::new()).unwrap();
    build_router(state)
}

// =============================================================================
// Request / Response Helpers
// =============================================================================

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub fn get_with(uri: &str, header: &str, value: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header(header, value)
        .body(Body::empty())
        .unwrap()
}

pub fn bearer(uri: &str, method: &str, token: &str) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Body::empty())
        .unwrap()
}

pub async fn body_string(response: Response<Body>) -> String {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}

pub async fn body_json(response: Response<Body>) -> serde_json::Value {
    serde_json::from_str(&body_string(response).await).unwrap()
}

/// Every `Set-Cookie` header on the response.
pub fn set_cookies(response: &Response<Body>) -> Vec<String> {
    response
        .headers()
        .get_all(SET_COOKIE)
        .iter()
        .map(|v| v.to_str().unwrap().to_string())
        .collect()
}

/// Value of the `Set-Cookie` entry named `name`, if any.
pub fn cookie_value(response: &Response<Body>, name: &str) -> Option<String> {
    set_cookies(response).into_iter().find_map(|cookie| {
        let pair = cookie.split(';').next().unwrap_or_default();
        let (key, value) = pair.split_once('=')?;
        (key == name).then(|| value.to_string())
    })
}
