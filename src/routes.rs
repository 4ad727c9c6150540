//! Application routing configuration with middleware stack.
//!
//! # Middleware Stack (outermost first)
//!
//! ```text
//! Request
//!    │
//!    ▼
//! ┌──────────────────┐
//! │      CORS        │ ← Pre-flight answered here
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │   Request ID     │ ← Sets / propagates X-Request-Id
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │     Tracing      │ ← HTTP request/response logging
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Rate Limiting   │ ← 429 if exceeded (every route)
//! └────────┬─────────┘
//!          ▼
//! ┌──────────────────┐
//! │  Authentication  │ ← per route group: strict, optional or none
//! └────────┬─────────┘
//!          ▼
//!      Handler
//! ```
//!
//! # Route Groups
//!
//! - `/health`, `/auth/*` - public
//! - `/api/v1/me`, `/api/v1/me/api-key` - strict authentication
//! - `/api/v1/session` - optional authentication

use axum::Router;
use axum::http::header::{AUTHORIZATION, CONTENT_TYPE};
use axum::http::{HeaderName, HeaderValue, Method};
use axum::routing::{get, post};
use tower_http::cors::{Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::error::AppError;
use crate::handlers;
use crate::middleware::{AuthLayer, RateLimitLayer, TrustedProxyConfig};
use crate::state::AppState;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Build the application router with all routes and middleware configured.
///
/// Rate limiting is applied when the state carries a limiter
/// (`RATE_LIMIT_RPS > 0`).
pub fn build_router(state: AppState) -> Router {
    let config = state.config.clone();

    let account = Router::new()
        .route("/api/v1/me", get(handlers::me))
        .route(
            "/api/v1/me/api-key",
            post(handlers::create_api_key).delete(handlers::revoke_api_key),
        )
        .route_layer(AuthLayer::required(state.validator.clone()));

    let session = Router::new()
        .route("/api/v1/session", get(handlers::session))
        .route_layer(AuthLayer::optional(state.validator.clone()));

    let mut router = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/auth/logout", post(handlers::logout))
        .route("/auth/{provider}", get(handlers::begin_login))
        .route("/auth/{provider}/callback", get(handlers::complete_login))
        .merge(account)
        .merge(session)
        .fallback(not_found);

    // =========================================================================
    // Apply Middleware Stack (last layer added runs first)
    // =========================================================================

    if let Some(limiter) = state.limiter.clone() {
        info!(
            rps = config.rate_limit_rps,
            burst = config.rate_limit_burst,
            max_visitors = config.rate_limit_max_visitors,
            trusted_proxies = config.trusted_proxies.len(),
            "Rate limiting enabled"
        );
        let trusted = TrustedProxyConfig::new(&config.trusted_proxies);
        router = router.layer(RateLimitLayer::new(limiter, trusted));
    } else {
        info!("Rate limiting disabled (RATE_LIMIT_RPS=0)");
    }

    let request_id = HeaderName::from_static(REQUEST_ID_HEADER);
    router = router
        .layer(PropagateRequestIdLayer::new(request_id.clone()))
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::new(request_id, MakeRequestUuid))
        .layer(build_cors_layer(&config.cors_allowed_origins));

    router.with_state(state)
}

async fn not_found() -> AppError {
    AppError::NotFound("No route matches this path".to_string())
}

/// Build CORS layer from configuration.
///
/// Explicit origins get credentialed CORS so the frontend can send the
/// session cookie. `*` allows any origin without credentials.
fn build_cors_layer(allowed_origins: &[String]) -> CorsLayer {
    let expose = [HeaderName::from_static(REQUEST_ID_HEADER)];

    if allowed_origins.iter().any(|o| o == "*") {
        return CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
            .expose_headers(expose);
    }

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| match o.parse() {
            Ok(origin) => Some(origin),
            Err(_) => {
                warn!(origin = %o, "Invalid CORS origin, skipping");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([AUTHORIZATION, CONTENT_TYPE])
        .allow_credentials(true)
        .expose_headers(expose)
}
