//! Account endpoints for the authenticated caller.
//!
//! # Endpoints
//!
//! - `GET /api/v1/me` - current principal (strict auth)
//! - `POST /api/v1/me/api-key` - issue a new API key (strict auth)
//! - `DELETE /api/v1/me/api-key` - revoke the API key (strict auth)
//! - `GET /api/v1/session` - session probe (optional auth)
//! - `POST /auth/logout` - clear the session cookie
//!
//! # API Key Storage
//!
//! Only the SHA-256 hash and a short display prefix are stored. The plaintext
//! key is returned once, by the request that created it.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::http::header::SET_COOKIE;
use axum::response::{AppendHeaders, IntoResponse};
use chrono::Utc;
use tracing::{info, instrument};

use crate::auth::generate_api_key;
use crate::error::AppResult;
use crate::middleware::{CurrentUser, MaybeUser};
use crate::models::{ApiKeyResponse, Principal, SessionResponse};
use crate::state::AppState;

/// Return the authenticated principal.
#[instrument(skip_all, fields(user_id = principal.id))]
pub async fn me(CurrentUser(principal): CurrentUser) -> Json<Principal> {
    Json(principal)
}

/// Issue a new API key, replacing any previous one.
///
/// # Response Body (201)
///
/// ```json
/// {
///   "api_key": "ghk_...",
///   "prefix": "ghk_AbCdEfGh",
///   "created_at": "2024-01-15T10:30:00Z"
/// }
/// ```
#[instrument(skip_all, fields(user_id = principal.id))]
pub async fn create_api_key(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> AppResult<(StatusCode, Json<ApiKeyResponse>)> {
    let key = generate_api_key();
    state
        .store
        .set_api_key(principal.id, Some(key.stored()))
        .await?;

    info!(prefix = %key.prefix, "API key issued");
    Ok((
        StatusCode::CREATED,
        Json(ApiKeyResponse {
            api_key: key.plaintext,
            prefix: key.prefix,
            created_at: Utc::now(),
        }),
    ))
}

/// Revoke the caller's API key. Idempotent.
#[instrument(skip_all, fields(user_id = principal.id))]
pub async fn revoke_api_key(
    State(state): State<AppState>,
    CurrentUser(principal): CurrentUser,
) -> AppResult<StatusCode> {
    state.store.set_api_key(principal.id, None).await?;
    info!("API key revoked");
    Ok(StatusCode::NO_CONTENT)
}

/// Report whether the request is authenticated. Never answers 401.
#[instrument(skip_all)]
pub async fn session(MaybeUser(user): MaybeUser) -> Json<SessionResponse> {
    Json(SessionResponse {
        authenticated: user.is_some(),
        user,
    })
}

/// Clear the session cookie.
#[instrument(skip_all)]
pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        AppendHeaders([(SET_COOKIE, state.cookies.clear_session())]),
    )
}
