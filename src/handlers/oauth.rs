//! OAuth login endpoints.
//!
//! - `GET /auth/{provider}` - start a login (browser or CLI flow)
//! - `GET /auth/{provider}/callback` - finish it
//!
//! The state cookie set by the first endpoint is cleared by the second on
//! every outcome, success or failure, so one state can never be presented
//! twice from the same browser.

use axum::extract::rejection::QueryRejection;
use axum::extract::{Path, Query, State};
use axum::http::header::SET_COOKIE;
use axum::response::{AppendHeaders, IntoResponse, Redirect, Response};
use tracing::{debug, instrument};

use crate::auth::{STATE_COOKIE, read_cookie};
use crate::error::{AppError, AppResult};
use crate::models::{CallbackParams, LoginQuery};
use crate::oauth::{Completion, OAuthError, ReturnFlow};
use crate::state::AppState;

/// Start a login with `provider`.
///
/// Stores the signed state in a short-lived cookie scoped to `/auth` and
/// redirects to the provider's consent page.
///
/// # Errors
///
/// - 404 for an unknown or disabled provider
/// - 400 for a malformed `cli` / `redirect_port` pair or query string
#[instrument(skip(state, query))]
pub async fn begin_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    query: Result<Query<LoginQuery>, QueryRejection>,
) -> AppResult<Response> {
    let Query(query) =
        query.map_err(|rejection| OAuthError::InvalidLoginRequest(rejection.body_text()))?;
    let flow = ReturnFlow::from_query(query.cli.as_deref(), query.redirect_port.as_deref())?;
    let redirect = state.oauth.begin(&provider, flow)?;

    debug!(provider = %provider, ?flow, "Redirecting to identity provider");
    Ok((
        AppendHeaders([(SET_COOKIE, state.cookies.state(&redirect.state))]),
        Redirect::temporary(&redirect.location),
    )
        .into_response())
}

/// Finish a login from the provider's redirect.
///
/// Browser flow: sets the session cookie and renders the popup completion
/// page. CLI flow: redirects to the CLI's local listener with the token.
#[instrument(skip(state, params, headers))]
pub async fn complete_login(
    State(state): State<AppState>,
    Path(provider): Path<String>,
    params: Result<Query<CallbackParams>, QueryRejection>,
    headers: axum::http::HeaderMap,
) -> Response {
    let cookie_state = read_cookie(&headers, STATE_COOKIE).filter(|v| !v.is_empty());
    let clear_state = (SET_COOKIE, state.cookies.clear_state());

    let result = match params {
        Ok(Query(params)) => state.oauth.complete(&provider, &params, cookie_state).await,
        Err(rejection) => Err(state.oauth.reject(
            &provider,
            OAuthError::MalformedCallback(rejection.body_text()),
        )),
    };

    match result {
        Ok(Completion::Cli { location }) => (
            AppendHeaders([clear_state]),
            Redirect::temporary(&location),
        )
            .into_response(),
        Ok(Completion::Browser {
            session_token,
            page,
        }) => (
            AppendHeaders([clear_state, (SET_COOKIE, state.cookies.session(&session_token))]),
            page,
        )
            .into_response(),
        Err(err) => (AppendHeaders([clear_state]), AppError::from(err)).into_response(),
    }
}
