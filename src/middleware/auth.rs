//! Credential resolution middleware.
//!
//! # Modes
//!
//! - **Required** ([`AuthLayer::required`]): missing or invalid credentials
//!   end the request with 401 (400 for a malformed `Authorization` header).
//! - **Optional** ([`AuthLayer::optional`]): credential problems downgrade the
//!   request to anonymous. Storage failures still end it with 500, since
//!   "the database is down" must not look like "you are logged out".
//!
//! Pre-flight `OPTIONS` requests pass through untouched in both modes.
//!
//! # Handler Access
//!
//! The resolved principal is stored as a typed [`CurrentUser`] extension and
//! read back with the [`CurrentUser`] or [`MaybeUser`] extractors.
//!
//! ```rust,ignore
//! async fn me(CurrentUser(principal): CurrentUser) -> Json<Principal> {
//!     Json(principal)
//! }
//! ```

use std::sync::Arc;
use std::task::{Context, Poll};

use axum::body::Body;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{Method, Request, Response};
use axum::response::IntoResponse;
use tower::{Layer, Service};
use tracing::{debug, warn};

use crate::auth::{AuthError, CredentialValidator};
use crate::error::AppError;
use crate::metrics;
use crate::models::Principal;

/// How a missing or bad credential is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    Required,
    Optional,
}

/// The authenticated principal for this request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Principal);

/// The principal if the request carried a valid credential.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<Principal>);

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or_else(|| AppError::from(AuthError::MissingCredentials))
    }
}

impl<S> FromRequestParts<S> for MaybeUser
where
    S: Send + Sync,
{
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(MaybeUser(
            parts
                .extensions
                .get::<CurrentUser>()
                .map(|CurrentUser(p)| p.clone()),
        ))
    }
}

/// Credential resolution layer.
#[derive(Clone)]
pub struct AuthLayer {
    validator: Arc<dyn CredentialValidator>,
    mode: AuthMode,
}

impl AuthLayer {
    pub fn required(validator: Arc<dyn CredentialValidator>) -> Self {
        Self {
            validator,
            mode: AuthMode::Required,
        }
    }

    pub fn optional(validator: Arc<dyn CredentialValidator>) -> Self {
        Self {
            validator,
            mode: AuthMode::Optional,
        }
    }
}

impl<S> Layer<S> for AuthLayer {
    type Service = AuthService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        AuthService {
            inner,
            validator: self.validator.clone(),
            mode: self.mode,
        }
    }
}

/// Credential resolution service wrapper.
#[derive(Clone)]
pub struct AuthService<S> {
    inner: S,
    validator: Arc<dyn CredentialValidator>,
    mode: AuthMode,
}

impl<S> Service<Request<Body>> for AuthService<S>
where
    S: Service<Request<Body>, Response = Response<Body>> + Clone + Send + 'static,
    S::Future: Send,
{
    type Response = Response<Body>;
    type Error = S::Error;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, mut req: Request<Body>) -> Self::Future {
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        let validator = self.validator.clone();
        let mode = self.mode;

        Box::pin(async move {
            if req.method() == Method::OPTIONS {
                return inner.call(req).await;
            }

            match validator.resolve(req.headers()).await {
                Ok(principal) => {
                    debug!(user_id = principal.id, "Request authenticated");
                    req.extensions_mut().insert(CurrentUser(principal));
                    inner.call(req).await
                }
                Err(err) if mode == AuthMode::Optional && err.is_credential_failure() => {
                    if !matches!(err, AuthError::MissingCredentials) {
                        record_failure(&req, &err);
                    }
                    inner.call(req).await
                }
                Err(err) => {
                    record_failure(&req, &err);
                    Ok(AppError::from(err).into_response())
                }
            }
        })
    }
}

/// Log and count one failed resolution. Credentials never reach the log.
fn record_failure(req: &Request<Body>, err: &AuthError) {
    metrics::record_auth_failure(err.reason());

    let path = req.uri().path();
    match err {
        AuthError::MissingCredentials | AuthError::MalformedHeader(_) => {
            debug!(path, reason = err.reason(), "Credential missing or malformed");
        }
        // Logged at error level when rendered as a 500.
        AuthError::Storage(_) => {}
        _ => {
            warn!(path, reason = err.reason(), "Credential rejected");
        }
    }
}
