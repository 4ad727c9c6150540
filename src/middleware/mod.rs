//! HTTP middleware for client identification, rate limiting, and authentication.
//!
//! - **Client Identity**: trusted-proxy aware `X-Forwarded-For` resolution
//! - **Rate Limiting**: per-client token buckets with bounded memory
//! - **Authentication**: session token or API key, strict or optional
//!
//! # Architecture
//!
//! ```text
//! Request → Rate Limiter → Auth (per route group) → Handler → Response
//!              ↓                 ↓
//!          429 + Retry-After  400 / 401 / 500
//! ```
//!
//! Request IDs, tracing and CORS come from `tower-http` and are wired in
//! [`crate::routes`].

pub mod auth;
pub mod ip;
pub mod rate_limit;

pub use auth::{AuthLayer, AuthMode, CurrentUser, MaybeUser};
pub use ip::{
    ClientIp, TrustedProxyConfig, UNKNOWN_IP, client_ip_from_request, resolve_client_ip,
};
pub use rate_limit::{LimiterSettings, RateLimitError, RateLimitLayer, VisitorLimiter};
