//! # Gatehouse
//!
//! Request gatekeeping for a multi-tenant Axum API:
//!
//! - **Client identity**: trusted-proxy aware resolution of the caller's address
//! - **Rate limiting**: per-client token buckets with bounded memory
//! - **Credentials**: session tokens (HS256) and API keys, resolved to a principal
//! - **OAuth login**: signed CSRF state, browser popup and CLI completion flows
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      Axum HTTP Server                       │
//! ├─────────────────────────────────────────────────────────────┤
//! │  CORS → Request ID → Trace → Rate Limit → Auth (per group)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Handlers (health, oauth, account)                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  OAuthCoordinator · CredentialValidator · VisitorLimiter    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  UserStore · IdentityProvider (GitHub, Google)              │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::net::SocketAddr;
//! use gatehouse::{AppState, Config, build_router};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::from_env()?;
//!     let state = AppState::from_config(config)?;
//!     let app = build_router(state.clone());
//!
//!     let listener = tokio::net::TcpListener::bind("0.0.0.0:3000").await?;
//!     axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>()).await?;
//!     state.shutdown().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Development
//!
//! Skip credential checks entirely (never in production):
//! ```bash
//! INSECURE_AUTH=enable-insecure-auth cargo run
//! ```

pub mod auth;
pub mod config;
pub mod error;
pub mod handlers;
pub mod metrics;
pub mod middleware;
pub mod models;
pub mod oauth;
pub mod routes;
pub mod state;
pub mod store;
pub mod utils;

// Re-exports for convenience
pub use config::Config;
pub use error::{AppError, AppResult};
pub use models::Principal;
pub use routes::build_router;
pub use state::AppState;
pub use store::{InMemoryUserStore, UserStore};
