mod api;
mod principal;

pub use api::{ApiKeyResponse, CallbackParams, HealthResponse, LoginQuery, SessionResponse};
pub use principal::Principal;
