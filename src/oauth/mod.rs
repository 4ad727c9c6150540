//! OAuth login: signed CSRF state, identity providers and the handshake.

mod completion;
mod coordinator;
mod error;
pub mod provider;
pub mod state;

pub use completion::CompletionPage;
pub use coordinator::{Completion, LoginRedirect, OAuthCoordinator, cli_callback_url};
pub use error::OAuthError;
pub use provider::{
    GitHubProvider, GoogleProvider, IdentityProvider, ProviderError, ProviderMap, build_providers,
};
pub use state::{OAuthState, ReturnFlow, StateSigner, StateTokenError};
