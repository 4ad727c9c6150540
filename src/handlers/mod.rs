mod account;
mod health;
mod oauth;

pub use account::{create_api_key, logout, me, revoke_api_key, session};
pub use health::health_check;
pub use oauth::{begin_login, complete_login};
