//! Signed OAuth state tokens.
//!
//! Wire format: `payload.signature`, where `signature` is the unpadded
//! base64url HMAC-SHA256 of `payload`. The payload is `~`-separated:
//!
//! ```text
//! <nonce>~<issued_at>               browser flow
//! <nonce>~<issued_at>~cli~<port>    CLI flow
//! ```
//!
//! `nonce` is 32 random bytes (base64url) and `issued_at` is a unix timestamp.
//! A token is accepted for [`STATE_TTL_SECS`] after issuance.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use rand::RngCore;
use sha2::Sha256;
use thiserror::Error;

use super::OAuthError;
pub use crate::auth::cookies::STATE_TTL_SECS;

type HmacSha256 = Hmac<Sha256>;

/// Lowest port a CLI client may ask to be redirected to.
pub const MIN_CLI_PORT: u16 = 1024;

/// Clock skew tolerated for `issued_at` values slightly in the future.
const MAX_CLOCK_SKEW_SECS: i64 = 60;

const NONCE_BYTES: usize = 32;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum StateTokenError {
    #[error("state secret is unusable")]
    InvalidKey,

    #[error("state token is malformed")]
    Malformed,

    #[error("state token signature is invalid")]
    BadSignature,

    #[error("state token expired")]
    Expired,
}

/// Where the login completes once the provider redirects back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnFlow {
    /// Set the session cookie and render the popup completion page.
    Browser,
    /// Redirect to `http://localhost:<port>/callback` with the token.
    Cli { port: u16 },
}

impl ReturnFlow {
    /// Interpret the `cli` and `redirect_port` initiation parameters.
    pub fn from_query(cli: Option<&str>, redirect_port: Option<&str>) -> Result<Self, OAuthError> {
        match cli.map(str::trim) {
            None | Some("" | "false") => Ok(ReturnFlow::Browser),
            Some("true") => {
                let port = redirect_port.ok_or_else(|| {
                    OAuthError::InvalidLoginRequest(
                        "redirect_port is required when cli=true".to_string(),
                    )
                })?;
                parse_cli_port(port)
                    .map(|port| ReturnFlow::Cli { port })
                    .ok_or_else(|| {
                        OAuthError::InvalidLoginRequest(format!(
                            "redirect_port must be a number between {MIN_CLI_PORT} and 65535"
                        ))
                    })
            }
            Some(_) => Err(OAuthError::InvalidLoginRequest(
                "cli must be true or false".to_string(),
            )),
        }
    }
}

fn parse_cli_port(raw: &str) -> Option<u16> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse::<u16>().ok().filter(|port| *port >= MIN_CLI_PORT)
}

/// Decoded, signature-checked contents of a state token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OAuthState {
    /// CSRF nonce; also the single-use key.
    pub nonce: String,
    pub issued_at: i64,
    pub flow: ReturnFlow,
}

impl OAuthState {
    fn encode(&self) -> String {
        match self.flow {
            ReturnFlow::Browser => format!("{}~{}", self.nonce, self.issued_at),
            ReturnFlow::Cli { port } => format!("{}~{}~cli~{port}", self.nonce, self.issued_at),
        }
    }

    fn decode(payload: &str) -> Result<Self, StateTokenError> {
        let parts: Vec<&str> = payload.split('~').collect();
        let (nonce, issued, flow) = match parts.as_slice() {
            [nonce, issued] => (*nonce, *issued, ReturnFlow::Browser),
            [nonce, issued, "cli", port] => {
                let port = parse_cli_port(port).ok_or(StateTokenError::Malformed)?;
                (*nonce, *issued, ReturnFlow::Cli { port })
            }
            _ => return Err(StateTokenError::Malformed),
        };
        if nonce.is_empty() {
            return Err(StateTokenError::Malformed);
        }
        let issued_at = issued.parse().map_err(|_| StateTokenError::Malformed)?;

        Ok(Self {
            nonce: nonce.to_string(),
            issued_at,
            flow,
        })
    }
}

/// Issues and verifies state tokens with a pre-keyed HMAC.
#[derive(Clone)]
pub struct StateSigner {
    mac: HmacSha256,
}

impl StateSigner {
    pub fn new(secret: &[u8]) -> Result<Self, StateTokenError> {
        let mac = HmacSha256::new_from_slice(secret).map_err(|_| StateTokenError::InvalidKey)?;
        Ok(Self { mac })
    }

    /// Issue a fresh state token for `flow`.
    pub fn issue(&self, flow: ReturnFlow) -> String {
        self.issue_at(flow, Utc::now())
    }

    pub fn issue_at(&self, flow: ReturnFlow, now: DateTime<Utc>) -> String {
        let mut nonce = [0u8; NONCE_BYTES];
        rand::rng().fill_bytes(&mut nonce);

        let payload = OAuthState {
            nonce: URL_SAFE_NO_PAD.encode(nonce),
            issued_at: now.timestamp(),
            flow,
        }
        .encode();

        format!("{payload}.{}", self.sign(&payload))
    }

    /// Verify a token's signature and age, then decode it.
    pub fn verify(&self, token: &str) -> Result<OAuthState, StateTokenError> {
        self.verify_at(token, Utc::now())
    }

    pub fn verify_at(&self, token: &str, now: DateTime<Utc>) -> Result<OAuthState, StateTokenError> {
        let (payload, signature) = token.rsplit_once('.').ok_or(StateTokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| StateTokenError::Malformed)?;

        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| StateTokenError::BadSignature)?;

        let state = OAuthState::decode(payload)?;
        let age = now.timestamp() - state.issued_at;
        if age > STATE_TTL_SECS || age < -MAX_CLOCK_SKEW_SECS {
            return Err(StateTokenError::Expired);
        }
        Ok(state)
    }

    fn sign(&self, payload: &str) -> String {
        let mut mac = self.mac.clone();
        mac.update(payload.as_bytes());
        URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes())
    }
}

impl std::fmt::Debug for StateSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSigner").finish_non_exhaustive()
    }
}
