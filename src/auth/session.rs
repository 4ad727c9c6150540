//! Signed session tokens.
//!
//! Session tokens are HS256 JWTs carrying the user's id, email and display
//! name. Expiry is fixed at seven days from issuance and is always checked;
//! there is no leeway and no refresh. Verification pins the algorithm, so a
//! token whose header names anything other than HS256 is rejected before the
//! signature is considered.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::Principal;

/// Lifetime of a session token, in seconds.
pub const SESSION_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Claims embedded in every session token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject: the user's numeric id, as a string.
    pub sub: String,
    pub email: String,
    pub name: String,
    pub iat: i64,
    pub nbf: i64,
    pub exp: i64,
}

impl SessionClaims {
    /// The numeric user id carried in `sub`.
    pub fn user_id(&self) -> Result<i64, SessionTokenError> {
        self.sub
            .parse::<i64>()
            .map_err(|_| SessionTokenError::MissingSubject)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionTokenError {
    #[error("session token expired")]
    Expired,

    #[error("session token not yet valid")]
    NotYetValid,

    #[error("session token uses an unexpected signing algorithm")]
    InvalidAlgorithm,

    #[error("session token signature is invalid")]
    InvalidSignature,

    #[error("session token subject is missing or malformed")]
    MissingSubject,

    #[error("session token is malformed")]
    Malformed,

    #[error("failed to sign session token: {0}")]
    Signing(String),
}

impl From<jsonwebtoken::errors::Error> for SessionTokenError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => SessionTokenError::Expired,
            ErrorKind::ImmatureSignature => SessionTokenError::NotYetValid,
            ErrorKind::InvalidAlgorithm => SessionTokenError::InvalidAlgorithm,
            ErrorKind::InvalidSignature => SessionTokenError::InvalidSignature,
            ErrorKind::MissingRequiredClaim(claim) if claim == "sub" => {
                SessionTokenError::MissingSubject
            }
            _ => SessionTokenError::Malformed,
        }
    }
}

/// Issues and verifies session tokens with one symmetric secret.
#[derive(Clone)]
pub struct SessionSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl SessionSigner {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.validate_nbf = true;
        validation.set_required_spec_claims(&["exp", "nbf", "sub"]);

        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Issue a token for `principal`, valid from now for [`SESSION_TTL_SECS`].
    pub fn issue(&self, principal: &Principal) -> Result<String, SessionTokenError> {
        self.issue_at(principal, Utc::now())
    }

    /// Issue a token as if at `issued_at`.
    pub fn issue_at(
        &self,
        principal: &Principal,
        issued_at: DateTime<Utc>,
    ) -> Result<String, SessionTokenError> {
        let iat = issued_at.timestamp();
        let claims = SessionClaims {
            sub: principal.id.to_string(),
            email: principal.email.clone(),
            name: principal.name.clone(),
            iat,
            nbf: iat,
            exp: (issued_at + Duration::seconds(SESSION_TTL_SECS)).timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| SessionTokenError::Signing(e.to_string()))
    }

    /// Verify signature, algorithm and time claims, returning the claims.
    ///
    /// A token that passes here still has to name a user that exists and is
    /// active; that check belongs to the credential validator.
    pub fn verify(&self, token: &str) -> Result<SessionClaims, SessionTokenError> {
        let data = decode::<SessionClaims>(token, &self.decoding, &self.validation)?;
        data.claims.user_id()?;
        Ok(data.claims)
    }
}

impl std::fmt::Debug for SessionSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionSigner").finish_non_exhaustive()
    }
}
