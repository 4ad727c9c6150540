use axum::http::HeaderMap;
use axum::http::header::AUTHORIZATION;

use super::api_key::is_api_key;
use super::cookies::{SESSION_COOKIE, read_cookie};
use super::error::AuthError;

/// A credential presented by the caller, classified once at the boundary.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    /// Opaque API key from an `Authorization: Bearer ghk_...` header.
    ApiKey(String),
    /// Signed session token from a bearer header or the session cookie.
    SessionToken(String),
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Credential::ApiKey(_) => f.write_str("ApiKey(**redacted**)"),
            Credential::SessionToken(_) => f.write_str("SessionToken(**redacted**)"),
        }
    }
}

impl Credential {
    /// Extract the caller's credential from request headers.
    ///
    /// An `Authorization` header wins over the session cookie. `Ok(None)`
    /// means no credential was presented at all.
    ///
    /// # Errors
    ///
    /// `AuthError::MalformedHeader` when `Authorization` is present but is not
    /// a non-empty `Bearer` credential.
    pub fn from_headers(headers: &HeaderMap) -> Result<Option<Self>, AuthError> {
        if let Some(value) = headers.get(AUTHORIZATION) {
            let value = value
                .to_str()
                .map_err(|_| AuthError::MalformedHeader("Authorization header is not valid text"))?;
            let token = bearer_token(value).ok_or(AuthError::MalformedHeader(
                "Authorization header must use the Bearer scheme",
            ))?;
            if token.is_empty() {
                return Err(AuthError::MalformedHeader("Bearer token is empty"));
            }
            return Ok(Some(Self::classify(token)));
        }

        Ok(read_cookie(headers, SESSION_COOKIE)
            .filter(|token| !token.is_empty())
            .map(|token| Credential::SessionToken(token.to_string())))
    }

    fn classify(token: &str) -> Self {
        if is_api_key(token) {
            Credential::ApiKey(token.to_string())
        } else {
            Credential::SessionToken(token.to_string())
        }
    }
}

/// Token part of a `Bearer` authorization value; the scheme is case-insensitive.
fn bearer_token(value: &str) -> Option<&str> {
    let (scheme, token) = value.trim().split_once(' ')?;
    scheme
        .eq_ignore_ascii_case("bearer")
        .then_some(token.trim())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use axum::http::header::COOKIE;

    fn headers(pairs: &[(axum::http::HeaderName, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.append(name.clone(), HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn test_no_credentials() {
        assert_eq!(Credential::from_headers(&HeaderMap::new()).unwrap(), None);
    }

    #[test]
    fn test_bearer_api_key() {
        let h = headers(&[(AUTHORIZATION, "Bearer ghk_abc123")]);
        assert_eq!(
            Credential::from_headers(&h).unwrap(),
            Some(Credential::ApiKey("ghk_abc123".to_string()))
        );
    }

    #[test]
    fn test_bearer_session_token_case_insensitive_scheme() {
        let h = headers(&[(AUTHORIZATION, "bearer eyJ.abc.def")]);
        assert_eq!(
            Credential::from_headers(&h).unwrap(),
            Some(Credential::SessionToken("eyJ.abc.def".to_string()))
        );
    }

    #[test]
    fn test_header_wins_over_cookie() {
        let h = headers(&[
            (AUTHORIZATION, "Bearer ghk_key"),
            (COOKIE, "gatehouse_session=cookie.token.value"),
        ]);
        assert_eq!(
            Credential::from_headers(&h).unwrap(),
            Some(Credential::ApiKey("ghk_key".to_string()))
        );
    }

    #[test]
    fn test_cookie_fallback() {
        let h = headers(&[(COOKIE, "gatehouse_session=cookie.token.value")]);
        assert_eq!(
            Credential::from_headers(&h).unwrap(),
            Some(Credential::SessionToken("cookie.token.value".to_string()))
        );
    }

    #[test]
    fn test_wrong_scheme_is_malformed() {
        let h = headers(&[(AUTHORIZATION, "Basic dXNlcjpwYXNz")]);
        assert!(matches!(
            Credential::from_headers(&h),
            Err(AuthError::MalformedHeader(_))
        ));

        let h = headers(&[(AUTHORIZATION, "Bearer")]);
        assert!(matches!(
            Credential::from_headers(&h),
            Err(AuthError::MalformedHeader(_))
        ));
    }

    #[test]
    fn test_empty_bearer_is_malformed() {
        let h = headers(&[(AUTHORIZATION, "Bearer    ")]);
        assert!(Credential::from_headers(&h).is_err());
    }

    #[test]
    fn test_debug_redacts() {
        let rendered = format!("{:?}", Credential::ApiKey("ghk_secret".to_string()));
        assert!(!rendered.contains("ghk_secret"));
    }
}
