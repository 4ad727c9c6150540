//! Session and OAuth state cookies.
//!
//! Both cookies are `HttpOnly` and `SameSite=Lax`, and carry `Secure` unless
//! the server runs in insecure mode. The state cookie is scoped to `/auth`
//! so it is only ever sent back to the OAuth callback.

use axum::http::HeaderMap;
use axum::http::header::COOKIE;

use super::session::SESSION_TTL_SECS;

pub const SESSION_COOKIE: &str = "gatehouse_session";
pub const STATE_COOKIE: &str = "gatehouse_oauth_state";

/// Path prefix the state cookie is restricted to.
pub const STATE_COOKIE_PATH: &str = "/auth";

/// Lifetime of an in-flight OAuth login, in seconds.
pub const STATE_TTL_SECS: i64 = 600;

/// Attributes shared by every cookie this server sets.
#[derive(Debug, Clone, Copy)]
pub struct CookiePolicy {
    pub secure: bool,
}

impl CookiePolicy {
    pub fn new(secure: bool) -> Self {
        Self { secure }
    }

    pub fn session(&self, token: &str) -> String {
        self.build(SESSION_COOKIE, token, "/", SESSION_TTL_SECS)
    }

    pub fn clear_session(&self) -> String {
        self.build(SESSION_COOKIE, "", "/", 0)
    }

    pub fn state(&self, state: &str) -> String {
        self.build(STATE_COOKIE, state, STATE_COOKIE_PATH, STATE_TTL_SECS)
    }

    pub fn clear_state(&self) -> String {
        self.build(STATE_COOKIE, "", STATE_COOKIE_PATH, 0)
    }

    fn build(&self, name: &str, value: &str, path: &str, max_age: i64) -> String {
        let mut cookie =
            format!("{name}={value}; Path={path}; HttpOnly; SameSite=Lax; Max-Age={max_age}");
        if self.secure {
            cookie.push_str("; Secure");
        }
        cookie
    }
}

/// Value of the first cookie called `name` across all `Cookie` headers.
pub fn read_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_session_cookie_attributes() {
        let cookie = CookiePolicy::new(true).session("tok");
        assert_eq!(
            cookie,
            "gatehouse_session=tok; Path=/; HttpOnly; SameSite=Lax; Max-Age=604800; Secure"
        );
    }

    #[test]
    fn test_state_cookie_scoped_to_auth() {
        let cookie = CookiePolicy::new(false).state("abc.def");
        assert_eq!(
            cookie,
            "gatehouse_oauth_state=abc.def; Path=/auth; HttpOnly; SameSite=Lax; Max-Age=600"
        );
    }

    #[test]
    fn test_clear_cookies_expire_immediately() {
        let policy = CookiePolicy::new(true);
        assert!(policy.clear_state().contains("Max-Age=0"));
        assert!(policy.clear_state().contains("Path=/auth"));
        assert!(policy.clear_session().starts_with("gatehouse_session=;"));
    }

    #[test]
    fn test_read_cookie() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; gatehouse_session=abc.def.ghi"),
        );
        assert_eq!(read_cookie(&headers, SESSION_COOKIE), Some("abc.def.ghi"));
        assert_eq!(read_cookie(&headers, STATE_COOKIE), None);
    }

    #[test]
    fn test_read_cookie_across_multiple_headers() {
        let mut headers = HeaderMap::new();
        headers.append(COOKIE, HeaderValue::from_static("a=1"));
        headers.append(COOKIE, HeaderValue::from_static("gatehouse_oauth_state=s.t"));
        assert_eq!(read_cookie(&headers, STATE_COOKIE), Some("s.t"));
    }

    #[test]
    fn test_read_cookie_requires_exact_name() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("xgatehouse_session=evil"),
        );
        assert_eq!(read_cookie(&headers, SESSION_COOKIE), None);
    }
}
