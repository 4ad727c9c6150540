//! Fuzz testing for credential and client-identity parsing.
//!
//! Every parser that sees attacker-controlled request data must return an
//! error rather than panic, whatever the input.
//!
//! # Running the Fuzz Tests
//!
//! ```bash
//! # Install cargo-fuzz (requires nightly)
//! cargo +nightly install cargo-fuzz
//!
//! # Run the credential fuzz target
//! cargo +nightly fuzz run fuzz_credentials
//!
//! # Run with a time limit (e.g., 60 seconds)
//! cargo +nightly fuzz run fuzz_credentials -- -max_total_time=60
//! ```
//!
//! # What This Tests
//!
//! - `Credential::from_headers`: `Authorization` and `Cookie` parsing
//! - `StateSigner::verify`: OAuth state token decoding
//! - `SessionSigner::verify`: session token decoding
//! - `ReturnFlow::from_query`: CLI initiation parameters
//! - `resolve_client_ip`: peer address and `X-Forwarded-For` handling

#![no_main]

use std::sync::LazyLock;

use axum::http::header::{AUTHORIZATION, COOKIE};
use axum::http::{HeaderMap, HeaderValue};
use gatehouse::auth::{Credential, SessionSigner};
use gatehouse::middleware::{TrustedProxyConfig, resolve_client_ip};
use gatehouse::oauth::{ReturnFlow, StateSigner};
use libfuzzer_sys::fuzz_target;

const SECRET: &[u8] = b"fuzz-secret-0123456789abcdef0123";

static STATES: LazyLock<Option<StateSigner>> = LazyLock::new(|| StateSigner::new(SECRET).ok());
static SESSIONS: LazyLock<SessionSigner> = LazyLock::new(|| SessionSigner::new(SECRET));
static TRUSTED: LazyLock<TrustedProxyConfig> = LazyLock::new(|| {
    TrustedProxyConfig::new(&["10.0.0.0/8".to_string(), "::1".to_string()])
});

fuzz_target!(|data: &[u8]| {
    // Raw header bytes, not necessarily UTF-8.
    if let Ok(value) = HeaderValue::from_bytes(data) {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, value.clone());
        let _ = Credential::from_headers(&headers);

        let mut headers = HeaderMap::new();
        headers.insert(COOKIE, value);
        let _ = Credential::from_headers(&headers);
    }

    let Ok(s) = std::str::from_utf8(data) else {
        return;
    };

    if let Some(states) = STATES.as_ref() {
        let _ = states.verify(s);
    }
    let _ = SESSIONS.verify(s);

    let mid = (0..=s.len() / 2).rev().find(|i| s.is_char_boundary(*i)).unwrap_or(0);
    let (left, right) = s.split_at(mid);
    let _ = ReturnFlow::from_query(Some(left), Some(right));
    let _ = ReturnFlow::from_query(Some("true"), Some(s));

    let _ = resolve_client_ip(left, &TRUSTED, Some(right));
    let _ = resolve_client_ip("10.0.0.1:443", &TRUSTED, Some(s));
});
