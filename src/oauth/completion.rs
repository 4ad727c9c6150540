//! Browser completion page for the popup login flow.
//!
//! The page posts a success message to the window that opened the popup and
//! closes itself. Its only script is allow-listed by a per-response CSP nonce.

use axum::http::HeaderValue;
use axum::http::header::{CACHE_CONTROL, CONTENT_SECURITY_POLICY};
use axum::response::{Html, IntoResponse, Response};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use rand::RngCore;

const CSP_NONCE_BYTES: usize = 16;

/// Message type the frontend listens for.
pub const LOGIN_MESSAGE_TYPE: &str = "gatehouse:login";

pub const COMPLETION_CACHE_CONTROL: &str = "no-store, no-cache, must-revalidate";

/// A rendered completion page and the nonce its script is bound to.
#[derive(Debug, Clone)]
pub struct CompletionPage {
    nonce: String,
    html: String,
}

impl CompletionPage {
    /// Render a page that notifies `frontend_origin` and closes the popup.
    pub fn render(frontend_origin: &str) -> Self {
        let mut bytes = [0u8; CSP_NONCE_BYTES];
        rand::rng().fill_bytes(&mut bytes);
        let nonce = STANDARD.encode(bytes);

        let origin = script_string(frontend_origin);
        let message_type = script_string(LOGIN_MESSAGE_TYPE);
        let html = format!(
            r#"<!DOCTYPE html>
<html>
<head><meta charset="utf-8"><title>Signed in</title></head>
<body>
<p>Login complete. You can close this window.</p>
<script nonce="{nonce}">
if (window.opener) {{
  window.opener.postMessage({{ type: {message_type}, status: "success" }}, {origin});
}}
window.close();
</script>
</body>
</html>
"#
        );

        Self { nonce, html }
    }

    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    pub fn html(&self) -> &str {
        &self.html
    }

    pub fn content_security_policy(&self) -> String {
        format!("default-src 'none'; script-src 'nonce-{}'", self.nonce)
    }
}

impl IntoResponse for CompletionPage {
    fn into_response(self) -> Response {
        let csp = self.content_security_policy();
        let mut response = Html(self.html).into_response();
        let headers = response.headers_mut();
        // The nonce is base64, so the policy is always a valid header value.
        if let Ok(value) = HeaderValue::from_str(&csp) {
            headers.insert(CONTENT_SECURITY_POLICY, value);
        }
        headers.insert(
            CACHE_CONTROL,
            HeaderValue::from_static(COMPLETION_CACHE_CONTROL),
        );
        response
    }
}

/// JSON string literal safe to embed inside a `<script>` element.
fn script_string(value: &str) -> String {
    serde_json::to_string(value)
        .unwrap_or_else(|_| "\"\"".to_string())
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
}
