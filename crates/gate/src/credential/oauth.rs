// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! OAuth helper types and URL building for the implicit token flow.

use serde::{Deserialize, Serialize};

/// Token response from the Graph API `oauth/access_token` endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_in: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<String>,
}

/// Redirect target served by the local callback server.
pub fn redirect_uri(port: u16) -> String {
    format!("http://localhost:{port}/callback")
}

/// Build the browser authorization URL for the implicit (`response_type=token`) flow.
///
/// The redirect URI is left readable (`:` and `/` unescaped) because the
/// dialog matches it against the app's registered redirect list verbatim.
pub fn build_auth_url(dialog_url: &str, client_id: &str, port: u16, scope: &str) -> String {
    format!(
        "{dialog_url}?client_id={client_id}\
         &redirect_uri={redirect_uri}\
         &scope={scope}\
         &response_type=token",
        client_id = urlencoding(client_id),
        redirect_uri = redirect_uri(port),
        scope = urlencoding(scope),
    )
}

/// Build a URL-encoded query string.
pub fn urlencoded(params: &[(&str, &str)]) -> String {
    params
        .iter()
        .map(|(k, v)| format!("{}={}", urlencoding(k), urlencoding(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
///
/// `,` is kept literal so scope lists stay readable.
pub fn urlencoding(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' | b',' => {
                out.push(b as char);
            }
            _ => {
                out.push('%');
                out.push(char::from(HEX[(b >> 4) as usize]));
                out.push(char::from(HEX[(b & 0xf) as usize]));
            }
        }
    }
    out
}

const HEX: &[u8; 16] = b"0123456789ABCDEF";

#[cfg(test)]
#[path = "oauth_tests.rs"]
mod tests;
