// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Graph API client.
//!
//! Every call goes through [`GraphClient::request`], which classifies failures
//! and invalidates the shared credential when the API rejects the token it
//! currently holds.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use serde_json::{Map, Value};

use crate::credential::provider::CredentialProvider;

/// Graph error codes that mean the token is unusable.
pub const AUTH_ERROR_CODES: [i64; 5] = [4, 10, 102, 190, 200];

const APP_ID_ERROR_MARKER: &str = "Provide valid app ID";

/// Failure of a Graph API call.
#[derive(Debug, Clone)]
pub enum GraphError {
    /// The API answered with a non-success status. `body` is the parsed error
    /// payload, or `{"status_code", "text"}` when it was not JSON.
    Api { status: u16, body: Value },
    /// No usable response (connect failure, timeout, undecodable success body).
    Transport(String),
}

impl GraphError {
    /// The `error` object of an API failure, if it has one.
    pub fn error_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::Api { body, .. } => body.get("error").and_then(Value::as_object),
            Self::Transport(_) => None,
        }
    }

    pub fn code(&self) -> Option<i64> {
        self.error_object()?.get("code")?.as_i64()
    }

    pub fn api_message(&self) -> Option<&str> {
        self.error_object()?.get("message")?.as_str()
    }

    /// Code 200 "Provide valid app ID": a configuration problem, not a bad token.
    pub fn is_app_id_error(&self) -> bool {
        self.code() == Some(200)
            && self.api_message().is_some_and(|m| m.contains(APP_ID_ERROR_MARKER))
    }

    /// Whether the failure means the credential must be discarded.
    pub fn is_auth_error(&self) -> bool {
        let Self::Api { status, .. } = self else {
            return false;
        };
        if *status == 401 || *status == 403 {
            return true;
        }
        !self.is_app_id_error() && self.code().is_some_and(|c| AUTH_ERROR_CODES.contains(&c))
    }

    /// JSON rendering returned to tool callers.
    pub fn to_value(&self) -> Value {
        match self {
            Self::Api { status, body } => serde_json::json!({
                "error": format!("HTTP Error: {status}"),
                "details": body,
            }),
            Self::Transport(msg) => serde_json::json!({ "error": msg }),
        }
    }
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Api { status, .. } => match self.api_message() {
                Some(msg) => write!(f, "HTTP Error: {status}: {msg}"),
                None => write!(f, "HTTP Error: {status}"),
            },
            Self::Transport(msg) => write!(f, "request failed: {msg}"),
        }
    }
}

impl std::error::Error for GraphError {}

/// HTTP client for the versioned Graph API.
pub struct GraphClient {
    base_url: String,
    provider: Arc<CredentialProvider>,
    client: reqwest::Client,
}

impl GraphClient {
    pub fn new(provider: Arc<CredentialProvider>) -> Self {
        crate::ensure_crypto();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(concat!("adsgate/", env!("CARGO_PKG_VERSION")))
            .build()
            .unwrap_or_default();
        Self { base_url: provider.graph_url().to_owned(), provider, client }
    }

    fn url(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url, endpoint.trim_start_matches('/'))
    }

    /// `GET {graph}/{endpoint}` with `params` and the token as query parameters.
    pub async fn get(
        &self,
        endpoint: &str,
        token: &str,
        params: &[(&str, &str)],
    ) -> Result<Value, GraphError> {
        tracing::debug!(endpoint, ?params, "graph GET");
        let req = self.client.get(self.url(endpoint)).query(params).query(&[("access_token", token)]);
        self.request(req, token).await
    }

    /// `POST {graph}/{endpoint}` with `fields` plus the token as a JSON body.
    pub async fn post(
        &self,
        endpoint: &str,
        token: &str,
        fields: &IndexMap<String, Value>,
    ) -> Result<Value, GraphError> {
        tracing::debug!(endpoint, fields = ?fields.keys().collect::<Vec<_>>(), "graph POST");
        let mut body = fields.clone();
        body.insert("access_token".to_owned(), Value::String(token.to_owned()));
        let req = self.client.post(self.url(endpoint)).json(&body);
        self.request(req, token).await
    }

    /// Identify the token's owner (`GET /me`).
    pub async fn me(&self, token: &str) -> Result<Value, GraphError> {
        self.get("me", token, &[("fields", "id,name")]).await
    }

    async fn request(&self, req: reqwest::RequestBuilder, token: &str) -> Result<Value, GraphError> {
        let resp = req.send().await.map_err(|e| GraphError::Transport(e.to_string()))?;
        let status = resp.status();
        let text = resp.text().await.map_err(|e| GraphError::Transport(e.to_string()))?;

        if status.is_success() {
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return serde_json::from_str(&text).map_err(|e| GraphError::Transport(e.to_string()));
        }

        let body = serde_json::from_str::<Value>(&text).unwrap_or_else(|_| {
            serde_json::json!({ "status_code": status.as_u16(), "text": text })
        });
        let err = GraphError::Api { status: status.as_u16(), body };
        tracing::warn!(status = status.as_u16(), code = ?err.code(), "graph API error");

        if err.is_app_id_error() {
            tracing::warn!(
                app_id = ?self.provider.app_id(),
                "graph API rejected the app ID, check META_APP_ID"
            );
        } else if err.is_auth_error() {
            tracing::info!("graph API rejected the token");
            self.provider.invalidate_if_current(token);
        }
        Err(err)
    }
}

#[cfg(test)]
#[path = "graph_tests.rs"]
mod tests;
