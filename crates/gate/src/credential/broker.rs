// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Remote token broker client.
//!
//! In broker mode the OAuth dance happens on the broker's side: we ask it for
//! a login URL, the user completes the flow in a browser, and we poll the
//! broker until it hands back a bearer token.

use std::time::Duration;

use serde::Deserialize;

use crate::credential::{mask_token, Credential};

/// Response from `POST {broker}/meta/auth`.
#[derive(Debug, Clone, Deserialize)]
pub struct BrokerLogin {
    #[serde(rename = "loginUrl")]
    pub login_url: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Response from `GET {broker}/meta/token`.
#[derive(Debug, Clone, Deserialize)]
struct BrokerToken {
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    expires_at: Option<String>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

/// Client for the token broker API.
pub struct TokenBroker {
    api_url: String,
    api_token: String,
    http: reqwest::Client,
}

impl TokenBroker {
    pub fn new(api_url: impl Into<String>, api_token: impl Into<String>) -> Self {
        crate::ensure_crypto();
        Self {
            api_url: api_url.into().trim_end_matches('/').to_owned(),
            api_token: api_token.into(),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        }
    }

    /// Ask the broker to start a login flow and return its login URL.
    pub async fn initiate_auth(&self) -> anyhow::Result<BrokerLogin> {
        let url = format!("{}/meta/auth", self.api_url);
        tracing::debug!(url = %url, "initiating broker auth flow");
        let resp = self.http.post(&url).bearer_auth(&self.api_token).send().await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("broker auth initiation failed ({status}): {text}");
        }

        let login: BrokerLogin = resp.json().await?;
        Ok(login)
    }

    /// Fetch the current token from the broker.
    ///
    /// `Ok(None)` means the broker has no token yet (the user has not finished
    /// authorizing). A rejected broker token is an error.
    pub async fn fetch_token(&self) -> anyhow::Result<Option<Credential>> {
        let url = format!("{}/meta/token", self.api_url);
        let resp = self.http.get(&url).bearer_auth(&self.api_token).send().await?;
        let status = resp.status();

        if status == reqwest::StatusCode::NOT_FOUND {
            tracing::debug!("broker has no token yet, authorization pending");
            return Ok(None);
        }
        if status == reqwest::StatusCode::UNAUTHORIZED {
            anyhow::bail!("broker rejected the API token (check PIPEBOARD_API_TOKEN)");
        }
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("broker token request failed ({status}): {text}");
        }

        let body: BrokerToken = resp.json().await?;
        match body.access_token.filter(|t| !t.is_empty()) {
            Some(token) => {
                tracing::info!(token = %mask_token(&token), "received token from broker");
                Ok(Some(Credential::brokered(
                    token,
                    body.expires_at,
                    Some(body.token_type.unwrap_or_else(|| "bearer".to_owned())),
                )))
            }
            None => {
                if let Some(err) = body.error {
                    tracing::warn!(error = %err, "broker token response carried an error");
                }
                Ok(None)
            }
        }
    }

    /// Poll the broker until a token is available or `timeout` elapses.
    pub async fn poll_token(
        &self,
        interval: Duration,
        timeout: Duration,
    ) -> anyhow::Result<Credential> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if let Some(cred) = self.fetch_token().await? {
                return Ok(cred);
            }
            if tokio::time::Instant::now() + interval >= deadline {
                anyhow::bail!("timed out waiting for the broker to issue a token");
            }
            tokio::time::sleep(interval).await;
        }
    }
}

#[cfg(test)]
#[path = "broker_tests.rs"]
mod tests;
