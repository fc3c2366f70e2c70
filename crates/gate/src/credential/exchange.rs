// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Long-lived token exchange (`grant_type=fb_exchange_token`).

use crate::credential::oauth::TokenResponse;

/// Trade a short-lived token for a long-lived one.
///
/// `graph_url` is the versioned Graph API base; the exchange lives at
/// `{graph_url}/oauth/access_token`.
pub async fn exchange_long_lived(
    client: &reqwest::Client,
    graph_url: &str,
    app_id: &str,
    app_secret: &str,
    short_lived: &str,
) -> anyhow::Result<TokenResponse> {
    let url = format!("{}/oauth/access_token", graph_url.trim_end_matches('/'));
    let resp = client
        .get(&url)
        .query(&[
            ("grant_type", "fb_exchange_token"),
            ("client_id", app_id),
            ("client_secret", app_secret),
            ("fb_exchange_token", short_lived),
        ])
        .send()
        .await?;

    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("token exchange failed ({status}): {text}");
    }

    let token: TokenResponse = resp.json().await?;
    if token.access_token.is_empty() {
        anyhow::bail!("token exchange returned an empty access token");
    }
    Ok(token)
}
