// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::time::Duration;

use clap::{Parser, Subcommand};
use serde_json::{json, Value};

use crate::config::GateConfig;
use crate::credential::mask_token;
use crate::credential::provider::{AuthStatus, LoginLink};
use crate::gate::Gate;

/// How long `login` waits for the browser flow to deliver a token.
pub const LOGIN_TIMEOUT: Duration = Duration::from_secs(300);

const LOGIN_POLL: Duration = Duration::from_millis(500);
const BROKER_POLL: Duration = Duration::from_secs(5);

#[derive(Debug, Parser)]
#[command(name = "adsgate", version, about = "Meta Ads Graph API tools with browser-confirmed updates")]
pub struct Cli {
    #[command(flatten)]
    pub config: GateConfig,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve tools over stdio (default).
    Serve,
    /// Log in through the browser and cache the token.
    Login {
        /// Seconds to wait for the browser flow to finish.
        #[arg(long, default_value_t = LOGIN_TIMEOUT.as_secs())]
        timeout_secs: u64,
    },
    /// Remove the cached token.
    Logout,
    /// Show the cached token and auth mode.
    Status,
}

/// Run the selected command to completion.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let gate = Gate::new(&cli.config);
    match cli.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!(
                broker = gate.provider().broker_mode(),
                env_token = gate.provider().has_env_override(),
                "adsgate tool host starting"
            );
            let result = crate::host::serve_stdio(&gate).await;
            gate.server().shutdown();
            result
        }
        Command::Login { timeout_secs } => {
            let who = login(&gate, Duration::from_secs(timeout_secs)).await;
            gate.server().shutdown();
            let who = who?;
            println!(
                "Logged in as {} ({})",
                who.get("name").and_then(Value::as_str).unwrap_or("unknown"),
                who.get("id").and_then(Value::as_str).unwrap_or("?"),
            );
            Ok(())
        }
        Command::Logout => {
            gate.provider().invalidate();
            println!("Removed cached token ({})", gate.provider().cache_path().display());
            Ok(())
        }
        Command::Status => {
            println!("{}", serde_json::to_string_pretty(&status(&gate))?);
            Ok(())
        }
    }
}

/// Run the login flow and return the `/me` identity of the new token.
pub async fn login(gate: &Gate, timeout: Duration) -> anyhow::Result<Value> {
    let provider = gate.provider();
    let token = match provider.authenticate(gate.server(), true).await? {
        AuthStatus::Ready(token) => token,
        AuthStatus::Pending(link) => {
            eprintln!("Complete the login in your browser:\n\n  {}\n", link.url());
            match link {
                LoginLink::Broker { .. } => {
                    let broker = provider
                        .broker()
                        .ok_or_else(|| anyhow::anyhow!("broker login link without a broker"))?;
                    let cred = broker.poll_token(BROKER_POLL, timeout).await?;
                    let token = cred.access_token.clone();
                    provider.store(cred);
                    token
                }
                LoginLink::Local { port, .. } => {
                    if gate.server().keep_alive(timeout + LOGIN_POLL).is_none() {
                        anyhow::bail!("callback server on port {port} stopped before the login finished");
                    }
                    tracing::info!(port, "waiting for browser callback");
                    wait_for_callback(gate, timeout).await?
                }
            }
        }
    };

    gate.graph()
        .me(&token)
        .await
        .map_err(|e| anyhow::anyhow!("token verification failed: {e}"))
}

async fn wait_for_callback(gate: &Gate, timeout: Duration) -> anyhow::Result<String> {
    let deadline = tokio::time::Instant::now() + timeout;
    let context = gate.server().context();
    loop {
        if context.last_received().is_some() {
            if let Some(token) = gate.provider().cached_token() {
                return Ok(token);
            }
        }
        if tokio::time::Instant::now() >= deadline {
            anyhow::bail!("timed out after {}s waiting for the browser login", timeout.as_secs());
        }
        tokio::time::sleep(LOGIN_POLL).await;
    }
}

/// Summary of the auth mode and cached credential.
pub fn status(gate: &Gate) -> Value {
    let provider = gate.provider();
    let mode = if provider.has_env_override() {
        "environment"
    } else if provider.broker_mode() {
        "broker"
    } else {
        "local"
    };
    let token = provider.credential().map(|cred| {
        json!({
            "preview": mask_token(&cred.access_token),
            "created_at": cred.created_at,
            "expires_in": cred.expires_in,
            "expires_at": cred.expires_at,
            "expired": cred.is_expired(),
            "remaining_secs": cred.remaining_secs(),
        })
    });
    json!({
        "mode": mode,
        "app_id_configured": provider.app_id().is_some(),
        "cache_path": provider.cache_path().display().to_string(),
        "token": token,
    })
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
