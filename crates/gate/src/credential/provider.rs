// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Credential provider: decides which token a tool call uses and owns the
//! cached credential's lifecycle.
//!
//! Resolution order: explicit token from the caller, then the
//! `META_ACCESS_TOKEN` override, then the broker (when configured), then the
//! local cache. All writers (tool calls invalidating on auth errors, the
//! callback handler accepting a fresh token) go through one shared instance.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;

use crate::config::{GateConfig, DEFAULT_SCOPES};
use crate::credential::broker::TokenBroker;
use crate::credential::exchange::exchange_long_lived;
use crate::credential::oauth::build_auth_url;
use crate::credential::{cache_path, mask_token, persist, CacheKind, Credential};
use crate::server::CallbackServer;

/// Environment overrides shorter than this are rejected as implausible.
pub const MIN_ENV_TOKEN_LEN: usize = 20;

/// Where the user should go to (re)authenticate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoginLink {
    /// Local implicit flow; `port` is the callback server port the URL redirects to.
    Local { url: String, port: u16 },
    /// Broker-hosted flow.
    Broker { url: String },
}

impl LoginLink {
    pub fn url(&self) -> &str {
        match self {
            Self::Local { url, .. } | Self::Broker { url } => url,
        }
    }
}

/// Result of [`CredentialProvider::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthStatus {
    Ready(String),
    /// The browser flow was started; the user still has to complete it.
    Pending(LoginLink),
}

/// Resolves and manages the bearer token used for Graph API calls.
pub struct CredentialProvider {
    app_id: Option<String>,
    app_secret: Option<String>,
    env_token: Option<String>,
    graph_url: String,
    dialog_url: String,
    cache_path: PathBuf,
    open_browser: bool,
    broker: Option<TokenBroker>,
    credential: RwLock<Option<Credential>>,
    needs_auth: AtomicBool,
    http: reqwest::Client,
}

impl CredentialProvider {
    /// Build a provider from config and load the cached credential once.
    pub fn new(config: &GateConfig) -> Arc<Self> {
        crate::ensure_crypto();
        let env_token = match config.access_token.as_deref() {
            Some(tok) if tok.len() >= MIN_ENV_TOKEN_LEN => Some(tok.to_owned()),
            Some(tok) if !tok.is_empty() => {
                tracing::warn!(
                    len = tok.len(),
                    "ignoring META_ACCESS_TOKEN override: implausibly short"
                );
                None
            }
            _ => None,
        };

        let broker = config.broker_token().map(|tok| TokenBroker::new(&config.broker_url, tok));
        let kind = if broker.is_some() { CacheKind::Broker } else { CacheKind::Local };
        let cache_path = cache_path(&config.cache_dir(), kind);
        let credential = load_cached(&cache_path);

        Arc::new(Self {
            app_id: config.app_id().map(String::from),
            app_secret: config.app_secret().map(String::from),
            env_token,
            graph_url: config.graph_url.trim_end_matches('/').to_owned(),
            dialog_url: config.dialog_url.clone(),
            cache_path,
            open_browser: !config.no_browser,
            broker,
            credential: RwLock::new(credential),
            needs_auth: AtomicBool::new(false),
            http: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
        })
    }

    /// Resolve a token, preferring an explicit one supplied by the caller.
    pub async fn resolve(&self, explicit: Option<&str>) -> Option<String> {
        match explicit.filter(|t| !t.is_empty()) {
            Some(tok) => Some(tok.to_owned()),
            None => self.get_token().await,
        }
    }

    /// The current usable token, if any.
    pub async fn get_token(&self) -> Option<String> {
        if let Some(ref tok) = self.env_token {
            return Some(tok.clone());
        }
        if let Some(ref broker) = self.broker {
            return self.broker_token(broker, false).await;
        }
        self.cached_token()
    }

    /// The cached credential's token if it is present and unexpired.
    pub fn cached_token(&self) -> Option<String> {
        self.credential
            .read()
            .as_ref()
            .filter(|c| !c.is_expired())
            .map(|c| c.access_token.clone())
    }

    /// Snapshot of the cached credential.
    pub fn credential(&self) -> Option<Credential> {
        self.credential.read().clone()
    }

    pub fn needs_authentication(&self) -> bool {
        self.needs_auth.load(Ordering::Acquire)
    }

    pub fn broker_mode(&self) -> bool {
        self.broker.is_some()
    }

    pub fn has_env_override(&self) -> bool {
        self.env_token.is_some()
    }

    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref()
    }

    pub fn graph_url(&self) -> &str {
        &self.graph_url
    }

    pub fn cache_path(&self) -> &std::path::Path {
        &self.cache_path
    }

    /// Drop the cached credential and its file; later calls must re-authenticate.
    pub fn invalidate(&self) {
        let mut slot = self.credential.write();
        self.clear_locked(&mut slot);
    }

    /// Invalidate only if `token` is still the cached credential.
    ///
    /// A rejection of a token that has since been replaced (or that never came
    /// from the cache) leaves the current credential alone. Returns whether the
    /// credential was dropped.
    pub fn invalidate_if_current(&self, token: &str) -> bool {
        let mut slot = self.credential.write();
        match slot.as_ref().map(|cred| cred.access_token == token) {
            Some(true) => {
                self.clear_locked(&mut slot);
                true
            }
            Some(false) => {
                tracing::info!(
                    rejected = %mask_token(token),
                    "ignoring rejection of a superseded token"
                );
                false
            }
            None => {
                self.needs_auth.store(true, Ordering::Release);
                false
            }
        }
    }

    /// Clear memory and disk while the caller holds the credential lock, so a
    /// concurrent [`CredentialProvider::store`] lands entirely before or after.
    fn clear_locked(&self, slot: &mut Option<Credential>) {
        if let Some(old) = slot.take() {
            tracing::info!(token = %mask_token(&old.access_token), "invalidating token");
        }
        match persist::remove(&self.cache_path) {
            Ok(true) => {
                tracing::info!(path = %self.cache_path.display(), "removed cached token file")
            }
            Ok(false) => {}
            Err(e) => tracing::warn!(err = %e, "failed to remove cached token file"),
        }
        self.needs_auth.store(true, Ordering::Release);
    }

    /// Accept a token delivered by the browser flow.
    ///
    /// With an app secret configured, the short-lived token is exchanged for a
    /// long-lived one; if the exchange fails the short-lived token is kept.
    pub async fn accept_token(&self, token: &str, expires_in: Option<u64>) -> Credential {
        let mut cred = Credential::issued(token, expires_in);

        if let (Some(app_id), Some(secret)) = (self.app_id.as_deref(), self.app_secret.as_deref()) {
            match exchange_long_lived(&self.http, &self.graph_url, app_id, secret, token).await {
                Ok(long) => {
                    tracing::info!(expires_in = ?long.expires_in, "exchanged for long-lived token");
                    cred = Credential::issued(long.access_token, long.expires_in);
                    cred.token_type = long.token_type;
                }
                Err(e) => {
                    tracing::warn!(err = %e, "long-lived token exchange failed, keeping short-lived token");
                }
            }
        }

        self.store(cred.clone());
        tracing::info!(expires_in = ?cred.expires_in, "token received and cached");
        cred
    }

    /// Browser authorization URL redirecting to the callback server on `port`.
    pub fn authorization_url(&self, port: u16) -> Option<String> {
        let app_id = self.app_id.as_deref()?;
        Some(build_auth_url(&self.dialog_url, app_id, port, DEFAULT_SCOPES))
    }

    /// Where to send the user to authenticate, built against the server's
    /// current port (starting the server if needed).
    pub async fn login_link(&self, server: &Arc<CallbackServer>) -> anyhow::Result<LoginLink> {
        if let Some(ref broker) = self.broker {
            let login = broker.initiate_auth().await?;
            return Ok(LoginLink::Broker { url: login.login_url });
        }
        if self.app_id.is_none() {
            anyhow::bail!("no app ID configured (set META_APP_ID or pass --app-id)");
        }
        let port = server.ensure_running().await?;
        let url = self
            .authorization_url(port)
            .ok_or_else(|| anyhow::anyhow!("no app ID configured"))?;
        Ok(LoginLink::Local { url, port })
    }

    /// Start (or restart) authentication.
    ///
    /// Returns [`AuthStatus::Ready`] when a token is already usable and
    /// `force_refresh` is false, or when the broker hands one back. Otherwise
    /// kicks off the browser flow and returns [`AuthStatus::Pending`]; the token
    /// arrives later through the callback server.
    pub async fn authenticate(
        &self,
        server: &Arc<CallbackServer>,
        force_refresh: bool,
    ) -> anyhow::Result<AuthStatus> {
        if !force_refresh {
            if let Some(tok) = self.get_token().await {
                return Ok(AuthStatus::Ready(tok));
            }
        }
        if let Some(ref broker) = self.broker {
            if let Some(tok) = self.broker_token(broker, true).await {
                return Ok(AuthStatus::Ready(tok));
            }
        }

        let link = self.login_link(server).await?;
        tracing::info!(url = %link.url(), "starting browser authentication");
        self.launch_browser(link.url());
        Ok(AuthStatus::Pending(link))
    }

    /// Open `url` in the system browser unless disabled. Failure is logged.
    pub fn launch_browser(&self, url: &str) {
        if !self.open_browser {
            return;
        }
        if let Err(e) = open::that(url) {
            tracing::warn!(err = %e, "failed to open browser");
        }
    }

    /// The broker client, when running in broker mode.
    pub fn broker(&self) -> Option<&TokenBroker> {
        self.broker.as_ref()
    }

    /// Cache a credential obtained out of band (e.g. by polling the broker).
    ///
    /// The file and the in-memory copy are updated under one lock.
    pub fn store(&self, cred: Credential) {
        let mut slot = self.credential.write();
        if let Err(e) = persist::save(&self.cache_path, &cred) {
            tracing::warn!(err = %e, path = %self.cache_path.display(), "failed to cache token");
        }
        *slot = Some(cred);
        self.needs_auth.store(false, Ordering::Release);
    }

    async fn broker_token(&self, broker: &TokenBroker, force: bool) -> Option<String> {
        if !force {
            if let Some(tok) = self.cached_token() {
                return Some(tok);
            }
        }
        match broker.fetch_token().await {
            Ok(Some(cred)) => {
                let tok = cred.access_token.clone();
                self.store(cred);
                Some(tok)
            }
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(err = %e, "failed to fetch token from broker");
                None
            }
        }
    }
}

/// Load the cache file, treating absence, corruption and expiry as a miss.
fn load_cached(path: &std::path::Path) -> Option<Credential> {
    match persist::load(path) {
        Ok(cred) if cred.is_expired() => {
            tracing::info!("cached token is expired");
            None
        }
        Ok(cred) => {
            tracing::info!(
                remaining_secs = ?cred.remaining_secs(),
                "loaded cached token"
            );
            Some(cred)
        }
        Err(e) => {
            if path.exists() {
                tracing::warn!(err = %e, path = %path.display(), "ignoring unreadable token cache");
            } else {
                tracing::debug!(path = %path.display(), "no token cache");
            }
            None
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
