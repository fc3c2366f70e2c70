// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::path::PathBuf;
use std::time::Duration;

/// Default OAuth scopes requested from the Graph API dialog.
pub const DEFAULT_SCOPES: &str = "ads_management,ads_read,business_management";

/// Configuration for the ads tool gateway.
#[derive(Debug, Clone, clap::Args)]
pub struct GateConfig {
    /// Graph API app (client) ID used for the browser login flow.
    #[arg(long, env = "META_APP_ID")]
    pub app_id: Option<String>,

    /// App secret. When set, short-lived tokens are exchanged for long-lived ones.
    #[arg(long, env = "META_APP_SECRET", hide_env_values = true)]
    pub app_secret: Option<String>,

    /// Access token override. Bypasses the cache and the login flow entirely.
    #[arg(long, env = "META_ACCESS_TOKEN", hide_env_values = true)]
    pub access_token: Option<String>,

    /// Token broker API token. Switches authentication to broker mode.
    #[arg(long, env = "PIPEBOARD_API_TOKEN", hide_env_values = true)]
    pub broker_token: Option<String>,

    /// Token broker API base URL.
    #[arg(long, default_value = "https://pipeboard.co/api", env = "ADSGATE_BROKER_URL")]
    pub broker_url: String,

    /// Graph API base URL (including version).
    #[arg(long, default_value = "https://graph.facebook.com/v22.0", env = "ADSGATE_GRAPH_URL")]
    pub graph_url: String,

    /// OAuth dialog URL for the implicit token flow.
    #[arg(
        long,
        default_value = "https://www.facebook.com/v22.0/dialog/oauth",
        env = "ADSGATE_DIALOG_URL"
    )]
    pub dialog_url: String,

    /// First port probed for the local callback server (0 = any free port).
    #[arg(long, default_value_t = 8888, env = "ADSGATE_CALLBACK_PORT")]
    pub callback_port: u16,

    /// Seconds of inactivity before the callback server shuts itself down.
    #[arg(long, default_value_t = 180, env = "ADSGATE_CALLBACK_IDLE_SECS")]
    pub callback_idle_secs: u64,

    /// Directory holding the token cache. Defaults to the platform config dir.
    #[arg(long, env = "ADSGATE_CACHE_DIR")]
    pub cache_dir: Option<PathBuf>,

    /// Never open a browser window; only print or return login URLs.
    #[arg(long, env = "ADSGATE_NO_BROWSER")]
    pub no_browser: bool,
}

impl GateConfig {
    pub fn callback_idle(&self) -> Duration {
        Duration::from_secs(self.callback_idle_secs)
    }

    /// Resolve the token cache directory.
    ///
    /// `--cache-dir` wins; otherwise `<config dir>/adsgate`, where the config
    /// dir is `%APPDATA%`, `~/Library/Application Support` or `~/.config`.
    pub fn cache_dir(&self) -> PathBuf {
        if let Some(ref dir) = self.cache_dir {
            return dir.clone();
        }
        match dirs::config_dir() {
            Some(base) => base.join("adsgate"),
            None => PathBuf::from(".adsgate"),
        }
    }

    /// Broker API token, treating an empty value as absent. When present,
    /// the local OAuth flow is disabled.
    pub fn broker_token(&self) -> Option<&str> {
        self.broker_token.as_deref().filter(|t| !t.is_empty())
    }

    /// App ID, treating an empty value as absent.
    pub fn app_id(&self) -> Option<&str> {
        self.app_id.as_deref().filter(|id| !id.is_empty())
    }

    /// App secret, treating an empty value as absent.
    pub fn app_secret(&self) -> Option<&str> {
        self.app_secret.as_deref().filter(|s| !s.is_empty())
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
