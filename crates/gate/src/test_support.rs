// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: config builders with sensible defaults.

use std::path::Path;

use crate::config::GateConfig;

/// Builder for a `GateConfig` that never touches the real user config dir,
/// never opens a browser and binds callback servers on ephemeral ports.
pub struct ConfigBuilder {
    config: GateConfig,
}

impl ConfigBuilder {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            config: GateConfig {
                app_id: Some("1234567890".to_owned()),
                app_secret: None,
                access_token: None,
                broker_token: None,
                broker_url: "http://127.0.0.1:9/api".to_owned(),
                graph_url: "http://127.0.0.1:9/v22.0".to_owned(),
                dialog_url: "https://www.facebook.com/v22.0/dialog/oauth".to_owned(),
                callback_port: 0,
                callback_idle_secs: 180,
                cache_dir: Some(cache_dir.to_path_buf()),
                no_browser: true,
            },
        }
    }

    pub fn app_id(mut self, id: Option<&str>) -> Self {
        self.config.app_id = id.map(String::from);
        self
    }

    pub fn app_secret(mut self, secret: &str) -> Self {
        self.config.app_secret = Some(secret.to_owned());
        self
    }

    pub fn access_token(mut self, token: &str) -> Self {
        self.config.access_token = Some(token.to_owned());
        self
    }

    pub fn broker(mut self, url: &str, token: &str) -> Self {
        self.config.broker_url = url.to_owned();
        self.config.broker_token = Some(token.to_owned());
        self
    }

    pub fn graph_url(mut self, url: &str) -> Self {
        self.config.graph_url = url.to_owned();
        self
    }

    pub fn callback_port(mut self, port: u16) -> Self {
        self.config.callback_port = port;
        self
    }

    pub fn callback_idle_secs(mut self, secs: u64) -> Self {
        self.config.callback_idle_secs = secs;
        self
    }

    pub fn build(self) -> GateConfig {
        self.config
    }
}
