// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! adsgate: Meta Ads Graph API tools behind a browser login and a
//! browser-confirmed update flow.

pub mod cli;
pub mod config;
pub mod confirm;
pub mod credential;
pub mod error;
pub mod gate;
pub mod graph;
pub mod host;
pub mod server;
pub mod test_support;
pub mod tools;

use std::sync::Once;

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for rustls. Safe to call repeatedly.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
