// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use clap::Parser;
use tracing::error;

use adsgate::cli::Cli;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // stdout carries the tool protocol; logs go to stderr.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    adsgate::ensure_crypto();
    if let Err(e) = adsgate::cli::run(cli).await {
        error!("fatal: {e:#}");
        std::process::exit(1);
    }
}
