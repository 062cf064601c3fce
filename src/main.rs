//! azgraph-login
//!
//! Signs in to Azure AD with the OAuth2 authorization code flow and calls
//! Microsoft Graph with the resulting token, either once from the command line
//! (`MODE` unset) or as a small HTTP service (`MODE=web`).

#![deny(clippy::all)]

mod auth;
mod cli;
mod config;
mod error;
mod server;

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use auth::graph::GraphClient;
use auth::oauth::OAuth2Client;
use config::{Config, Mode};
use server::AppState;

fn main() {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        // .env file is optional - only log if it's not a "file not found" error
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            std::process::exit(1);
        }
    };

    init_logging(&config.logging.level);
    info!("Starting azgraph-login v{}", env!("CARGO_PKG_VERSION"));
    config.warn_missing_credentials();

    let result = match config.mode {
        Mode::Web => run_web(config),
        Mode::Cli => run_cli(config),
    };

    if let Err(e) = result {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging. Logs go to stderr; stdout is reserved for the token.
fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

/// One pass: print the consent URL, read the redirect from stdin, print the token.
fn run_cli(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    let oauth_client = OAuth2Client::new(config.provider())?;

    runtime.block_on(async {
        let stdin = std::io::stdin();
        let stdout = std::io::stdout();
        cli::run(&oauth_client, stdin.lock(), std::io::stderr(), stdout.lock())
            .await
            .context("Sign-in failed")
    })?;

    Ok(())
}

/// Long-lived HTTP service on the configured listen address.
fn run_web(config: Config) -> Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;

    let oauth_client = OAuth2Client::new(config.provider())?;
    let graph_client = GraphClient::new(&config.api.graph_base_url)?;
    let state = Arc::new(AppState::new(
        oauth_client,
        graph_client,
        config.server.max_pending_logins,
    ));

    runtime.block_on(server::serve(config.server.listen_addr, state))
}
