//! Configuration loading and management.
//!
//! Loads configuration from embedded config.toml with environment variable overrides.
//! Azure AD credentials are expected to come from the environment only.

use crate::auth::secure::SecureString;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::net::SocketAddr;
use tracing::warn;

/// Embedded configuration file content.
const CONFIG_TOML: &str = include_str!("../config.toml");

/// Host serving the Azure AD v2.0 endpoints.
const AZURE_AD_HOST: &str = "https://login.microsoftonline.com";

/// Tenant used when none is configured.
const DEFAULT_TENANT: &str = "common";

/// Root configuration structure.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub mode: Mode,
    pub oauth: OAuthConfig,
    pub api: ApiConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

/// Which front-end to run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Print the authorization URL, read the redirect from stdin, print the token.
    #[default]
    Cli,
    /// Serve `/login`, `/auth`, `/token` and `/me`.
    Web,
}

impl Mode {
    /// `"web"` selects the HTTP service; anything else the CLI.
    pub fn from_env_value(value: &str) -> Self {
        if value == "web" {
            Self::Web
        } else {
            Self::Cli
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OAuthConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: SecureString,
    #[serde(default)]
    pub tenant: String,
    /// Space-separated scope list, as given in `AZ_GRAPH_SCOPES`.
    #[serde(default)]
    pub scopes: String,
    pub redirect_uri: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub graph_base_url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub listen_addr: SocketAddr,
    /// Upper bound on outstanding `/login` states awaiting their callback.
    pub max_pending_logins: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
}

impl Config {
    /// Load configuration from embedded config.toml with environment variable overrides.
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the configuration with overrides taken from `lookup` instead of the process
    /// environment.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        // Parse embedded config
        let mut config: Config =
            toml::from_str(CONFIG_TOML).context("Failed to parse embedded config.toml")?;

        if let Some(client_id) = lookup("AZ_CLIENT_ID") {
            config.oauth.client_id = client_id;
        }

        if let Some(client_secret) = lookup("AZ_CLIENT_SECRET") {
            config.oauth.client_secret = client_secret.into();
        }

        if let Some(tenant) = lookup("AZ_TENANT_ID") {
            config.oauth.tenant = tenant;
        }

        if let Some(scopes) = lookup("AZ_GRAPH_SCOPES") {
            config.oauth.scopes = scopes;
        }

        if let Some(redirect_uri) = lookup("AZ_REDIRECT_URI") {
            config.oauth.redirect_uri = redirect_uri;
        }

        if let Some(base_url) = lookup("AZ_GRAPH_BASE_URL") {
            config.api.graph_base_url = base_url;
        }

        if let Some(addr) = lookup("AZ_LISTEN_ADDR") {
            config.server.listen_addr = addr
                .parse()
                .with_context(|| format!("Invalid AZ_LISTEN_ADDR: {}", addr))?;
        }

        if let Some(mode) = lookup("MODE") {
            config.mode = Mode::from_env_value(&mode);
        }

        Ok(config)
    }

    /// Credentials are not enforced here; the provider rejects the exchange instead.
    pub fn warn_missing_credentials(&self) {
        if self.oauth.client_id.is_empty() {
            warn!("AZ_CLIENT_ID is not set; the token exchange will be rejected");
        }
        if self.oauth.client_secret.is_empty() {
            warn!("AZ_CLIENT_SECRET is not set; the token exchange will be rejected");
        }
        if self.oauth.tenant.is_empty() {
            warn!("AZ_TENANT_ID is not set; using the '{}' tenant", DEFAULT_TENANT);
        }
    }

    /// Provider settings for the configured tenant.
    pub fn provider(&self) -> ProviderConfig {
        ProviderConfig::azure_ad(
            &self.oauth.client_id,
            self.oauth.client_secret.clone(),
            &self.oauth.tenant,
            &self.oauth.scopes,
            &self.oauth.redirect_uri,
        )
    }
}

/// Everything the OAuth2 client needs to talk to one authorization server.
#[derive(Debug, Clone)]
pub struct ProviderConfig {
    pub client_id: String,
    pub client_secret: SecureString,
    pub auth_url: String,
    pub token_url: String,
    pub scopes: Vec<String>,
    pub redirect_uri: String,
}

impl ProviderConfig {
    /// Azure AD v2.0 endpoints for `tenant`, with `scopes` split on whitespace.
    pub fn azure_ad(
        client_id: &str,
        client_secret: SecureString,
        tenant: &str,
        scopes: &str,
        redirect_uri: &str,
    ) -> Self {
        let tenant = if tenant.is_empty() {
            DEFAULT_TENANT
        } else {
            tenant
        };

        Self {
            client_id: client_id.to_string(),
            client_secret,
            auth_url: format!("{}/{}/oauth2/v2.0/authorize", AZURE_AD_HOST, tenant),
            token_url: format!("{}/{}/oauth2/v2.0/token", AZURE_AD_HOST, tenant),
            scopes: scopes.split_whitespace().map(str::to_string).collect(),
            redirect_uri: redirect_uri.to_string(),
        }
    }
}
