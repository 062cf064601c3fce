//! Microsoft Graph API client for fetching the signed-in user's profile.

use crate::error::ApiError;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP request timeout.
const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
/// HTTP connection timeout.
const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Microsoft Graph API client.
pub struct GraphClient {
    http_client: reqwest::Client,
    base_url: String,
}

impl GraphClient {
    /// Create a new Graph client against `base_url` (e.g. `https://graph.microsoft.com/v1.0`).
    pub fn new(base_url: &str) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .connect_timeout(HTTP_CONNECT_TIMEOUT)
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Fetch the current user's profile as raw response bytes.
    ///
    /// The body is returned whatever the status code; only transport and read
    /// failures are errors.
    pub async fn fetch_profile(&self, access_token: &str) -> Result<Vec<u8>, ApiError> {
        let url = format!("{}/me", self.base_url);

        let response = self
            .http_client
            .get(&url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| ApiError::GraphRequestFailed(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            debug!("Graph /me returned HTTP {}", status);
        } else {
            warn!("Graph /me returned HTTP {}, passing body through", status);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ApiError::ReadFailed(e.to_string()))?;

        Ok(body.to_vec())
    }
}
