//! Instance metadata server client

use crate::error::{Result, TokenError};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    #[serde(default)]
    expires_in: Option<u64>,
}

/// Fetches the default service account's access token from the metadata server
pub struct MetadataClient {
    http: reqwest::Client,
    token_url: String,
}

impl MetadataClient {
    pub const TOKEN_URL: &'static str = concat!(
        "http://metadata.google.internal/computeMetadata/v1",
        "/instance/service-accounts/default/token"
    );

    /// Create a client with a 10 second timeout
    pub fn new() -> Result<Self> {
        Self::with_token_url(Self::TOKEN_URL)
    }

    /// Create a client that asks `token_url` instead of the metadata server
    pub fn with_token_url(token_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            http,
            token_url: token_url.to_string(),
        })
    }

    pub async fn fetch_access_token(&self) -> Result<String> {
        debug!(url = %self.token_url, "Fetching token from metadata server");
        let response = self
            .http
            .get(&self.token_url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(TokenError::Status(response.status().as_u16()));
        }

        let body: TokenResponse = response.json().await?;
        let token = body
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or(TokenError::MissingAccessToken)?;
        info!(
            expires_in = body.expires_in,
            "Successfully fetched token from metadata server"
        );
        Ok(token)
    }
}
