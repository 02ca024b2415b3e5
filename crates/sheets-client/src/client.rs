//! Sheets API HTTP client

use crate::error::{Result, SheetsError};
use crate::types::ValueRange;
use std::time::Duration;
use tracing::debug;

/// Client for the Sheets v4 values endpoint
pub struct SheetsClient {
    http: reqwest::Client,
    base_url: String,
}

impl SheetsClient {
    /// Base URL for Sheets API v4
    pub const BASE_URL: &'static str = "https://sheets.googleapis.com/v4";

    /// Create a client with default settings (30 second timeout)
    pub fn new() -> Result<Self> {
        Self::with_base_url(Self::BASE_URL, Duration::from_secs(30))
    }

    /// Create a client against a different API root
    pub fn with_base_url(base_url: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn values_url(&self, sheet_id: &str, range: &str) -> String {
        format!(
            "{}/spreadsheets/{}/values/{}",
            self.base_url,
            urlencoding::encode(sheet_id),
            urlencoding::encode(range)
        )
    }

    /// Read a range of cells
    ///
    /// # Arguments
    /// * `sheet_id` - Spreadsheet identifier
    /// * `range` - A1 notation range, e.g. `Keys!A2:C102`
    /// * `token` - OAuth2 access token with spreadsheet read scope
    pub async fn get_values(&self, sheet_id: &str, range: &str, token: &str) -> Result<ValueRange> {
        let url = self.values_url(sheet_id, range);
        debug!(url = %url, "Fetching sheet values");

        let response = self.http.get(&url).bearer_auth(token).send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SheetsError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}
