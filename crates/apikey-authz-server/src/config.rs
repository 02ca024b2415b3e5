//! Service configuration from environment variables

use crate::error::{Result, ServiceError};
use gcp_access_token::{is_running_in_cloud, CredentialCommand, MetadataClient, TokenSource};
use std::time::Duration;
use tracing::info;

pub const DEFAULT_SHEET_RANGE: &str = "Keys!A2:C102";

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    /// Health endpoint listener, kept apart from the checked paths
    pub health_port: u16,
    /// Spreadsheet holding the key table; the built-in table is used when unset
    pub sheet_id: Option<String>,
    pub sheet_range: String,
    /// Set by Cloud Run; selects the metadata server for access tokens
    pub k_service: Option<String>,
    pub project_id: Option<String>,
    pub service_account: Option<String>,
    pub verbose: bool,
    pub realm: String,
    pub apikeys_ttl: Duration,
    pub token_ttl: Duration,
    pub refresh_timeout: Duration,
    pub refresh_workers: usize,
    pub command_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            health_port: 8081,
            sheet_id: None,
            sheet_range: DEFAULT_SHEET_RANGE.to_string(),
            k_service: None,
            project_id: None,
            service_account: None,
            verbose: false,
            realm: "example.com".to_string(),
            apikeys_ttl: Duration::from_secs(2 * 60),
            token_ttl: Duration::from_secs(30 * 60),
            refresh_timeout: Duration::from_secs(90),
            refresh_workers: 4,
            command_timeout: Duration::from_secs(60),
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    /// Build from any variable lookup; empty values count as unset
    pub fn from_vars<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let number = |name: &str| var(name).and_then(|v| v.trim().parse::<u64>().ok());
        let defaults = Self::default();

        Self {
            port: var("PORT")
                .and_then(|s| s.parse::<u16>().ok())
                .unwrap_or(defaults.port),
            health_port: var("HEALTH_PORT")
                .and_then(|s| s.parse::<u16>().ok())
                .unwrap_or(defaults.health_port),
            sheet_id: var("SHEET_ID"),
            sheet_range: var("SHEET_RANGE").unwrap_or(defaults.sheet_range),
            k_service: var("K_SERVICE"),
            project_id: var("PROJECT_ID"),
            service_account: var("SA_EMAIL"),
            verbose: var("VERBOSE")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            realm: var("AUTH_REALM").unwrap_or(defaults.realm),
            apikeys_ttl: number("APIKEYS_TTL_MINUTES")
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.apikeys_ttl),
            token_ttl: number("TOKEN_TTL_MINUTES")
                .map(|m| Duration::from_secs(m * 60))
                .unwrap_or(defaults.token_ttl),
            refresh_timeout: number("REFRESH_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.refresh_timeout),
            refresh_workers: number("REFRESH_WORKERS")
                .filter(|n| *n > 0)
                .map(|n| n as usize)
                .unwrap_or(defaults.refresh_workers),
            command_timeout: number("COMMAND_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.command_timeout),
        }
    }

    pub fn running_in_cloud(&self) -> bool {
        is_running_in_cloud(self.k_service.as_deref())
    }

    /// Outside the cloud a remote key table needs a project and a service account to
    /// impersonate.
    pub fn validate(&self) -> Result<()> {
        if self.port == self.health_port {
            return Err(ServiceError::Config(format!(
                "HEALTH_PORT must differ from PORT ({})",
                self.port
            )));
        }
        if self.sheet_id.is_none() || self.running_in_cloud() {
            return Ok(());
        }
        let missing: Vec<&str> = [
            ("PROJECT_ID", self.project_id.is_none()),
            ("SA_EMAIL", self.service_account.is_none()),
        ]
        .into_iter()
        .filter_map(|(name, missing)| missing.then_some(name))
        .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(ServiceError::Config(format!(
                "SHEET_ID is set outside the cloud but {} not set",
                missing.join(" and ")
            )))
        }
    }

    pub fn token_source(&self) -> Result<TokenSource> {
        if self.running_in_cloud() {
            return Ok(TokenSource::Metadata(MetadataClient::new()?));
        }
        match (&self.service_account, &self.project_id) {
            (Some(sa), Some(project)) => Ok(TokenSource::Command(
                CredentialCommand::gcloud(sa, project).with_timeout(self.command_timeout),
            )),
            _ => Err(ServiceError::Config(
                "PROJECT_ID and SA_EMAIL are required for the credential command".to_string(),
            )),
        }
    }

    pub fn log_summary(&self) {
        info!("Port: {}", self.port);
        info!("Health port: {}", self.health_port);
        match &self.sheet_id {
            Some(sheet_id) => {
                info!(sheet_id, range = %self.sheet_range, "Key table source: sheet")
            }
            None => info!("Key table source: built-in keys"),
        }
        info!(
            in_cloud = self.running_in_cloud(),
            apikeys_ttl_secs = self.apikeys_ttl.as_secs(),
            token_ttl_secs = self.token_ttl.as_secs(),
            refresh_workers = self.refresh_workers,
            verbose = self.verbose,
            "Configuration loaded"
        );
    }
}
