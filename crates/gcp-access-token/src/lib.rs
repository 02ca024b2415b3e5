//! Google Cloud access tokens
//!
//! Inside a managed runtime (Cloud Run sets `K_SERVICE`) the token comes from the
//! instance metadata server. Elsewhere it is printed by an external credential command,
//! by default `gcloud auth print-access-token` impersonating a service account. The
//! command runs with a timeout and is killed when it overruns.

mod command;
mod error;
mod metadata;

pub use command::CredentialCommand;
pub use error::{Result, TokenError};
pub use metadata::MetadataClient;

/// OAuth scope requested when impersonating through the credential command
pub const SPREADSHEETS_READONLY_SCOPE: &str =
    "https://www.googleapis.com/auth/spreadsheets.readonly";

/// Where access tokens come from
pub enum TokenSource {
    Metadata(MetadataClient),
    Command(CredentialCommand),
}

impl TokenSource {
    pub async fn access_token(&self) -> Result<String> {
        match self {
            Self::Metadata(client) => client.fetch_access_token().await,
            Self::Command(command) => command.run().await,
        }
    }

    pub fn describe(&self) -> &'static str {
        match self {
            Self::Metadata(_) => "metadata server",
            Self::Command(_) => "credential command",
        }
    }
}

/// Whether the process runs in a managed runtime, judged by the value of `K_SERVICE`
pub fn is_running_in_cloud(k_service: Option<&str>) -> bool {
    k_service.map(|v| !v.is_empty()).unwrap_or(false)
}
