//! Authorization outcomes and their transport mapping

use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of checking one request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationDecision {
    /// No usable `Authorization: APIKEY <key>` header
    KeyMissing,
    /// The presented key is not in the table (or no table is available)
    InvalidKey,
    /// The key exists but none of its rules cover this path and method
    ValidButUnauthorized,
    Authorized,
}

impl AuthorizationDecision {
    pub fn message(&self) -> &'static str {
        match self {
            Self::KeyMissing => "API Key not present",
            Self::InvalidKey => "Invalid API Key",
            Self::ValidButUnauthorized => "No matching operation found",
            Self::Authorized => "Valid API Key",
        }
    }

    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Authorized)
    }

    /// HTTP status for the immediate response; `None` when the request continues
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::Authorized => None,
            Self::KeyMissing => Some(401),
            Self::InvalidKey | Self::ValidButUnauthorized => Some(403),
        }
    }

    /// Map the decision onto the response handed back to the proxy
    pub fn to_response(&self, realm: &str) -> CheckResponse {
        match self.status_code() {
            None => CheckResponse {
                allow: true,
                status_code: 200,
                extra_headers: BTreeMap::new(),
                body: String::new(),
            },
            Some(status_code) => {
                let mut extra_headers = BTreeMap::new();
                if let Self::KeyMissing = self {
                    extra_headers.insert(
                        "WWW-Authenticate".to_string(),
                        format!("APIKey realm=\"{}\"", realm),
                    );
                }
                CheckResponse {
                    allow: false,
                    status_code,
                    extra_headers,
                    body: format!("{}\n", self.message()),
                }
            }
        }
    }
}

impl fmt::Display for AuthorizationDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// What the transport should do with the request
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckResponse {
    pub allow: bool,
    pub status_code: u16,
    pub extra_headers: BTreeMap<String, String>,
    pub body: String,
}
