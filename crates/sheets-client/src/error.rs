//! Error types for the Sheets client

use std::fmt;

#[derive(Debug)]
pub enum SheetsError {
    /// HTTP request failed
    Http(Box<reqwest::Error>),
    /// Sheets API answered with a non-success status
    Status { status: u16, body: String },
    /// Failed to parse JSON response
    Json(serde_json::Error),
}

impl fmt::Display for SheetsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "Sheets HTTP error: {}", e),
            Self::Status { status, body } => {
                write!(f, "Sheets API returned status {}: {}", status, body)
            }
            Self::Json(e) => write!(f, "Sheets JSON parse error: {}", e),
        }
    }
}

impl std::error::Error for SheetsError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e.as_ref()),
            Self::Json(e) => Some(e),
            Self::Status { .. } => None,
        }
    }
}

impl From<reqwest::Error> for SheetsError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(Box::new(e))
    }
}

impl From<serde_json::Error> for SheetsError {
    fn from(e: serde_json::Error) -> Self {
        Self::Json(e)
    }
}

/// Result type for Sheets API operations
pub type Result<T> = std::result::Result<T, SheetsError>;
