//! Error types for the authorization service

use std::fmt;

#[derive(Debug)]
pub enum ServiceError {
    /// Missing or inconsistent configuration
    Config(String),
    /// Cache registration or warm-up failed
    Cache(refresh_cache::CacheError),
    /// Access token client could not be built
    Token(gcp_access_token::TokenError),
    /// Sheets client could not be built
    Sheets(sheets_client::SheetsError),
    /// Server socket error
    Io(std::io::Error),
}

impl fmt::Display for ServiceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Cache(e) => write!(f, "{}", e),
            Self::Token(e) => write!(f, "{}", e),
            Self::Sheets(e) => write!(f, "{}", e),
            Self::Io(e) => write!(f, "Server error: {}", e),
        }
    }
}

impl std::error::Error for ServiceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Config(_) => None,
            Self::Cache(e) => Some(e),
            Self::Token(e) => Some(e),
            Self::Sheets(e) => Some(e),
            Self::Io(e) => Some(e),
        }
    }
}

impl From<refresh_cache::CacheError> for ServiceError {
    fn from(e: refresh_cache::CacheError) -> Self {
        Self::Cache(e)
    }
}

impl From<gcp_access_token::TokenError> for ServiceError {
    fn from(e: gcp_access_token::TokenError) -> Self {
        Self::Token(e)
    }
}

impl From<sheets_client::SheetsError> for ServiceError {
    fn from(e: sheets_client::SheetsError) -> Self {
        Self::Sheets(e)
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<tracing_subscriber::filter::ParseError> for ServiceError {
    fn from(e: tracing_subscriber::filter::ParseError) -> Self {
        Self::Config(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ServiceError>;
