//! Error types for the refresh cache

use std::fmt;
use std::time::Duration;

/// Error type returned by loaders
pub type LoadError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a single loader invocation did not produce a value
#[derive(Debug)]
pub enum LoaderError {
    /// The loader returned an error
    Failed(LoadError),
    /// The loader did not finish within the configured timeout
    TimedOut(Duration),
    /// The loader panicked
    Panicked(String),
}

impl fmt::Display for LoaderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed(e) => write!(f, "loader failed: {}", e),
            Self::TimedOut(after) => write!(f, "loader timed out after {:?}", after),
            Self::Panicked(msg) => write!(f, "loader panicked: {}", msg),
        }
    }
}

impl std::error::Error for LoaderError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Failed(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

/// Errors surfaced by [`CacheService`](crate::CacheService) registration and warm-up
#[derive(Debug)]
pub enum CacheError {
    /// A loader for this key (or an identical matcher) is already registered
    AlreadyRegistered(String),
    /// No registered matcher accepts this key
    NotRegistered(String),
    /// The synchronous initial load failed; the key was not registered
    InitialLoad { key: String, source: LoaderError },
}

impl fmt::Display for CacheError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyRegistered(key) => write!(f, "loader already registered for {}", key),
            Self::NotRegistered(key) => write!(f, "no loader registered for key {}", key),
            Self::InitialLoad { key, source } => {
                write!(f, "initial load of key {} failed: {}", key, source)
            }
        }
    }
}

impl std::error::Error for CacheError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InitialLoad { source, .. } => Some(source),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
