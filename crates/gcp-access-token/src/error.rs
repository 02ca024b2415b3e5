//! Error types for access token retrieval

use std::fmt;
use std::time::Duration;

#[derive(Debug)]
pub enum TokenError {
    /// HTTP request to the metadata server failed
    Http(Box<reqwest::Error>),
    /// Metadata server answered with a non-success status
    Status(u16),
    /// Response or command output did not contain a token
    MissingAccessToken,
    /// The credential command could not be started or read
    Io(Box<std::io::Error>),
    /// The credential command exited unsuccessfully
    CommandFailed {
        command: String,
        status: Option<i32>,
        stderr: String,
    },
    /// The credential command overran its timeout and was killed
    CommandTimeout { command: String, after: Duration },
}

impl fmt::Display for TokenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(e) => write!(f, "metadata HTTP error: {}", e),
            Self::Status(status) => write!(f, "metadata server returned status {}", status),
            Self::MissingAccessToken => write!(f, "no access token in response"),
            Self::Io(e) => write!(f, "credential command IO error: {}", e),
            Self::CommandFailed {
                command,
                status: Some(code),
                stderr,
            } => write!(
                f,
                "command failed with exit code {}. [{}] error:{}",
                code, command, stderr
            ),
            Self::CommandFailed {
                command, stderr, ..
            } => write!(f, "command terminated by signal. [{}] error:{}", command, stderr),
            Self::CommandTimeout { command, after } => {
                write!(f, "command timed out after {:?}: {}", after, command)
            }
        }
    }
}

impl std::error::Error for TokenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Http(e) => Some(e.as_ref()),
            Self::Io(e) => Some(e.as_ref()),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for TokenError {
    fn from(e: reqwest::Error) -> Self {
        Self::Http(Box::new(e))
    }
}

impl From<std::io::Error> for TokenError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(Box::new(e))
    }
}

pub type Result<T> = std::result::Result<T, TokenError>;
