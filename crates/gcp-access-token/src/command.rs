//! External credential command

use crate::error::{Result, TokenError};
use crate::SPREADSHEETS_READONLY_SCOPE;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{info, warn};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

/// A command that prints an access token on stdout
#[derive(Debug, Clone)]
pub struct CredentialCommand {
    program: String,
    args: Vec<String>,
    timeout: Duration,
}

impl CredentialCommand {
    pub fn new<I, S>(program: &str, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.to_string(),
            args: args.into_iter().map(Into::into).collect(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// `gcloud auth print-access-token` impersonating `service_account` in `project`
    pub fn gcloud(service_account: &str, project: &str) -> Self {
        Self::new(
            "gcloud",
            [
                "auth",
                "print-access-token",
                "--impersonate-service-account",
                service_account,
                "--project",
                project,
                "--scopes",
                SPREADSHEETS_READONLY_SCOPE,
                "--quiet",
            ],
        )
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn command_line(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Run the command and return its trimmed stdout.
    ///
    /// The child is killed if it has not exited within the timeout.
    pub async fn run(&self) -> Result<String> {
        let command_line = self.command_line();
        info!(command = %command_line, "Executing command");

        let child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        // Dropping the output future on timeout drops the child, which kills it.
        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(output) => output?,
            Err(_) => {
                warn!(command = %command_line, "Command timed out, killed");
                return Err(TokenError::CommandTimeout {
                    command: command_line,
                    after: self.timeout,
                });
            }
        };

        if !output.status.success() {
            return Err(TokenError::CommandFailed {
                command: command_line,
                status: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let token = String::from_utf8_lossy(&output.stdout).trim().to_string();
        if token.is_empty() {
            return Err(TokenError::MissingAccessToken);
        }
        Ok(token)
    }
}
