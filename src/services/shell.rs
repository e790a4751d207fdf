use crate::errors::RemoteError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Where and as whom to connect. Built fresh for every call; the key file is
/// read again by each session that needs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_file: PathBuf,
}

impl RemoteEndpoint {
    pub fn new(
        host: impl Into<String>,
        port: u16,
        user: impl Into<String>,
        key_file: impl Into<PathBuf>,
    ) -> Self {
        Self {
            host: host.into(),
            port,
            user: user.into(),
            key_file: key_file.into(),
        }
    }

    pub fn validate(&self) -> Result<(), RemoteError> {
        if self.host.trim().is_empty() {
            return Err(RemoteError::invalid_params("host must be a non-empty string"));
        }
        if self.port == 0 {
            return Err(RemoteError::invalid_params("port must be between 1 and 65535"));
        }
        if self.user.trim().is_empty() {
            return Err(RemoteError::invalid_params("user must be a non-empty string"));
        }
        Ok(())
    }

    pub fn describe(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }

    pub fn tag(&self, err: RemoteError) -> RemoteError {
        err.with_endpoint(&self.host, self.port, &self.user)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Value of the first `PREFIX...=value` marker line on stdout.
    pub fn marker(&self, name: &str) -> Option<&str> {
        let prefix = format!("{}{}__=", crate::constants::tasks::MARKER_PREFIX, name);
        self.stdout
            .lines()
            .find_map(|line| line.trim().strip_prefix(prefix.as_str()))
            .map(str::trim)
    }
}

/// Opens sessions to a host. Implementations must bound every blocking call
/// with a timeout.
pub trait RemoteShell: Send + Sync {
    fn open(&self, endpoint: &RemoteEndpoint) -> Result<Box<dyn ShellSession>, RemoteError>;
}

/// An open, authenticated session. Dropping it closes the connection, so
/// every exit path releases it.
pub trait ShellSession: Send {
    fn run(&mut self, command: &str) -> Result<CommandOutput, RemoteError>;
}
