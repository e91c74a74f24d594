//! Authenticated command channel to provisioned hosts

pub mod executor;
pub mod ssh;

use crate::core::ProvisionedHost;
use async_trait::async_trait;
use thiserror::Error;

pub use executor::{HostReport, HostResults, RemoteExecutor};
pub use ssh::SshSessionFactory;

/// Error types for the session channel
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Connection failed: {0}")]
    Connect(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result of one remote command
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    /// Exit code and the last non-empty stderr line
    pub fn failure_detail(&self) -> String {
        let last = self
            .stderr
            .lines()
            .rev()
            .find(|l| !l.trim().is_empty())
            .unwrap_or("")
            .trim();
        format!("exit code {}: {}", self.code, last)
    }
}

/// An open session to one host
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// Address the session is connected to
    fn address(&self) -> &str;

    /// Run a shell command, optionally feeding `stdin`
    async fn exec(&self, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, SessionError>;
}

/// Opens sessions to hosts
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn connect(&self, host: &ProvisionedHost) -> Result<Box<dyn RemoteSession>, SessionError>;
}
