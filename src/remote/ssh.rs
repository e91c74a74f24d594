//! OpenSSH client subprocess sessions

use crate::core::{config::PollingConfig, ProvisionedHost};
use crate::remote::{CommandOutput, RemoteSession, SessionError, SessionFactory};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::{sleep, timeout, Instant};
use tracing::{debug, info, warn};

/// ssh reserves this exit code for its own failures
const SSH_ERROR_EXIT: i32 = 255;

/// Creates sessions by running the `ssh` client
#[derive(Debug, Clone)]
pub struct SshSessionFactory {
    /// Path to ssh executable
    ssh_path: String,

    connect_timeout_secs: u64,

    command_timeout_secs: u64,

    /// Backoff while sshd on a fresh instance is not yet accepting connections
    readiness: PollingConfig,
}

impl SshSessionFactory {
    pub fn new(connect_timeout_secs: u64, command_timeout_secs: u64, readiness: PollingConfig) -> Self {
        Self {
            ssh_path: "ssh".to_string(),
            connect_timeout_secs,
            command_timeout_secs,
            readiness,
        }
    }
}

#[async_trait]
impl SessionFactory for SshSessionFactory {
    async fn connect(&self, host: &ProvisionedHost) -> Result<Box<dyn RemoteSession>, SessionError> {
        let session = SshSession {
            ssh_path: self.ssh_path.clone(),
            address: host.address.clone(),
            user: host.user.clone(),
            key_path: host.key_path.clone(),
            connect_timeout_secs: self.connect_timeout_secs,
            command_timeout_secs: self.command_timeout_secs,
        };

        let deadline = Instant::now() + self.readiness.timeout();
        let mut delay = self.readiness.initial_delay();
        loop {
            match session.exec("true", None).await {
                Ok(output) if output.success() => {
                    info!("Connected to {}@{}", host.user, host.address);
                    return Ok(Box::new(session));
                }
                Ok(output) if output.code != SSH_ERROR_EXIT => {
                    return Err(SessionError::Connect(format!(
                        "probe exited with code {}: {}",
                        output.code,
                        output.stderr.trim()
                    )));
                }
                Ok(output) => {
                    debug!("ssh to {} not ready: {}", host.address, output.stderr.trim());
                }
                Err(SessionError::Timeout(secs)) => {
                    debug!("ssh to {} timed out after {}s", host.address, secs);
                }
                Err(e) => return Err(e),
            }

            let now = Instant::now();
            if now >= deadline {
                warn!("Giving up on {} after {}s", host.address, self.readiness.timeout_secs);
                return Err(SessionError::Connect(format!(
                    "{} not accepting ssh connections after {} seconds",
                    host.address, self.readiness.timeout_secs
                )));
            }
            sleep(delay.min(deadline - now)).await;
            delay = (delay * 2).min(self.readiness.max_delay());
        }
    }
}

/// A session is a reusable set of ssh arguments; every command is its own connection
#[derive(Debug, Clone)]
pub struct SshSession {
    ssh_path: String,
    address: String,
    user: String,
    key_path: PathBuf,
    connect_timeout_secs: u64,
    command_timeout_secs: u64,
}

impl SshSession {
    fn args(&self, command: &str) -> Vec<String> {
        vec![
            "-i".to_string(),
            self.key_path.display().to_string(),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            // Fresh instances reuse addresses; never pin their host keys
            "-o".to_string(),
            "StrictHostKeyChecking=no".to_string(),
            "-o".to_string(),
            "UserKnownHostsFile=/dev/null".to_string(),
            "-o".to_string(),
            "LogLevel=ERROR".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            format!("{}@{}", self.user, self.address),
            command.to_string(),
        ]
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    fn address(&self) -> &str {
        &self.address
    }

    async fn exec(&self, command: &str, stdin: Option<&[u8]>) -> Result<CommandOutput, SessionError> {
        debug!("[{}] $ {}", self.address, command);

        let mut child = Command::new(&self.ssh_path)
            .args(self.args(command))
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SessionError::Internal(format!("Failed to execute ssh: {}", e)))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input)
                .await
                .map_err(|e| SessionError::Internal(format!("Failed to write to ssh stdin: {}", e)))?;
            // Closing the pipe signals EOF to the remote command
            drop(pipe);
        }

        let output = timeout(
            Duration::from_secs(self.command_timeout_secs),
            child.wait_with_output(),
        )
        .await
        .map_err(|_| SessionError::Timeout(self.command_timeout_secs))?
        .map_err(|e| SessionError::Internal(format!("Failed to wait for ssh: {}", e)))?;

        Ok(CommandOutput {
            code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }
}
