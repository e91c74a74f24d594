//! Remote executor - runs ordered operations on every host of a group

use crate::core::{
    ensure_line, CommandRenderer, DeployError, Operation, PlannedOperation, ProvisionedHost,
};
use crate::credentials::{CredentialBroker, RegistryToken};
use crate::remote::{CommandOutput, RemoteSession, SessionError, SessionFactory};
use regex::Regex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// One step of a host's sequence
#[derive(Clone)]
pub enum HostStep {
    Operation(PlannedOperation),
    /// Log the container runtime into the registry
    RegistryLogin {
        broker: Arc<CredentialBroker>,
        registry_uri: String,
        token: RegistryToken,
    },
}

impl HostStep {
    pub fn label(&self) -> &str {
        match self {
            HostStep::Operation(op) => &op.label,
            HostStep::RegistryLogin { .. } => "registry-login",
        }
    }
}

impl From<PlannedOperation> for HostStep {
    fn from(op: PlannedOperation) -> Self {
        HostStep::Operation(op)
    }
}

impl fmt::Debug for HostStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostStep::Operation(op) => f.debug_tuple("Operation").field(op).finish(),
            HostStep::RegistryLogin {
                registry_uri, token, ..
            } => f
                .debug_struct("RegistryLogin")
                .field("registry_uri", registry_uri)
                .field("token", token)
                .finish(),
        }
    }
}

/// Operations a host completed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostReport {
    pub host: String,
    pub completed: Vec<String>,
}

/// Per-host outcome of one executor invocation, in group order
#[derive(Debug, Clone, Default)]
pub struct HostResults {
    pub results: Vec<(String, Result<HostReport, DeployError>)>,
}

impl HostResults {
    pub fn get(&self, host: &str) -> Option<&Result<HostReport, DeployError>> {
        self.results
            .iter()
            .find(|(address, _)| address == host)
            .map(|(_, result)| result)
    }

    pub fn succeeded(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, r)| r.is_ok())
            .map(|(address, _)| address.as_str())
            .collect()
    }

    pub fn failures(&self) -> Vec<(&str, &DeployError)> {
        self.results
            .iter()
            .filter_map(|(address, r)| r.as_ref().err().map(|e| (address.as_str(), e)))
            .collect()
    }

    pub fn first_error(&self) -> Option<&DeployError> {
        self.failures().into_iter().next().map(|(_, e)| e)
    }
}

/// Runs operation sequences against host groups
#[derive(Clone)]
pub struct RemoteExecutor {
    sessions: Arc<dyn SessionFactory>,
    renderer: CommandRenderer,
    /// Hosts operated on at once; `None` means the whole group
    parallelism: Option<usize>,
}

impl RemoteExecutor {
    pub fn new(sessions: Arc<dyn SessionFactory>, renderer: CommandRenderer) -> Self {
        Self {
            sessions,
            renderer,
            parallelism: None,
        }
    }

    pub fn with_parallelism(mut self, parallelism: Option<usize>) -> Self {
        self.parallelism = parallelism;
        self
    }

    /// Run `steps` on every host.
    ///
    /// Hosts run concurrently; each host's steps run in order and stop at
    /// the first failure.
    pub async fn run(&self, hosts: &[ProvisionedHost], steps: &[HostStep]) -> HostResults {
        if hosts.is_empty() {
            return HostResults::default();
        }

        let permits = self.parallelism.unwrap_or(hosts.len()).max(1);
        let semaphore = Arc::new(Semaphore::new(permits));
        let steps: Arc<[HostStep]> = steps.to_vec().into();
        let mut tasks = JoinSet::new();

        for (index, host) in hosts.iter().cloned().enumerate() {
            let executor = self.clone();
            let steps = steps.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                // Never closed, so acquire cannot fail
                let _permit = semaphore.acquire_owned().await.ok();
                let result = executor.run_host(&host, &steps).await;
                (index, host.address, result)
            });
        }

        let mut collected: Vec<Option<(String, Result<HostReport, DeployError>)>> =
            vec![None; hosts.len()];
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((index, address, result)) => collected[index] = Some((address, result)),
                Err(e) => error!("Host task panicked: {}", e),
            }
        }

        let results = collected
            .into_iter()
            .zip(hosts)
            .map(|(slot, host)| {
                slot.unwrap_or_else(|| {
                    (
                        host.address.clone(),
                        Err(DeployError::Operation {
                            host: host.address.clone(),
                            operation: "task".to_string(),
                            message: "host task aborted".to_string(),
                        }),
                    )
                })
            })
            .collect();

        HostResults { results }
    }

    async fn run_host(
        &self,
        host: &ProvisionedHost,
        steps: &[HostStep],
    ) -> Result<HostReport, DeployError> {
        let session = self
            .sessions
            .connect(host)
            .await
            .map_err(|e| DeployError::Connectivity {
                host: host.address.clone(),
                message: e.to_string(),
            })?;

        let mut report = HostReport {
            host: host.address.clone(),
            completed: Vec::new(),
        };

        for step in steps {
            debug!("[{}] {}", host.address, step.label());
            let outcome = match step {
                HostStep::Operation(planned) => self.apply(session.as_ref(), planned).await,
                HostStep::RegistryLogin {
                    broker,
                    registry_uri,
                    token,
                } => {
                    broker
                        .login_to_registry(session.as_ref(), &self.renderer.docker(), registry_uri, token)
                        .await
                }
            };

            if let Err(e) = outcome {
                warn!("[{}] {} failed: {}", host.address, step.label(), e);
                return Err(e);
            }
            report.completed.push(step.label().to_string());
        }

        info!("[{}] {} operations complete", host.address, report.completed.len());
        Ok(report)
    }

    async fn apply(
        &self,
        session: &dyn RemoteSession,
        planned: &PlannedOperation,
    ) -> Result<(), DeployError> {
        match &planned.operation {
            Operation::EditTextInPlace {
                path,
                pattern,
                line,
            } => {
                let regex = Regex::new(pattern)
                    .map_err(|e| operation_error(session, planned, format!("invalid pattern: {}", e)))?;
                let current = self
                    .exec_checked(session, planned, &self.renderer.read_file(path), None)
                    .await?;
                let updated = ensure_line(&current.stdout, &regex, line);
                if updated == current.stdout {
                    debug!("[{}] {} already set", session.address(), path);
                    return Ok(());
                }
                self.exec_checked(
                    session,
                    planned,
                    &self.renderer.write_file(path, None),
                    Some(updated.as_bytes()),
                )
                .await?;
            }
            Operation::TransferFile {
                contents,
                remote_path,
                mode,
            } => {
                self.exec_checked(
                    session,
                    planned,
                    &self.renderer.write_file(remote_path, *mode),
                    Some(contents.as_bytes()),
                )
                .await?;
            }
            operation => {
                let command = self.renderer.render(operation).ok_or_else(|| {
                    operation_error(session, planned, "operation has no command form".to_string())
                })?;
                self.exec_checked(session, planned, &command, None).await?;
            }
        }
        Ok(())
    }

    async fn exec_checked(
        &self,
        session: &dyn RemoteSession,
        planned: &PlannedOperation,
        command: &str,
        stdin: Option<&[u8]>,
    ) -> Result<CommandOutput, DeployError> {
        let output = session.exec(command, stdin).await.map_err(|e| match e {
            SessionError::Timeout(_) => operation_error(session, planned, e.to_string()),
            other => DeployError::Connectivity {
                host: session.address().to_string(),
                message: other.to_string(),
            },
        })?;

        if !output.success() {
            return Err(operation_error(session, planned, output.failure_detail()));
        }
        Ok(output)
    }
}

fn operation_error(
    session: &dyn RemoteSession,
    planned: &PlannedOperation,
    message: String,
) -> DeployError {
    DeployError::Operation {
        host: session.address().to_string(),
        operation: planned.label.clone(),
        message,
    }
}
