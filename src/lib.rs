//! shipline - one-shot provisioning, build and deployment of a containerized service

pub mod cli;
pub mod cloud;
pub mod core;
pub mod credentials;
pub mod execution;
pub mod remote;

// Re-export commonly used types
pub use crate::cloud::{AwsCli, CloudError, CloudProvider, RegistryApi};
pub use crate::core::config::DeployConfig;
pub use crate::core::{ContextKey, DeployError, ExecutionStatus, PipelineContext, Stage, StageError};
pub use credentials::{CredentialBroker, RegistryToken};
pub use execution::{Coordinator, Deployment, ExecutionEvent};
pub use remote::{RemoteSession, SessionFactory, SshSessionFactory};
