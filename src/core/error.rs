//! Error taxonomy for a deployment run

use crate::core::state::Stage;
use thiserror::Error;

/// Errors raised while reconciling resources or operating on hosts
#[derive(Debug, Clone, Error)]
pub enum DeployError {
    /// Resource creation failed or never became ready
    #[error("provisioning {resource} failed: {message}")]
    Provisioning { resource: String, message: String },

    /// Remote session could not be established
    #[error("host {host} unreachable: {message}")]
    Connectivity { host: String, message: String },

    /// A single idempotent operation failed on a host
    #[error("operation '{operation}' failed on {host}: {message}")]
    Operation {
        host: String,
        operation: String,
        message: String,
    },

    /// The artifact was not produced
    #[error("build failed: {0}")]
    Build(String),

    /// Registry authentication or push failed
    #[error("publish failed: {0}")]
    Publish(String),

    /// The service container failed to start
    #[error("deploy failed: {0}")]
    Deploy(String),

    /// A stage was started before its inputs were written
    #[error("stage {stage} is missing input '{key}'")]
    MissingInput { stage: Stage, key: String },

    /// Context ownership or write-once violation
    #[error("context error: {0}")]
    Context(String),
}

/// First error of a failing stage
#[derive(Debug, Clone, Error)]
#[error("stage {stage} failed: {source}")]
pub struct StageError {
    pub stage: Stage,
    #[source]
    pub source: DeployError,
}

impl StageError {
    pub fn new(stage: Stage, source: DeployError) -> Self {
        Self { stage, source }
    }
}
