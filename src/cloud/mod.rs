//! Cloud provisioning and registry APIs

pub mod aws;
pub mod reconciler;

use crate::core::{FirewallRule, FirewallStatus, InstanceAttributes, InstanceStatus};
use crate::credentials::RegistryToken;
use async_trait::async_trait;
use secrecy::SecretString;
use thiserror::Error;

pub use aws::AwsCli;
pub use reconciler::{persist_private_key, Reconciler};

/// Error types for cloud API calls
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("API error: {0}")]
    Api(String),

    #[error("Timeout after {0} seconds")]
    Timeout(u64),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// A key pair returned by creation
pub struct CreatedKeyPair {
    pub id: String,
    /// Only ever returned here
    pub private_key: SecretString,
}

/// Compute provisioning API
#[async_trait]
pub trait CloudProvider: Send + Sync {
    /// Key pair id by name
    async fn find_key_pair(&self, name: &str) -> Result<Option<String>, CloudError>;

    async fn create_key_pair(&self, name: &str) -> Result<CreatedKeyPair, CloudError>;

    async fn find_firewall(&self, name: &str) -> Result<Option<FirewallStatus>, CloudError>;

    /// Create a rule set and authorize its rules; returns the id
    async fn create_firewall(
        &self,
        name: &str,
        description: &str,
        rules: &[FirewallRule],
    ) -> Result<String, CloudError>;

    /// Instance by name, ignoring terminated ones
    async fn find_instance(&self, name: &str) -> Result<Option<InstanceStatus>, CloudError>;

    async fn create_instance(
        &self,
        name: &str,
        attributes: &InstanceAttributes,
    ) -> Result<InstanceStatus, CloudError>;

    async fn describe_instance(&self, id: &str) -> Result<InstanceStatus, CloudError>;
}

/// Container registry API
#[async_trait]
pub trait RegistryApi: Send + Sync {
    /// Repository URI by name
    async fn find_repository(&self, name: &str) -> Result<Option<String>, CloudError>;

    async fn create_repository(&self, name: &str) -> Result<String, CloudError>;

    /// Exchange the caller's identity for a short-lived push/pull token
    async fn get_token(&self) -> Result<RegistryToken, CloudError>;
}
