//! Pipeline context - append-only stage outputs

use crate::core::{error::DeployError, state::Stage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Keys a stage can publish for later stages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKey {
    /// Repository URI in the container registry
    RegistryUri,
    /// Full image reference (`<registry_uri>:<tag>`)
    ImageRef,
    /// Addresses that finished base setup
    PreparedHosts,
    /// Artifact path on the build host
    ArtifactPath,
    /// Image reference that was pushed to the registry
    PublishedImage,
    /// Externally reachable URL of the deployed service
    ServiceUrl,
}

impl ContextKey {
    /// The single stage allowed to write this key
    pub fn owner(self) -> Stage {
        match self {
            ContextKey::RegistryUri | ContextKey::ImageRef => Stage::Provision,
            ContextKey::PreparedHosts => Stage::Prepare,
            ContextKey::ArtifactPath => Stage::Build,
            ContextKey::PublishedImage => Stage::Publish,
            ContextKey::ServiceUrl => Stage::Deploy,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ContextKey::RegistryUri => "registry_uri",
            ContextKey::ImageRef => "image_ref",
            ContextKey::PreparedHosts => "prepared_hosts",
            ContextKey::ArtifactPath => "artifact_path",
            ContextKey::PublishedImage => "published_image",
            ContextKey::ServiceUrl => "service_url",
        }
    }
}

impl fmt::Display for ContextKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution context for a pipeline run
///
/// Each key is written once, by the stage that owns it, and is read-only
/// afterwards. Secrets never go in here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineContext {
    outputs: BTreeMap<ContextKey, String>,
}

impl PipelineContext {
    /// Create a new empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a stage output
    pub fn set(&mut self, stage: Stage, key: ContextKey, value: String) -> Result<(), DeployError> {
        if key.owner() != stage {
            return Err(DeployError::Context(format!(
                "stage {} cannot write '{}' (owned by {})",
                stage,
                key,
                key.owner()
            )));
        }
        if value.is_empty() {
            return Err(DeployError::Context(format!(
                "stage {} wrote an empty value for '{}'",
                stage, key
            )));
        }
        if self.outputs.contains_key(&key) {
            return Err(DeployError::Context(format!("'{}' was already written", key)));
        }
        self.outputs.insert(key, value);
        Ok(())
    }

    /// Read a value
    pub fn get(&self, key: ContextKey) -> Option<&str> {
        self.outputs.get(&key).map(String::as_str)
    }

    /// Read a value a stage declared as input
    pub fn require(&self, stage: Stage, key: ContextKey) -> Result<&str, DeployError> {
        self.get(key).ok_or(DeployError::MissingInput {
            stage,
            key: key.to_string(),
        })
    }

    /// Check that every declared input of a stage is present
    pub fn check_inputs(&self, stage: Stage, inputs: &[ContextKey]) -> Result<(), DeployError> {
        for key in inputs {
            self.require(stage, *key)?;
        }
        Ok(())
    }

    pub fn contains(&self, key: ContextKey) -> bool {
        self.outputs.contains_key(&key)
    }

    /// All outputs written so far, keyed by name
    pub fn outputs(&self) -> impl Iterator<Item = (ContextKey, &str)> {
        self.outputs.iter().map(|(k, v)| (*k, v.as_str()))
    }
}
