//! Resource reconciler - create-if-absent for cloud resources

use crate::cloud::{CloudError, CloudProvider};
use crate::core::{
    config::PollingConfig, DeployError, DesiredAttributes, FirewallRule, InstanceAttributes,
    InstanceStatus, ResourceDescriptor, ResourceKind, ResourceSpec,
};
use secrecy::{ExposeSecret, SecretString};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use std::sync::Arc;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// Ensures named resources exist without touching existing ones
pub struct Reconciler {
    cloud: Arc<dyn CloudProvider>,
    polling: PollingConfig,
}

impl Reconciler {
    pub fn new(cloud: Arc<dyn CloudProvider>, polling: PollingConfig) -> Self {
        Self { cloud, polling }
    }

    /// Look the resource up by name and create it only if absent.
    ///
    /// Existing resources are returned as they are; attribute differences
    /// are reported in `drift` and logged, never applied.
    pub async fn ensure(&self, spec: &ResourceSpec) -> Result<ResourceDescriptor, DeployError> {
        let label = spec.label();
        let fail = |e: CloudError| DeployError::Provisioning {
            resource: label.clone(),
            message: e.to_string(),
        };

        match &spec.desired {
            DesiredAttributes::KeyPair => self.ensure_key_pair(spec).await.map_err(fail),
            DesiredAttributes::FirewallRuleSet { description, rules } => self
                .ensure_firewall(spec, description, rules)
                .await
                .map_err(fail),
            DesiredAttributes::ComputeInstance(attributes) => {
                self.ensure_instance(spec, attributes).await
            }
        }
    }

    async fn ensure_key_pair(&self, spec: &ResourceSpec) -> Result<ResourceDescriptor, CloudError> {
        if let Some(id) = self.cloud.find_key_pair(&spec.name).await? {
            debug!("Key pair {} exists ({})", spec.name, id);
            return Ok(descriptor(spec, id, None, false, Vec::new()));
        }

        let created = self.cloud.create_key_pair(&spec.name).await?;
        info!("Created key pair {}", spec.name);
        let mut descriptor = descriptor(spec, created.id, None, true, Vec::new());
        descriptor.private_key = Some(created.private_key);
        Ok(descriptor)
    }

    async fn ensure_firewall(
        &self,
        spec: &ResourceSpec,
        description: &str,
        rules: &[FirewallRule],
    ) -> Result<ResourceDescriptor, CloudError> {
        if let Some(existing) = self.cloud.find_firewall(&spec.name).await? {
            let drift = firewall_drift(rules, &existing.rules);
            if !drift.is_empty() {
                warn!(
                    "Firewall rule set {} exists with different rules, reusing as is: {}",
                    spec.name,
                    drift.join("; ")
                );
            }
            return Ok(descriptor(spec, existing.id, None, false, drift));
        }

        let id = self
            .cloud
            .create_firewall(&spec.name, description, rules)
            .await?;
        info!("Created firewall rule set {} ({})", spec.name, id);
        Ok(descriptor(spec, id, None, true, Vec::new()))
    }

    async fn ensure_instance(
        &self,
        spec: &ResourceSpec,
        attributes: &InstanceAttributes,
    ) -> Result<ResourceDescriptor, DeployError> {
        let fail = |e: CloudError| DeployError::Provisioning {
            resource: spec.label(),
            message: e.to_string(),
        };

        let (status, created, drift) = match self.cloud.find_instance(&spec.name).await.map_err(fail)? {
            Some(existing) if existing.state.is_stopped() => {
                return Err(DeployError::Provisioning {
                    resource: spec.label(),
                    message: format!(
                        "instance {} is {:?}; start it or terminate it before deploying",
                        existing.id, existing.state
                    ),
                });
            }
            Some(existing) => {
                let drift = instance_drift(attributes, &existing);
                if !drift.is_empty() {
                    warn!(
                        "Instance {} differs from the manifest, reusing as is: {}",
                        spec.name,
                        drift.join("; ")
                    );
                }
                (existing, false, drift)
            }
            None => {
                let status = self
                    .cloud
                    .create_instance(&spec.name, attributes)
                    .await
                    .map_err(fail)?;
                info!("Launched instance {} ({})", spec.name, status.id);
                (status, true, Vec::new())
            }
        };

        let status = if status.is_reachable() {
            status
        } else {
            self.wait_until_reachable(spec, &status.id).await?
        };

        Ok(descriptor(
            spec,
            status.id,
            status.public_address,
            created,
            drift,
        ))
    }

    /// Poll with exponential backoff until the instance is running with an address
    async fn wait_until_reachable(
        &self,
        spec: &ResourceSpec,
        id: &str,
    ) -> Result<InstanceStatus, DeployError> {
        let deadline = Instant::now() + self.polling.timeout();
        let mut delay = self.polling.initial_delay();

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(DeployError::Provisioning {
                    resource: spec.label(),
                    message: format!(
                        "not running after {} seconds",
                        self.polling.timeout_secs
                    ),
                });
            }
            sleep(delay.min(deadline - now)).await;

            let status = self
                .cloud
                .describe_instance(id)
                .await
                .map_err(|e| DeployError::Provisioning {
                    resource: spec.label(),
                    message: e.to_string(),
                })?;

            if status.is_reachable() {
                info!("Instance {} is running at {:?}", spec.name, status.public_address);
                return Ok(status);
            }
            if status.state.is_gone() || status.state.is_stopped() {
                return Err(DeployError::Provisioning {
                    resource: spec.label(),
                    message: format!("instance {} entered state {:?}", id, status.state),
                });
            }

            debug!("Instance {} is {:?}, waiting {:?}", spec.name, status.state, delay);
            delay = (delay * 2).min(self.polling.max_delay());
        }
    }
}

fn descriptor(
    spec: &ResourceSpec,
    id: String,
    public_address: Option<String>,
    created: bool,
    drift: Vec<String>,
) -> ResourceDescriptor {
    ResourceDescriptor {
        kind: spec.kind(),
        name: spec.name.clone(),
        id,
        public_address,
        private_key: None,
        created,
        drift,
    }
}

fn firewall_drift(desired: &[FirewallRule], observed: &[FirewallRule]) -> Vec<String> {
    let desired: BTreeSet<String> = desired.iter().map(|r| r.to_string()).collect();
    let observed: BTreeSet<String> = observed.iter().map(|r| r.to_string()).collect();

    let mut drift: Vec<String> = desired
        .difference(&observed)
        .map(|r| format!("missing rule {}", r))
        .collect();
    drift.extend(observed.difference(&desired).map(|r| format!("extra rule {}", r)));
    drift
}

fn instance_drift(desired: &InstanceAttributes, observed: &InstanceStatus) -> Vec<String> {
    let mut drift = Vec::new();
    if !observed.image.is_empty() && observed.image != desired.image {
        drift.push(format!("image {} (wanted {})", observed.image, desired.image));
    }
    if !observed.instance_type.is_empty() && observed.instance_type != desired.instance_type {
        drift.push(format!(
            "type {} (wanted {})",
            observed.instance_type, desired.instance_type
        ));
    }
    drift
}

/// Write freshly created key material readable by the owner only
pub fn persist_private_key(path: &Path, private_key: &SecretString) -> Result<(), DeployError> {
    let fail = |e: std::io::Error| DeployError::Provisioning {
        resource: format!("{} file {}", ResourceKind::KeyPair, path.display()),
        message: e.to_string(),
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent).map_err(fail)?;
        }
    }

    let mut options = std::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path).map_err(fail)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        file.set_permissions(std::fs::Permissions::from_mode(0o600))
            .map_err(fail)?;
    }
    let material = private_key.expose_secret();
    file.write_all(material.as_bytes()).map_err(fail)?;
    if !material.ends_with('\n') {
        file.write_all(b"\n").map_err(fail)?;
    }

    info!("Private key written to {}", path.display());
    Ok(())
}
