//! Cloud resource specs and descriptors

use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of cloud resource the reconciler manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    KeyPair,
    FirewallRuleSet,
    ComputeInstance,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::KeyPair => "key pair",
            ResourceKind::FirewallRuleSet => "firewall rule set",
            ResourceKind::ComputeInstance => "instance",
        };
        f.write_str(name)
    }
}

/// One inbound firewall rule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallRule {
    #[serde(default = "default_protocol")]
    pub protocol: String,
    pub port: u16,
    #[serde(default = "default_cidr")]
    pub cidr: String,
}

fn default_protocol() -> String {
    "tcp".to_string()
}

fn default_cidr() -> String {
    "0.0.0.0/0".to_string()
}

impl fmt::Display for FirewallRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} from {}", self.protocol, self.port, self.cidr)
    }
}

/// Logical role an instance plays in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HostRole {
    Build,
    Run,
}

impl HostRole {
    /// Group a host with this role is registered into
    pub fn group(self) -> &'static str {
        match self {
            HostRole::Build => crate::core::host::BUILD_GROUP,
            HostRole::Run => crate::core::host::RUN_GROUP,
        }
    }
}

impl fmt::Display for HostRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.group())
    }
}

/// Desired attributes of a compute instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceAttributes {
    pub image: String,
    pub instance_type: String,
    pub key_name: String,
    pub firewalls: Vec<String>,
    pub public_ip: bool,
    pub role: HostRole,
}

/// Desired attributes per resource kind
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DesiredAttributes {
    KeyPair,
    FirewallRuleSet {
        description: String,
        rules: Vec<FirewallRule>,
    },
    ComputeInstance(InstanceAttributes),
}

/// A named resource the pipeline depends on
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceSpec {
    pub name: String,
    pub desired: DesiredAttributes,
}

impl ResourceSpec {
    pub fn key_pair(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            desired: DesiredAttributes::KeyPair,
        }
    }

    pub fn firewall(name: impl Into<String>, description: impl Into<String>, rules: Vec<FirewallRule>) -> Self {
        Self {
            name: name.into(),
            desired: DesiredAttributes::FirewallRuleSet {
                description: description.into(),
                rules,
            },
        }
    }

    pub fn instance(name: impl Into<String>, attributes: InstanceAttributes) -> Self {
        Self {
            name: name.into(),
            desired: DesiredAttributes::ComputeInstance(attributes),
        }
    }

    pub fn kind(&self) -> ResourceKind {
        match self.desired {
            DesiredAttributes::KeyPair => ResourceKind::KeyPair,
            DesiredAttributes::FirewallRuleSet { .. } => ResourceKind::FirewallRuleSet,
            DesiredAttributes::ComputeInstance(_) => ResourceKind::ComputeInstance,
        }
    }

    /// Label used in logs and errors, e.g. `instance 'app-build'`
    pub fn label(&self) -> String {
        format!("{} '{}'", self.kind(), self.name)
    }
}

/// Lifecycle state reported by the cloud for an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
}

impl InstanceState {
    /// Parse the cloud's state name
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "pending" => Some(InstanceState::Pending),
            "running" => Some(InstanceState::Running),
            "stopping" => Some(InstanceState::Stopping),
            "stopped" => Some(InstanceState::Stopped),
            "shutting-down" => Some(InstanceState::ShuttingDown),
            "terminated" => Some(InstanceState::Terminated),
            _ => None,
        }
    }

    /// Gone for good; a new instance with the same name may be created
    pub fn is_gone(self) -> bool {
        matches!(self, InstanceState::ShuttingDown | InstanceState::Terminated)
    }

    /// Halted; it will not become running without an explicit start
    pub fn is_stopped(self) -> bool {
        matches!(self, InstanceState::Stopping | InstanceState::Stopped)
    }
}

/// Observed state of an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceStatus {
    pub id: String,
    pub state: InstanceState,
    pub public_address: Option<String>,
    pub image: String,
    pub instance_type: String,
}

impl InstanceStatus {
    /// Running with a public address
    pub fn is_reachable(&self) -> bool {
        self.state == InstanceState::Running && self.public_address.is_some()
    }
}

/// Observed state of a firewall rule set
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FirewallStatus {
    pub id: String,
    pub rules: Vec<FirewallRule>,
}

/// Identifying attributes of a reconciled resource
#[derive(Debug, Clone)]
pub struct ResourceDescriptor {
    pub kind: ResourceKind,
    pub name: String,
    pub id: String,
    /// Set for instances
    pub public_address: Option<String>,
    /// Private key material, present only when a key pair was just created
    pub private_key: Option<SecretString>,
    /// Whether this call created the resource
    pub created: bool,
    /// Desired attributes that differ from the existing resource
    pub drift: Vec<String>,
}
