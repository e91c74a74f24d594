//! Deployment manifest loaded from YAML

use crate::core::{
    operation::{PackageManager, PortMapping},
    resource::{FirewallRule, HostRole, InstanceAttributes, ResourceSpec},
};
use anyhow::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level deployment configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Deployment name, used in logs
    pub name: String,

    /// Cloud region
    pub region: String,

    pub key_pair: KeyPairConfig,

    /// Firewall rule sets referenced by instances
    pub firewalls: Vec<FirewallConfig>,

    /// Exactly one build and at least one run instance
    pub instances: Vec<InstanceConfig>,

    #[serde(default)]
    pub ssh: SshConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    pub app: AppConfig,

    pub registry: RegistryConfig,

    pub service: ServiceConfig,

    #[serde(default)]
    pub polling: PollingConfig,

    /// Maximum hosts operated on concurrently (defaults to group size)
    #[serde(default)]
    pub parallelism: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPairConfig {
    pub name: String,

    /// Where the private key is written on creation (defaults to `~/.ssh/<name>.pem`)
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirewallConfig {
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    pub rules: Vec<FirewallRule>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstanceConfig {
    pub name: String,
    pub role: HostRole,
    /// Machine image reference
    pub image: String,
    pub instance_type: String,
    pub firewalls: Vec<String>,
    #[serde(default = "default_true")]
    pub public_ip: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshConfig {
    #[serde(default = "default_ssh_user")]
    pub user: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Timeout for a single remote command
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: default_ssh_user(),
            connect_timeout_secs: default_connect_timeout(),
            command_timeout_secs: default_command_timeout(),
        }
    }
}

/// Container runtime installed during Prepare
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_runtime_package")]
    pub package: String,

    #[serde(default = "default_runtime_package")]
    pub service: String,

    #[serde(default)]
    pub package_manager: PackageManager,

    /// Container runtime binary on the hosts
    #[serde(default = "default_runtime_package")]
    pub binary: String,

    /// Run runtime and package commands through sudo
    #[serde(default = "default_true")]
    pub sudo: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            package: default_runtime_package(),
            service: default_runtime_package(),
            package_manager: PackageManager::default(),
            binary: default_runtime_package(),
            sudo: true,
        }
    }
}

/// Application source and build
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Git repository URL
    pub repository: String,

    #[serde(default = "default_version")]
    pub version: String,

    /// Checkout directory on the build host
    pub checkout_dir: String,

    #[serde(default = "default_git_image")]
    pub git_image: String,

    /// Image providing the build toolchain
    pub build_image: String,

    pub build_command: String,

    /// Artifact path relative to the checkout
    pub artifact: String,

    /// Optional line edit applied to the checkout before building
    #[serde(default)]
    pub edit: Option<TextEditConfig>,

    /// Docker build context relative to the checkout
    #[serde(default = "default_context")]
    pub context: String,

    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TextEditConfig {
    /// File relative to the checkout
    pub file: String,
    pub pattern: String,
    pub line: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Repository name in the registry
    pub repository: String,

    #[serde(default = "default_tag")]
    pub tag: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    /// Reserved container name on the run hosts
    pub container_name: String,

    pub ports: Vec<PortMapping>,

    /// Path appended to the service URL
    #[serde(default = "default_path")]
    pub path: String,
}

/// Readiness polling with exponential backoff
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_initial_delay")]
    pub initial_delay_ms: u64,

    #[serde(default = "default_max_delay")]
    pub max_delay_ms: u64,

    #[serde(default = "default_poll_timeout")]
    pub timeout_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_initial_delay(),
            max_delay_ms: default_max_delay(),
            timeout_secs: default_poll_timeout(),
        }
    }
}

impl PollingConfig {
    pub fn initial_delay(&self) -> Duration {
        Duration::from_millis(self.initial_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_true() -> bool {
    true
}
fn default_ssh_user() -> String {
    "ec2-user".to_string()
}
fn default_connect_timeout() -> u64 {
    10
}
fn default_command_timeout() -> u64 {
    1800
}
fn default_runtime_package() -> String {
    "docker".to_string()
}
fn default_version() -> String {
    "HEAD".to_string()
}
fn default_git_image() -> String {
    "alpine/git".to_string()
}
fn default_context() -> String {
    ".".to_string()
}
fn default_tag() -> String {
    "latest".to_string()
}
fn default_path() -> String {
    "/".to_string()
}
fn default_initial_delay() -> u64 {
    2000
}
fn default_max_delay() -> u64 {
    30_000
}
fn default_poll_timeout() -> u64 {
    600
}

impl DeployConfig {
    /// Load deployment configuration from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse deployment configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: DeployConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the deployment configuration
    pub fn validate(&self) -> Result<()> {
        let mut firewall_names = HashSet::new();
        for firewall in &self.firewalls {
            if !firewall_names.insert(firewall.name.as_str()) {
                anyhow::bail!("Duplicate firewall rule set: {}", firewall.name);
            }
        }

        let mut instance_names = HashSet::new();
        for instance in &self.instances {
            if !instance_names.insert(instance.name.as_str()) {
                anyhow::bail!("Duplicate instance name: {}", instance.name);
            }
            for firewall in &instance.firewalls {
                if !firewall_names.contains(firewall.as_str()) {
                    anyhow::bail!(
                        "Instance '{}' references non-existent firewall rule set '{}'",
                        instance.name,
                        firewall
                    );
                }
            }
        }

        let builders = self
            .instances
            .iter()
            .filter(|i| i.role == HostRole::Build)
            .count();
        if builders != 1 {
            anyhow::bail!("Expected exactly one build instance, found {}", builders);
        }
        if !self.instances.iter().any(|i| i.role == HostRole::Run) {
            anyhow::bail!("At least one run instance is required");
        }

        if let Some(edit) = &self.app.edit {
            Regex::new(&edit.pattern).map_err(|e| {
                anyhow::anyhow!("Invalid edit pattern '{}': {}", edit.pattern, e)
            })?;
        }

        if self.service.ports.is_empty() {
            anyhow::bail!("Service '{}' exposes no ports", self.service.container_name);
        }
        if self
            .service
            .ports
            .iter()
            .any(|p| p.host == 0 || p.container == 0)
        {
            anyhow::bail!("Port 0 is not a valid mapping");
        }

        if self.polling.initial_delay_ms == 0 || self.polling.timeout_secs == 0 {
            anyhow::bail!("Polling delay and timeout must be positive");
        }
        if self.polling.max_delay_ms < self.polling.initial_delay_ms {
            anyhow::bail!("Polling max_delay_ms must be at least initial_delay_ms");
        }
        if self.parallelism == Some(0) {
            anyhow::bail!("parallelism must be at least 1");
        }

        Ok(())
    }

    /// Path the private key is persisted to
    pub fn key_path(&self) -> PathBuf {
        match &self.key_pair.path {
            Some(path) => expand_home(path),
            None => dirs::home_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join(".ssh")
                .join(format!("{}.pem", self.key_pair.name)),
        }
    }

    /// Resource specs for every firewall rule set, in manifest order
    pub fn firewall_specs(&self) -> Vec<ResourceSpec> {
        self.firewalls
            .iter()
            .map(|f| {
                let description = f
                    .description
                    .clone()
                    .unwrap_or_else(|| format!("{} firewall for {}", f.name, self.name));
                ResourceSpec::firewall(&f.name, description, f.rules.clone())
            })
            .collect()
    }

    /// Resource specs for every instance, in manifest order
    pub fn instance_specs(&self) -> Vec<ResourceSpec> {
        self.instances
            .iter()
            .map(|i| {
                ResourceSpec::instance(
                    &i.name,
                    InstanceAttributes {
                        image: i.image.clone(),
                        instance_type: i.instance_type.clone(),
                        key_name: self.key_pair.name.clone(),
                        firewalls: i.firewalls.clone(),
                        public_ip: i.public_ip,
                        role: i.role,
                    },
                )
            })
            .collect()
    }

    /// Checkout-relative path resolved on the build host
    pub fn checkout_path(&self, relative: &str) -> String {
        if relative.starts_with('/') {
            return relative.to_string();
        }
        let base = self.app.checkout_dir.trim_end_matches('/');
        match relative.trim_start_matches("./") {
            "" | "." => base.to_string(),
            rest => format!("{}/{}", base, rest),
        }
    }
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => dirs::home_dir()
            .map(|home| home.join(rest))
            .unwrap_or_else(|| path.to_path_buf()),
        Err(_) => path.to_path_buf(),
    }
}
