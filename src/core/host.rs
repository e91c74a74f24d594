//! Host registrar - named groups of reachable hosts

use crate::core::resource::HostRole;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

pub const BUILD_GROUP: &str = "build";
pub const RUN_GROUP: &str = "run";
/// Hosts that need the container runtime installed
pub const BASE_GROUP: &str = "base";

/// A reachable host provisioned for this run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedHost {
    /// Instance name
    pub name: String,
    /// Public address used for sessions
    pub address: String,
    pub role: HostRole,
    /// Login user
    pub user: String,
    /// Private key used to authenticate
    pub key_path: PathBuf,
}

/// Typed registry of host groups
///
/// Groups are additive; a host may appear in several groups.
#[derive(Debug, Clone, Default)]
pub struct HostRegistry {
    groups: BTreeMap<String, Vec<ProvisionedHost>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a host to a group, ignoring an address already present there
    pub fn register(&mut self, group: &str, host: ProvisionedHost) {
        let members = self.groups.entry(group.to_string()).or_default();
        if members.iter().any(|h| h.address == host.address) {
            debug!("Host {} already in group {}", host.address, group);
            return;
        }
        info!("Registered {} ({}) in group {}", host.name, host.address, group);
        members.push(host);
    }

    /// Hosts in a group, in registration order
    pub fn group(&self, group: &str) -> &[ProvisionedHost] {
        self.groups.get(group).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Remove a host from every group
    pub fn exclude(&mut self, address: &str) {
        for (group, members) in self.groups.iter_mut() {
            let before = members.len();
            members.retain(|h| h.address != address);
            if members.len() != before {
                info!("Excluded {} from group {}", address, group);
            }
        }
    }
}
