//! CLI command definitions

use crate::core::config::DeployConfig;
use clap::Args;
use std::path::PathBuf;

/// Run the full pipeline
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Path to deployment manifest
    #[arg(short, long)]
    pub file: String,

    /// Override the manifest's region
    #[arg(long)]
    pub region: Option<String>,

    /// Override where the private key is stored
    #[arg(long)]
    pub key_path: Option<PathBuf>,

    /// Maximum hosts operated on at once
    #[arg(long)]
    pub parallelism: Option<usize>,
}

impl RunCommand {
    /// Apply command-line overrides to a loaded manifest
    pub fn apply_overrides(&self, config: &mut DeployConfig) {
        if let Some(region) = &self.region {
            config.region = region.clone();
        }
        if let Some(path) = &self.key_path {
            config.key_pair.path = Some(path.clone());
        }
        if let Some(parallelism) = self.parallelism {
            config.parallelism = Some(parallelism);
        }
    }
}

/// Validate a deployment manifest
#[derive(Debug, Args, Clone)]
pub struct ValidateCommand {
    /// Path to deployment manifest
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Print the stage plan
#[derive(Debug, Args, Clone)]
pub struct PlanCommand {
    /// Path to deployment manifest
    #[arg(short, long)]
    pub file: String,

    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
