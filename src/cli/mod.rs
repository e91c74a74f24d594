//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{PlanCommand, RunCommand, ValidateCommand};
use std::ffi::OsString;

/// Provision, build and deploy a containerized service in one run
#[derive(Debug, Parser, Clone)]
#[command(name = "shipline")]
#[command(version = "0.1.0")]
#[command(about = "One-shot provision, build and deploy of a containerized service", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the full pipeline
    Run(RunCommand),

    /// Validate a deployment manifest
    Validate(ValidateCommand),

    /// Show what each stage would do without touching anything
    Plan(PlanCommand),
}

impl Cli {
    /// Parse CLI arguments from environment
    pub fn from_args() -> Self {
        Self::parse()
    }

    /// Parse CLI arguments from a slice
    pub fn try_parse_from<I, T>(itr: I) -> Result<Self, clap::Error>
    where
        I: IntoIterator<Item = T>,
        T: Into<OsString> + Clone,
    {
        <Self as Parser>::try_parse_from(itr)
    }
}
