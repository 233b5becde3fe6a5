//! Command-line interface

pub mod commands;
pub mod output;

use clap::{Parser, Subcommand};
use commands::{CatalogCommand, DoctorCommand, RunCommand};
use std::ffi::OsString;

/// Deployment gate agent: lint, scan, build and deploy pipelines
#[derive(Debug, Parser, Clone)]
#[command(name = "shipgate")]
#[command(version = "0.1.0")]
#[command(about = "Deployment gate agent for container and IaC artifacts", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to agent configuration file
    #[arg(short, long, global = true)]
    pub config: Option<String>,
}

/// Available commands
#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Serve the stdio agent protocol
    Serve,

    /// Run one pipeline and print the report
    Run(RunCommand),

    /// Print the step catalog
    Catalog(CatalogCommand),

    /// Probe the availability of each external tool
    Doctor(DoctorCommand),
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
