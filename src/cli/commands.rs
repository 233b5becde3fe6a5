//! CLI command definitions

use clap::Args;

/// Run one pipeline and print the report
#[derive(Debug, Args, Clone)]
pub struct RunCommand {
    /// Target artifact (Dockerfile, template, SAM application directory)
    #[arg(short, long)]
    pub target: String,

    /// Pipeline kind (lint, scan, audit, build, scan-and-deploy, full)
    #[arg(short, long)]
    pub kind: String,

    /// Extra steps to enable (repeatable)
    #[arg(long)]
    pub enable: Vec<String>,

    /// Steps to disable (repeatable)
    #[arg(long)]
    pub disable: Vec<String>,

    /// Per-step timeout override in seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Deployment target id for the exclusive deploy lock
    #[arg(short, long)]
    pub environment: Option<String>,

    /// Emit the wire report as JSON instead of the human rendering
    #[arg(long)]
    pub json: bool,
}

/// Print the step catalog
#[derive(Debug, Args, Clone)]
pub struct CatalogCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

/// Probe tool availability
#[derive(Debug, Args, Clone)]
pub struct DoctorCommand {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}
