//! shipgate - a deployment gate agent for container and IaC artifacts
//!
//! Runs lint/scan/build/deploy tool pipelines against a target
//! artifact, gates each stage on its predecessors, and aggregates the
//! results into a deterministic report served over a line-oriented
//! stdio protocol or a one-shot CLI.

pub mod adapters;
pub mod cli;
pub mod core;
pub mod execution;
pub mod protocol;

// Re-export commonly used types
pub use crate::adapters::{AdapterSet, ExecContext, Invocation, ToolAdapter};
pub use crate::core::{Catalog, PipelineKind, PipelineRun, Report, StepResult, StepStatus, Verdict};
pub use crate::execution::{DeployLocks, ExecutionEvent, Orchestrator};
pub use crate::protocol::{RequestRouter, RunRequest};
