//! Core domain model: catalog, request, run graph, results, report

pub mod catalog;
pub mod config;
pub mod report;
pub mod request;
pub mod run;
pub mod step;

pub use catalog::{Catalog, GateClass, GraphError, PipelineKind, StepSpec};
pub use config::{AgentConfig, AwsConfig, ConfigError, StepPolicy};
pub use report::{aggregate, Report, ReportFinding, StepSummary, Verdict};
pub use request::Request;
pub use run::{PipelineRun, RunState};
pub use step::{classify_findings, ErrorKind, Finding, Severity, StepResult, StepStatus};
