//! Tool adapters: one wrapper per external executable

pub mod cfn_lint;
pub mod checkov;
pub mod context;
pub mod docker_build;
pub mod hadolint;
pub mod process;
pub mod sam_deploy;
pub mod trivy;

pub use context::{probe_tools, ExecContext, ToolProbe};
pub use process::{ProcessError, ProcessOutput};

use crate::core::catalog::StepSpec;
use crate::core::step::{ErrorKind, StepResult, StepStatus};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything one adapter call needs, owned by the caller
pub struct Invocation<'a> {
    pub spec: &'a StepSpec,
    pub target: &'a Path,
    pub ctx: &'a ExecContext,
    pub timeout: Duration,
    pub cancel: CancellationToken,
}

/// Wraps one external tool invocation, normalizing its exit code and
/// output into a [`StepResult`].
///
/// Implementations always return a result; process-level failures
/// (missing binary, timeout, cancellation) become the corresponding
/// status/error kind, never a panic or an `Err` to the scheduler.
#[async_trait]
pub trait ToolAdapter: Send + Sync {
    /// Catalog step this adapter serves.
    fn step_name(&self) -> &'static str;

    async fn run(&self, inv: Invocation<'_>) -> StepResult;
}

/// Registry of adapters keyed by catalog step name
pub struct AdapterSet {
    adapters: HashMap<&'static str, Arc<dyn ToolAdapter>>,
}

impl AdapterSet {
    pub fn new(adapters: Vec<Arc<dyn ToolAdapter>>) -> Self {
        AdapterSet {
            adapters: adapters.into_iter().map(|a| (a.step_name(), a)).collect(),
        }
    }

    /// The six production adapters.
    pub fn builtin() -> Self {
        Self::new(vec![
            Arc::new(hadolint::HadolintAdapter),
            Arc::new(trivy::TrivyAdapter),
            Arc::new(cfn_lint::CfnLintAdapter),
            Arc::new(checkov::CheckovAdapter),
            Arc::new(docker_build::DockerBuildAdapter),
            Arc::new(sam_deploy::SamDeployAdapter),
        ])
    }

    pub fn get(&self, step: &str) -> Option<Arc<dyn ToolAdapter>> {
        self.adapters.get(step).cloned()
    }
}

/// Map a process-level failure to a step result.
pub(crate) fn process_error_result(step: &str, err: ProcessError) -> StepResult {
    match err {
        ProcessError::TimedOut(secs) => StepResult::timed_out(step, secs),
        ProcessError::Cancelled => StepResult::error(step, ErrorKind::Cancelled, "run cancelled"),
        ProcessError::NotFound(bin) => StepResult::error(
            step,
            ErrorKind::ToolMissing,
            format!("'{}' not found on the execution path", bin),
        ),
        ProcessError::PermissionDenied(bin) => StepResult::error(
            step,
            ErrorKind::PermissionDenied,
            format!("'{}' is not executable", bin),
        ),
        ProcessError::Spawn(msg) => StepResult::error(step, ErrorKind::Internal, msg),
    }
}

/// Base result for a completed process, before findings are attached.
pub(crate) fn completed_result(step: &str, status: StepStatus, out: &ProcessOutput) -> StepResult {
    let mut result = StepResult::new(step, status);
    result.exit_code = out.exit_code;
    result.raw_output = combine_streams(out);
    result.truncated = out.truncated;
    result.duration_ms = out.duration.as_millis() as u64;
    result.started_at = Utc::now()
        - chrono::Duration::from_std(out.duration).unwrap_or_else(|_| chrono::Duration::zero());
    result
}

fn combine_streams(out: &ProcessOutput) -> String {
    if out.stderr.is_empty() {
        out.stdout.clone()
    } else if out.stdout.is_empty() {
        out.stderr.clone()
    } else {
        format!("{}\n{}", out.stdout, out.stderr)
    }
}
