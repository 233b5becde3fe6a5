//! Step outcome models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Normalized finding severity, shared across all tools.
///
/// Variant order is the ranking order, so `>=` comparisons against a
/// threshold work directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// All severities from highest to lowest.
    pub const DESCENDING: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "critical" => Ok(Severity::Critical),
            "high" => Ok(Severity::High),
            "medium" => Ok(Severity::Medium),
            "low" => Ok(Severity::Low),
            "info" => Ok(Severity::Info),
            other => Err(format!("unknown severity '{}'", other)),
        }
    }
}

/// One normalized issue reported by a tool
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    /// Tool rule identifier (e.g. "DL3008", "CKV_DOCKER_2")
    pub rule_id: String,

    /// Normalized severity
    pub severity: Severity,

    /// Human-readable description of the issue
    pub message: String,

    /// File the finding points at, when the tool reports one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,

    /// Line number within the file, when available
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
}

/// Terminal status of a step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    /// Tool ran cleanly with no findings
    Success,
    /// Tool ran and reported findings below the step's fail threshold
    Warning,
    /// Tool ran and reported findings at or above the fail threshold,
    /// or exited with an undocumented nonzero code
    Failure,
    /// The tool could not run or its output could not be used
    Error,
    /// A required predecessor did not succeed; the step was never started
    Skipped,
    /// The tool exceeded its allotted duration and was terminated
    TimedOut,
}

impl StepStatus {
    /// Whether this outcome lets hard-gated dependents proceed.
    pub fn is_gate_pass(self) -> bool {
        matches!(self, StepStatus::Success | StepStatus::Warning)
    }

    /// Whether this outcome counts toward a `fail` verdict.
    ///
    /// Timed-out ranks as failure for the verdict but keeps its own tag
    /// for diagnostics.
    pub fn counts_as_failure(self) -> bool {
        matches!(
            self,
            StepStatus::Failure | StepStatus::Error | StepStatus::TimedOut
        )
    }
}

impl fmt::Display for StepStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepStatus::Success => "success",
            StepStatus::Warning => "warning",
            StepStatus::Failure => "failure",
            StepStatus::Error => "error",
            StepStatus::Skipped => "skipped",
            StepStatus::TimedOut => "timed-out",
        };
        f.write_str(s)
    }
}

/// Why a step ended in status `error`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    /// The tool binary was not found on the execution path
    ToolMissing,
    /// The tool binary exists but could not be executed
    PermissionDenied,
    /// The tool reported success but its output did not parse
    MalformedOutput,
    /// The run was cancelled while this step was pending or running
    Cancelled,
    /// The exclusive deploy lock could not be acquired within the bound
    ResourceContention,
    /// Unexpected harness failure (spawn error, panicked task)
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::ToolMissing => "tool-missing",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::MalformedOutput => "malformed-output",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::ResourceContention => "resource-contention",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Recorded outcome of one step.
///
/// Write-once: a result recorded for a step in a run is never mutated,
/// only superseded by a fresh run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    /// Step name (catalog key)
    pub step: String,

    /// Terminal status
    pub status: StepStatus,

    /// Exit code of the external process, when it ran to completion
    pub exit_code: Option<i32>,

    /// Normalized findings parsed from the tool output
    pub findings: Vec<Finding>,

    /// Captured tool output (stdout then stderr), bounded
    pub raw_output: String,

    /// Set when the captured output hit the capture bound
    pub truncated: bool,

    /// Present only for status `error`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,

    /// Short human-readable note (skip reason, image id, error message)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,

    /// When the step's final attempt started
    pub started_at: DateTime<Utc>,

    /// Wall time of the final attempt in milliseconds
    pub duration_ms: u64,

    /// Total attempts, >1 only after a timed-out retry
    pub attempts: u32,
}

impl StepResult {
    /// Base result with the given status; callers fill in process details.
    pub fn new(step: impl Into<String>, status: StepStatus) -> Self {
        StepResult {
            step: step.into(),
            status,
            exit_code: None,
            findings: Vec::new(),
            raw_output: String::new(),
            truncated: false,
            error_kind: None,
            detail: None,
            started_at: Utc::now(),
            duration_ms: 0,
            attempts: 1,
        }
    }

    /// Result for a step that never ran because a predecessor gate failed.
    pub fn skipped(step: impl Into<String>, blocked_by: &str) -> Self {
        let mut result = StepResult::new(step, StepStatus::Skipped);
        result.detail = Some(format!("predecessor '{}' did not succeed", blocked_by));
        result
    }

    /// Result for a step that could not run.
    pub fn error(step: impl Into<String>, kind: ErrorKind, detail: impl Into<String>) -> Self {
        let mut result = StepResult::new(step, StepStatus::Error);
        result.error_kind = Some(kind);
        result.detail = Some(detail.into());
        result
    }

    /// Result for a step whose process outlived its deadline.
    pub fn timed_out(step: impl Into<String>, after_secs: u64) -> Self {
        let mut result = StepResult::new(step, StepStatus::TimedOut);
        result.detail = Some(format!("timed out after {}s", after_secs));
        result
    }

}

/// Classify a completed tool invocation from its findings.
///
/// Findings at or above `fail_on` make the step a failure; anything
/// below only warns. No findings means success.
pub fn classify_findings(findings: &[Finding], fail_on: Severity) -> StepStatus {
    if findings.iter().any(|f| f.severity >= fail_on) {
        StepStatus::Failure
    } else if findings.is_empty() {
        StepStatus::Success
    } else {
        StepStatus::Warning
    }
}
