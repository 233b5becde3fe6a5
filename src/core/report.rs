//! Report aggregation: fold a run's results into the external artifact

use crate::core::catalog::PipelineKind;
use crate::core::run::PipelineRun;
use crate::core::step::{ErrorKind, Severity, StepResult, StepStatus};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Overall outcome of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Verdict {
    Pass,
    Fail,
    /// A required predecessor did not reach success, so part of the
    /// pipeline never ran
    Blocked,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Verdict::Pass => "pass",
            Verdict::Fail => "fail",
            Verdict::Blocked => "blocked",
        };
        f.write_str(s)
    }
}

/// Per-step line in the report
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepSummary {
    pub step: String,
    pub status: StepStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub duration_ms: u64,
    pub findings: usize,
    pub truncated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// A finding with its originating step attached
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportFinding {
    pub rule_id: String,
    pub severity: Severity,
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    pub message: String,
}

/// The aggregated, externally visible outcome of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub run: Uuid,
    pub kind: PipelineKind,
    pub verdict: Verdict,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub steps: Vec<StepSummary>,
    pub findings: Vec<ReportFinding>,
}

/// Fold a completed run into a report.
///
/// Deterministic for a fixed set of results: step summaries follow the
/// execution order; findings are ordered by severity descending, then
/// step execution order, then the tool's own output order.
pub fn aggregate(run: &PipelineRun) -> Report {
    let mut steps = Vec::with_capacity(run.specs().len());
    let mut findings = Vec::new();

    for spec in run.specs() {
        // Every step is terminal by the time the aggregator runs; a
        // missing slot is a scheduler bug surfaced as an internal error.
        let fallback;
        let result = match run.result(&spec.name) {
            Some(r) => r,
            None => {
                fallback = StepResult::error(
                    spec.name.clone(),
                    ErrorKind::Internal,
                    "no result recorded",
                );
                &fallback
            }
        };

        steps.push(StepSummary {
            step: result.step.clone(),
            status: result.status,
            exit_code: result.exit_code,
            duration_ms: result.duration_ms,
            findings: result.findings.len(),
            truncated: result.truncated,
            error_kind: result.error_kind,
            detail: result.detail.clone(),
        });

        for finding in &result.findings {
            findings.push(ReportFinding {
                rule_id: finding.rule_id.clone(),
                severity: finding.severity,
                step: result.step.clone(),
                file: finding.file.clone(),
                line: finding.line,
                message: finding.message.clone(),
            });
        }
    }

    // Built in step-then-output order, so a stable sort on severity
    // alone preserves the secondary and tertiary keys.
    findings.sort_by(|a, b| b.severity.cmp(&a.severity));

    let verdict = compute_verdict(&steps);
    let finished_at = run.finished_at.unwrap_or(run.started_at);
    let duration_ms = (finished_at - run.started_at).num_milliseconds().max(0) as u64;

    Report {
        run: run.id,
        kind: run.kind,
        verdict,
        started_at: run.started_at,
        finished_at,
        duration_ms,
        steps,
        findings,
    }
}

fn compute_verdict(steps: &[StepSummary]) -> Verdict {
    if steps.iter().any(|s| s.status == StepStatus::Skipped) {
        Verdict::Blocked
    } else if steps.iter().any(|s| s.status.counts_as_failure()) {
        Verdict::Fail
    } else {
        Verdict::Pass
    }
}
