//! Dockerfile lint adapter (hadolint)

use crate::adapters::{completed_result, process, process_error_result, Invocation, ToolAdapter};
use crate::core::step::{classify_findings, ErrorKind, Finding, Severity, StepResult};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Runs `hadolint --no-fail --format json <file>`.
///
/// `--no-fail` keeps the exit code at 0 when findings exist; exit 1
/// with parseable JSON is also accepted since older releases report
/// findings that way.
pub struct HadolintAdapter;

#[derive(Debug, Deserialize)]
struct HadolintIssue {
    code: String,
    level: String,
    message: String,
    #[serde(default)]
    line: Option<u64>,
    #[serde(default)]
    file: Option<String>,
}

fn level_severity(level: &str) -> Severity {
    match level {
        "error" => Severity::High,
        "warning" => Severity::Medium,
        "info" => Severity::Low,
        _ => Severity::Info, // "style"
    }
}

fn parse_findings(stdout: &str) -> Result<Vec<Finding>, serde_json::Error> {
    let issues: Vec<HadolintIssue> = serde_json::from_str(stdout)?;
    Ok(issues
        .into_iter()
        .map(|issue| Finding {
            rule_id: issue.code,
            severity: level_severity(&issue.level),
            message: issue.message,
            file: issue.file,
            line: issue.line,
        })
        .collect())
}

#[async_trait]
impl ToolAdapter for HadolintAdapter {
    fn step_name(&self) -> &'static str {
        "hadolint"
    }

    async fn run(&self, inv: Invocation<'_>) -> StepResult {
        let binary = inv.ctx.binary(&inv.spec.tool);
        let args = vec![
            "--no-fail".to_string(),
            "--format".to_string(),
            "json".to_string(),
            inv.target.display().to_string(),
        ];

        let output =
            match process::run_tool(&binary, &args, inv.ctx, inv.timeout, &inv.cancel).await {
                Ok(output) => output,
                Err(err) => return process_error_result(self.step_name(), err),
            };

        match output.exit_code {
            // 1 is the documented findings-present exit without --no-fail
            Some(0) | Some(1) => match parse_findings(&output.stdout) {
                Ok(findings) => {
                    debug!(count = findings.len(), "hadolint findings parsed");
                    let status = classify_findings(&findings, inv.spec.fail_on);
                    let mut result = completed_result(self.step_name(), status, &output);
                    result.findings = findings;
                    result
                }
                Err(err) => {
                    let mut result = StepResult::error(
                        self.step_name(),
                        ErrorKind::MalformedOutput,
                        format!("hadolint output did not parse: {}", err),
                    );
                    result.exit_code = output.exit_code;
                    result.raw_output = output.stdout.clone();
                    result.truncated = output.truncated;
                    result
                }
            },
            code => {
                let mut result = completed_result(
                    self.step_name(),
                    crate::core::step::StepStatus::Failure,
                    &output,
                );
                result.detail = Some(format!("hadolint exited with code {:?}", code));
                result
            }
        }
    }
}
