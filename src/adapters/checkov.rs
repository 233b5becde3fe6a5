//! Policy-as-code scan adapter (checkov)

use crate::adapters::{completed_result, process, process_error_result, Invocation, ToolAdapter};
use crate::core::step::{classify_findings, ErrorKind, Finding, Severity, StepResult, StepStatus};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Runs `checkov --file <file> --output json --quiet`.
///
/// Exit 1 means failed checks exist. The JSON document is a single
/// report object, or an array of per-framework reports when checkov
/// matched more than one framework.
pub struct CheckovAdapter;

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CheckovOutput {
    Many(Vec<CheckovReport>),
    One(CheckovReport),
}

#[derive(Debug, Deserialize)]
struct CheckovReport {
    #[serde(default)]
    results: Option<CheckovResults>,
}

#[derive(Debug, Deserialize)]
struct CheckovResults {
    #[serde(default)]
    failed_checks: Vec<FailedCheck>,
}

#[derive(Debug, Deserialize)]
struct FailedCheck {
    check_id: String,
    #[serde(default)]
    check_name: Option<String>,
    #[serde(default)]
    severity: Option<String>,
    #[serde(default)]
    file_path: Option<String>,
    #[serde(default)]
    file_line_range: Vec<u64>,
}

fn check_severity(severity: Option<&str>) -> Severity {
    match severity.map(|s| s.to_ascii_uppercase()) {
        Some(s) => match s.as_str() {
            "CRITICAL" => Severity::Critical,
            "HIGH" => Severity::High,
            "MEDIUM" => Severity::Medium,
            "LOW" => Severity::Low,
            "INFO" => Severity::Info,
            _ => Severity::Medium,
        },
        // Severity metadata needs a platform key; null is common.
        None => Severity::Medium,
    }
}

fn parse_findings(stdout: &str) -> Result<Vec<Finding>, serde_json::Error> {
    let output: CheckovOutput = serde_json::from_str(stdout)?;
    let reports = match output {
        CheckovOutput::Many(reports) => reports,
        CheckovOutput::One(report) => vec![report],
    };

    let mut findings = Vec::new();
    for report in reports {
        let Some(results) = report.results else {
            continue;
        };
        for check in results.failed_checks {
            findings.push(Finding {
                severity: check_severity(check.severity.as_deref()),
                message: check.check_name.unwrap_or_else(|| check.check_id.clone()),
                rule_id: check.check_id,
                file: check.file_path,
                line: check.file_line_range.first().copied(),
            });
        }
    }
    Ok(findings)
}

#[async_trait]
impl ToolAdapter for CheckovAdapter {
    fn step_name(&self) -> &'static str {
        "checkov"
    }

    async fn run(&self, inv: Invocation<'_>) -> StepResult {
        let binary = inv.ctx.binary(&inv.spec.tool);
        let args = vec![
            "--file".to_string(),
            inv.target.display().to_string(),
            "--output".to_string(),
            "json".to_string(),
            "--quiet".to_string(),
        ];

        let output =
            match process::run_tool(&binary, &args, inv.ctx, inv.timeout, &inv.cancel).await {
                Ok(output) => output,
                Err(err) => return process_error_result(self.step_name(), err),
            };

        match output.exit_code {
            Some(0) | Some(1) => match parse_findings(&output.stdout) {
                Ok(findings) => {
                    debug!(count = findings.len(), "checkov failed checks parsed");
                    let status = classify_findings(&findings, inv.spec.fail_on);
                    let mut result = completed_result(self.step_name(), status, &output);
                    result.findings = findings;
                    result
                }
                Err(err) => {
                    let mut result = StepResult::error(
                        self.step_name(),
                        ErrorKind::MalformedOutput,
                        format!("checkov output did not parse: {}", err),
                    );
                    result.exit_code = output.exit_code;
                    result.raw_output = output.stdout.clone();
                    result.truncated = output.truncated;
                    result
                }
            },
            code => {
                let mut result =
                    completed_result(self.step_name(), StepStatus::Failure, &output);
                result.detail = Some(format!("checkov exited with code {:?}", code));
                result
            }
        }
    }
}
