//! CloudFormation/SAM template lint adapter (cfn-lint)

use crate::adapters::{completed_result, process, process_error_result, Invocation, ToolAdapter};
use crate::core::step::{classify_findings, ErrorKind, Finding, Severity, StepResult, StepStatus};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Runs `cfn-lint --format json <template>`.
///
/// cfn-lint's exit code is a bitmask: 2 = errors, 4 = warnings,
/// 8 = informational. Any combination of those bits means "findings
/// present", not an adapter error.
pub struct CfnLintAdapter;

const FINDINGS_MASK: i32 = 2 | 4 | 8;

fn findings_present(code: i32) -> bool {
    code != 0 && (code & !FINDINGS_MASK) == 0
}

#[derive(Debug, Deserialize)]
struct CfnLintMatch {
    #[serde(rename = "Rule")]
    rule: CfnLintRule,
    #[serde(rename = "Level")]
    level: String,
    #[serde(rename = "Message")]
    message: String,
    #[serde(default, rename = "Filename")]
    filename: Option<String>,
    #[serde(default, rename = "Location")]
    location: Option<CfnLintLocation>,
}

#[derive(Debug, Deserialize)]
struct CfnLintRule {
    #[serde(rename = "Id")]
    id: String,
}

#[derive(Debug, Deserialize)]
struct CfnLintLocation {
    #[serde(default, rename = "Start")]
    start: Option<CfnLintPosition>,
}

#[derive(Debug, Deserialize)]
struct CfnLintPosition {
    #[serde(default, rename = "LineNumber")]
    line_number: Option<u64>,
}

fn level_severity(level: &str) -> Severity {
    match level {
        "Error" => Severity::High,
        "Warning" => Severity::Medium,
        _ => Severity::Low, // "Informational"
    }
}

fn parse_findings(stdout: &str) -> Result<Vec<Finding>, serde_json::Error> {
    let matches: Vec<CfnLintMatch> = serde_json::from_str(stdout)?;
    Ok(matches
        .into_iter()
        .map(|m| Finding {
            rule_id: m.rule.id,
            severity: level_severity(&m.level),
            message: m.message,
            file: m.filename,
            line: m
                .location
                .and_then(|l| l.start)
                .and_then(|s| s.line_number),
        })
        .collect())
}

#[async_trait]
impl ToolAdapter for CfnLintAdapter {
    fn step_name(&self) -> &'static str {
        "cfn-lint"
    }

    async fn run(&self, inv: Invocation<'_>) -> StepResult {
        let binary = inv.ctx.binary(&inv.spec.tool);
        let args = vec![
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
            Some(code) if code == 0 || findings_present(code) => {
                match parse_findings(&output.stdout) {
                    Ok(findings) => {
                        debug!(count = findings.len(), "cfn-lint matches parsed");
                        let status = classify_findings(&findings, inv.spec.fail_on);
                        let mut result = completed_result(self.step_name(), status, &output);
                        result.findings = findings;
                        result
                    }
                    Err(err) => {
                        let mut result = StepResult::error(
                            self.step_name(),
                            ErrorKind::MalformedOutput,
                            format!("cfn-lint output did not parse: {}", err),
                        );
                        result.exit_code = output.exit_code;
                        result.raw_output = output.stdout.clone();
                        result.truncated = output.truncated;
                        result
                    }
                }
            }
            code => {
                let mut result =
                    completed_result(self.step_name(), StepStatus::Failure, &output);
                result.detail = Some(format!("cfn-lint exited with code {:?}", code));
                result
            }
        }
    }
}
