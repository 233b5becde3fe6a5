//! Misconfiguration scan adapter (trivy)

use crate::adapters::{completed_result, process, process_error_result, Invocation, ToolAdapter};
use crate::core::step::{classify_findings, ErrorKind, Finding, Severity, StepResult, StepStatus};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

/// Runs `trivy config --format json --severity <list> <path>`.
///
/// The severity list pre-filters inside trivy, the way the agent has
/// always invoked it; findings below the filter never reach us.
pub struct TrivyAdapter;

#[derive(Debug, Deserialize)]
struct TrivyReport {
    #[serde(default, rename = "Results")]
    results: Vec<TrivyResult>,
}

#[derive(Debug, Deserialize)]
struct TrivyResult {
    #[serde(default, rename = "Target")]
    target: Option<String>,
    #[serde(default, rename = "Misconfigurations")]
    misconfigurations: Vec<Misconfiguration>,
}

#[derive(Debug, Deserialize)]
struct Misconfiguration {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Severity")]
    severity: String,
    #[serde(default, rename = "Message")]
    message: Option<String>,
    #[serde(default, rename = "Description")]
    description: Option<String>,
    #[serde(default, rename = "CauseMetadata")]
    cause: Option<CauseMetadata>,
}

#[derive(Debug, Deserialize)]
struct CauseMetadata {
    #[serde(default, rename = "StartLine")]
    start_line: Option<u64>,
}

fn map_severity(s: &str) -> Severity {
    match s.to_ascii_uppercase().as_str() {
        "CRITICAL" => Severity::Critical,
        "HIGH" => Severity::High,
        "MEDIUM" => Severity::Medium,
        "LOW" => Severity::Low,
        _ => Severity::Info,
    }
}

fn parse_findings(stdout: &str) -> Result<Vec<Finding>, serde_json::Error> {
    let report: TrivyReport = serde_json::from_str(stdout)?;
    let mut findings = Vec::new();
    for result in report.results {
        for misconf in result.misconfigurations {
            let message = misconf
                .message
                .or(misconf.description)
                .unwrap_or_else(|| misconf.id.clone());
            findings.push(Finding {
                rule_id: misconf.id,
                severity: map_severity(&misconf.severity),
                message,
                file: result.target.clone(),
                line: misconf.cause.as_ref().and_then(|c| c.start_line),
            });
        }
    }
    Ok(findings)
}

#[async_trait]
impl ToolAdapter for TrivyAdapter {
    fn step_name(&self) -> &'static str {
        "trivy"
    }

    async fn run(&self, inv: Invocation<'_>) -> StepResult {
        let binary = inv.ctx.binary(&inv.spec.tool);
        let args = vec![
            "config".to_string(),
            "--format".to_string(),
            "json".to_string(),
            "--severity".to_string(),
            inv.ctx.trivy_severity.clone(),
            inv.target.display().to_string(),
        ];

        let output =
            match process::run_tool(&binary, &args, inv.ctx, inv.timeout, &inv.cancel).await {
                Ok(output) => output,
                Err(err) => return process_error_result(self.step_name(), err),
            };

        match output.exit_code {
            Some(0) => match parse_findings(&output.stdout) {
                Ok(findings) => {
                    debug!(count = findings.len(), "trivy misconfigurations parsed");
                    let status = classify_findings(&findings, inv.spec.fail_on);
                    let mut result = completed_result(self.step_name(), status, &output);
                    result.findings = findings;
                    result
                }
                Err(err) => {
                    let mut result = StepResult::error(
                        self.step_name(),
                        ErrorKind::MalformedOutput,
                        format!("trivy output did not parse: {}", err),
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
                result.detail = Some(format!("trivy exited with code {:?}", code));
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"{
        "SchemaVersion": 2,
        "Results": [
            {
                "Target": "Dockerfile",
                "Class": "config",
                "Type": "dockerfile",
                "Misconfigurations": [
                    {
                        "ID": "AVD-DS-0002",
                        "Severity": "HIGH",
                        "Message": "Specify at least 1 USER command",
                        "CauseMetadata": {"StartLine": 1, "EndLine": 1}
                    },
                    {
                        "ID": "AVD-DS-0013",
                        "Severity": "CRITICAL",
                        "Description": "Port 22 should not be exposed"
                    }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_sample_output() {
        let findings = parse_findings(SAMPLE).unwrap();
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].rule_id, "AVD-DS-0002");
        assert_eq!(findings[0].severity, Severity::High);
        assert_eq!(findings[0].line, Some(1));
        assert_eq!(findings[0].file.as_deref(), Some("Dockerfile"));
        // Description used when Message is absent
        assert_eq!(findings[1].message, "Port 22 should not be exposed");
        assert_eq!(findings[1].severity, Severity::Critical);
    }

    #[test]
    fn test_empty_results() {
        let findings = parse_findings(r#"{"SchemaVersion": 2, "Results": []}"#).unwrap();
        assert!(findings.is_empty());
    }

    #[test]
    fn test_unknown_severity_maps_info() {
        assert_eq!(map_severity("UNKNOWN"), Severity::Info);
        assert_eq!(map_severity("medium"), Severity::Medium);
    }
}
