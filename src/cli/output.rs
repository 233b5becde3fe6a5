//! CLI output formatting

use crate::adapters::ToolProbe;
use crate::core::catalog::{GateClass, StepSpec};
use crate::core::report::{Report, ReportFinding, StepSummary, Verdict};
use crate::core::step::{Severity, StepStatus};
use crate::execution::ExecutionEvent;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;

// Re-export style
pub use console::style;

// Emojis for output
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "✓ ");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "✗ ");
pub static SPINNER: Emoji<'_, '_> = Emoji("⏳ ", "~ ");
pub static INFO: Emoji<'_, '_> = Emoji("ℹ️  ", "i ");
pub static WARN: Emoji<'_, '_> = Emoji("⚠️  ", "! ");
pub static SHIELD: Emoji<'_, '_> = Emoji("🛡️  ", "# ");

/// Create a progress bar over the run's step count
pub fn create_progress_bar(total: usize) -> ProgressBar {
    let progress = ProgressBar::new(total as u64);
    progress.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("#>-"),
    );
    progress.enable_steady_tick(Duration::from_millis(100));
    progress
}

/// Format a verdict for display
pub fn format_verdict(verdict: Verdict) -> String {
    match verdict {
        Verdict::Pass => style("PASS").green().bold().to_string(),
        Verdict::Fail => style("FAIL").red().bold().to_string(),
        Verdict::Blocked => style("BLOCKED").yellow().bold().to_string(),
    }
}

/// Format a step status for display
pub fn format_status(status: StepStatus) -> String {
    match status {
        StepStatus::Success => style("success").green().to_string(),
        StepStatus::Warning => style("warning").yellow().to_string(),
        StepStatus::Failure => style("failure").red().to_string(),
        StepStatus::Error => style("error").red().to_string(),
        StepStatus::Skipped => style("skipped").dim().to_string(),
        StepStatus::TimedOut => style("timed-out").red().to_string(),
    }
}

/// Format a finding severity for display
pub fn format_severity(severity: Severity) -> String {
    match severity {
        Severity::Critical => style("CRITICAL").red().bold().to_string(),
        Severity::High => style("HIGH").red().to_string(),
        Severity::Medium => style("MEDIUM").yellow().to_string(),
        Severity::Low => style("LOW").cyan().to_string(),
        Severity::Info => style("INFO").dim().to_string(),
    }
}

fn format_step_line(summary: &StepSummary) -> String {
    let icon = match summary.status {
        StepStatus::Success => CHECK,
        StepStatus::Warning => WARN,
        StepStatus::Skipped => INFO,
        _ => CROSS,
    };

    let mut line = format!(
        "{} {:<14} {} ({} findings, {}ms)",
        icon,
        style(&summary.step).bold(),
        format_status(summary.status),
        summary.findings,
        summary.duration_ms,
    );
    if let Some(detail) = &summary.detail {
        line.push_str(&format!(" - {}", style(detail).dim()));
    }
    if summary.truncated {
        line.push_str(&format!(" {}", style("[output truncated]").dim()));
    }
    line
}

fn format_finding_line(finding: &ReportFinding) -> String {
    let location = match (&finding.file, finding.line) {
        (Some(file), Some(line)) => format!(" ({}:{})", file, line),
        (Some(file), None) => format!(" ({})", file),
        _ => String::new(),
    };
    format!(
        "  {:<8} {} [{}]{} {}",
        format_severity(finding.severity),
        style(&finding.rule_id).bold(),
        style(&finding.step).dim(),
        style(location).dim(),
        finding.message,
    )
}

/// Format a full report for human reading
pub fn format_report(report: &Report) -> String {
    let mut out = Vec::new();
    out.push(format!(
        "{} {} pipeline {} - {}",
        SHIELD,
        style(report.kind.to_string()).bold(),
        style(&report.run.to_string()[..8]).dim(),
        format_verdict(report.verdict),
    ));
    out.push(String::new());

    for summary in &report.steps {
        out.push(format_step_line(summary));
    }

    if !report.findings.is_empty() {
        out.push(String::new());
        out.push(format!("{} findings:", report.findings.len()));
        for finding in &report.findings {
            out.push(format_finding_line(finding));
        }
    }

    out.push(String::new());
    out.push(format!(
        "completed in {}",
        style(format!("{}ms", report.duration_ms)).cyan()
    ));
    out.join("\n")
}

/// Format an execution event for display
pub fn format_execution_event(event: &ExecutionEvent) -> String {
    match event {
        ExecutionEvent::StepStarted { step, attempt } => {
            if *attempt > 1 {
                format!(
                    "{} {} (attempt {})",
                    SPINNER,
                    style(step).cyan(),
                    style(attempt).dim()
                )
            } else {
                format!("{} {}", SPINNER, style(step).cyan())
            }
        }
        ExecutionEvent::StepFinished { step, status } => {
            let icon = match status {
                StepStatus::Success | StepStatus::Warning => CHECK,
                StepStatus::Skipped => INFO,
                _ => CROSS,
            };
            format!("{} {} {}", icon, style(step).cyan(), format_status(*status))
        }
        ExecutionEvent::StepRetrying { step, attempt } => format!(
            "{} {} timed out, retrying (attempt {})",
            WARN,
            style(step).cyan(),
            attempt
        ),
    }
}

/// Format one catalog row
pub fn format_catalog_entry(spec: &StepSpec) -> String {
    let gate = match spec.gate {
        GateClass::Hard => style("hard").red().to_string(),
        GateClass::Advisory => style("advisory").yellow().to_string(),
    };
    let predecessors = if spec.predecessors.is_empty() {
        style("-").dim().to_string()
    } else {
        spec.predecessors.join(", ")
    };
    format!(
        "{:<14} {:<10} gate={:<10} fail_on={:<8} timeout={}s  after: {}",
        style(&spec.name).bold(),
        spec.tool,
        gate,
        spec.fail_on,
        spec.timeout.as_secs(),
        predecessors,
    )
}

/// Format one doctor probe row
pub fn format_probe(probe: &ToolProbe) -> String {
    match &probe.version {
        Some(version) => format!(
            "{} {:<14} {}",
            CHECK,
            style(&probe.tool).bold(),
            style(version).dim()
        ),
        None => format!(
            "{} {:<14} {}",
            CROSS,
            style(&probe.tool).bold(),
            style("not found").red()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_bar_spans_step_count() {
        let bar = create_progress_bar(6);
        assert_eq!(bar.length(), Some(6));
        assert_eq!(bar.position(), 0);
        bar.inc(1);
        assert_eq!(bar.position(), 1);
        bar.finish_and_clear();
    }
}
