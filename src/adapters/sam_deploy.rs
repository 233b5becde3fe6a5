//! SAM application deploy adapter (sam deploy)

use crate::adapters::{completed_result, process, process_error_result, Invocation, ToolAdapter};
use crate::core::step::{StepResult, StepStatus};
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

/// Runs `sam deploy` in the application directory.
///
/// Plain-text adapter: no findings to parse, the raw output and exit
/// code are the whole story. Mutating: holds the deployment lock.
pub struct SamDeployAdapter;

fn application_dir(target: &Path) -> Option<&Path> {
    if target.is_file() {
        target.parent().filter(|p| !p.as_os_str().is_empty())
    } else {
        Some(target)
    }
}

#[async_trait]
impl ToolAdapter for SamDeployAdapter {
    fn step_name(&self) -> &'static str {
        "sam-deploy"
    }

    async fn run(&self, inv: Invocation<'_>) -> StepResult {
        let binary = inv.ctx.binary(&inv.spec.tool);
        let args = vec![
            "deploy".to_string(),
            "--stack-name".to_string(),
            inv.ctx.aws_stack_name.clone(),
            "--region".to_string(),
            inv.ctx.aws_region.clone(),
            "--no-confirm-changeset".to_string(),
            "--no-fail-on-empty-changeset".to_string(),
            "--no-progressbar".to_string(),
        ];

        // sam resolves samconfig/template relative to its working dir.
        let mut ctx = inv.ctx.clone();
        if let Some(dir) = application_dir(inv.target) {
            ctx.cwd = Some(dir.to_path_buf());
        }

        let output = match process::run_tool(&binary, &args, &ctx, inv.timeout, &inv.cancel).await
        {
            Ok(output) => output,
            Err(err) => return process_error_result(self.step_name(), err),
        };

        match output.exit_code {
            Some(0) => {
                info!(stack = %ctx.aws_stack_name, region = %ctx.aws_region, "stack deployed");
                let mut result = completed_result(self.step_name(), StepStatus::Success, &output);
                result.detail = Some(format!(
                    "deployed stack {} in {}",
                    ctx.aws_stack_name, ctx.aws_region
                ));
                result
            }
            code => {
                let mut result =
                    completed_result(self.step_name(), StepStatus::Failure, &output);
                result.detail = Some(format!("sam deploy exited with code {:?}", code));
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_application_dir_for_file_target() {
        let dir = std::env::temp_dir().join("shipgate-sam-test");
        std::fs::create_dir_all(&dir).unwrap();
        let template = dir.join("template.yaml");
        std::fs::write(&template, "AWSTemplateFormatVersion: '2010-09-09'").unwrap();

        assert_eq!(application_dir(&template), Some(dir.as_path()));
        assert_eq!(application_dir(&dir), Some(dir.as_path()));

        std::fs::remove_file(&template).ok();
    }
}
