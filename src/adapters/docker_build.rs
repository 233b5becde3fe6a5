//! Container image build adapter (docker build)

use crate::adapters::{completed_result, process, process_error_result, Invocation, ToolAdapter};
use crate::core::step::{StepResult, StepStatus};
use async_trait::async_trait;
use regex::Regex;
use std::sync::OnceLock;
use tracing::info;

/// Runs `docker build --tag <tag>` against the target.
///
/// The target may be the Dockerfile itself or its directory; a file
/// target becomes `--file <target>` with the parent directory as the
/// build context. Mutating: holds the deployment lock while it runs.
pub struct DockerBuildAdapter;

/// Matches both the BuildKit and the classic builder's image-id lines.
fn image_id_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?:writing image sha256:|Successfully built )([0-9a-f]{12,64})")
            .expect("image id regex")
    })
}

fn extract_image_id(output: &str) -> Option<String> {
    image_id_regex()
        .captures_iter(output)
        .last()
        .map(|c| c[1].to_string())
}

#[async_trait]
impl ToolAdapter for DockerBuildAdapter {
    fn step_name(&self) -> &'static str {
        "docker-build"
    }

    async fn run(&self, inv: Invocation<'_>) -> StepResult {
        let binary = inv.ctx.binary(&inv.spec.tool);

        let mut args = vec!["build".to_string()];
        if inv.target.is_file() {
            args.push("--file".to_string());
            args.push(inv.target.display().to_string());
            let context_dir = inv
                .target
                .parent()
                .filter(|p| !p.as_os_str().is_empty())
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ".".to_string());
            args.push("--tag".to_string());
            args.push(inv.ctx.image_tag.clone());
            args.push(context_dir);
        } else {
            args.push("--tag".to_string());
            args.push(inv.ctx.image_tag.clone());
            args.push(inv.target.display().to_string());
        }

        let output =
            match process::run_tool(&binary, &args, inv.ctx, inv.timeout, &inv.cancel).await {
                Ok(output) => output,
                Err(err) => return process_error_result(self.step_name(), err),
            };

        match output.exit_code {
            Some(0) => {
                let combined = format!("{}\n{}", output.stdout, output.stderr);
                let mut result = completed_result(self.step_name(), StepStatus::Success, &output);
                match extract_image_id(&combined) {
                    Some(id) => {
                        info!(image = %id, tag = %inv.ctx.image_tag, "image built");
                        result.detail = Some(format!("built image {}", id));
                    }
                    None => {
                        result.detail = Some(format!("built tag {}", inv.ctx.image_tag));
                    }
                }
                result
            }
            code => {
                let mut result =
                    completed_result(self.step_name(), StepStatus::Failure, &output);
                result.detail = Some(format!("docker build exited with code {:?}", code));
                result
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_buildkit_image_id() {
        let output = "#8 exporting layers\n#8 writing image sha256:4a8c21a9f19dd0c2dd3a6425cab936c4640f644b1b38b6a24325c8d55a2a2f94 done\n#8 naming to docker.io/shipgate/app:latest";
        assert_eq!(
            extract_image_id(output).as_deref(),
            Some("4a8c21a9f19dd0c2dd3a6425cab936c4640f644b1b38b6a24325c8d55a2a2f94")
        );
    }

    #[test]
    fn test_extract_classic_image_id() {
        let output = "Step 5/5 : CMD [\"app\"]\nSuccessfully built 02a5e95f0c1e\nSuccessfully tagged shipgate/app:latest";
        assert_eq!(extract_image_id(output).as_deref(), Some("02a5e95f0c1e"));
    }

    #[test]
    fn test_no_image_id() {
        assert_eq!(extract_image_id("error during connect"), None);
    }
}
