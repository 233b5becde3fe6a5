//! Immutable execution context handed to every adapter call

use crate::core::catalog::Catalog;
use crate::core::config::AgentConfig;
use crate::adapters::process;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Resolved environment for tool invocations.
///
/// Built once at startup from the agent config; adapters never read
/// ambient process state, so tests can substitute stub binaries by
/// overriding `tools`.
#[derive(Debug, Clone)]
pub struct ExecContext {
    /// Binary path per tool name; absent entries fall back to the tool
    /// name itself (PATH lookup)
    pub tools: HashMap<String, String>,

    /// Extra environment variables set on every child process
    pub env: Vec<(String, String)>,

    /// Working directory for child processes
    pub cwd: Option<PathBuf>,

    /// Per-stream output capture bound in bytes
    pub output_cap: usize,

    /// Tag for the docker-build step
    pub image_tag: String,

    /// Severity list for trivy's pre-filter
    pub trivy_severity: String,

    pub aws_region: String,
    pub aws_stack_name: String,
}

impl ExecContext {
    pub fn from_config(config: &AgentConfig) -> Self {
        ExecContext {
            tools: config.tools.clone(),
            env: config.env.iter().map(|(k, v)| (k.clone(), v.clone())).collect(),
            cwd: None,
            output_cap: config.output_cap_kib * 1024,
            image_tag: config.image_tag.clone(),
            trivy_severity: config.trivy_severity.clone(),
            aws_region: config.aws.region.clone(),
            aws_stack_name: config.aws.stack_name.clone(),
        }
    }

    /// Resolved binary path for a tool.
    pub fn binary(&self, tool: &str) -> String {
        self.tools
            .get(tool)
            .cloned()
            .unwrap_or_else(|| tool.to_string())
    }
}

/// Outcome of a startup availability probe for one tool
#[derive(Debug, Clone)]
pub struct ToolProbe {
    pub tool: String,
    /// First line of `<tool> --version`, absent when the binary is
    /// missing or the probe failed
    pub version: Option<String>,
}

impl ToolProbe {
    pub fn available(&self) -> bool {
        self.version.is_some()
    }
}

/// Probe every catalog tool once at startup.
///
/// Versions are logged here and never re-checked per request.
pub async fn probe_tools(ctx: &ExecContext) -> Vec<ToolProbe> {
    let cancel = CancellationToken::new();
    let mut probes = Vec::new();

    for tool in Catalog::tool_names() {
        let binary = ctx.binary(tool);
        let version = match process::run_tool(
            &binary,
            &["--version".to_string()],
            ctx,
            Duration::from_secs(10),
            &cancel,
        )
        .await
        {
            Ok(output) if output.exit_code == Some(0) => {
                let line = output.stdout.lines().next().unwrap_or("").trim().to_string();
                info!(tool, version = %line, "tool available");
                Some(line)
            }
            Ok(output) => {
                warn!(tool, exit_code = ?output.exit_code, "version probe failed");
                None
            }
            Err(err) => {
                warn!(tool, error = %err, "tool unavailable");
                None
            }
        };
        probes.push(ToolProbe {
            tool: tool.to_string(),
            version,
        });
    }

    probes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_binary_falls_back_to_tool_name() {
        let ctx = ExecContext::from_config(&AgentConfig::default());
        assert_eq!(ctx.binary("hadolint"), "hadolint");
    }

    #[test]
    fn test_binary_override() {
        let mut config = AgentConfig::default();
        config
            .tools
            .insert("trivy".to_string(), "/opt/trivy".to_string());
        let ctx = ExecContext::from_config(&config);
        assert_eq!(ctx.binary("trivy"), "/opt/trivy");
    }

    #[tokio::test]
    async fn test_probe_reports_missing_tools() {
        let mut config = AgentConfig::default();
        for tool in Catalog::tool_names() {
            config
                .tools
                .insert(tool.to_string(), format!("/nonexistent/{}", tool));
        }
        let ctx = ExecContext::from_config(&config);
        let probes = probe_tools(&ctx).await;
        assert_eq!(probes.len(), Catalog::tool_names().len());
        assert!(probes.iter().all(|p| !p.available()));
    }
}
