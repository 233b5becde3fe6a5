//! Agent configuration from YAML

use crate::core::catalog::{Catalog, GateClass};
use crate::core::step::Severity;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Configuration load/validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("{0}")]
    Invalid(String),
}

/// Top-level agent configuration.
///
/// Every field is optional in the file; defaults match a stock install
/// with all six tools on the PATH.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// Advisory worker pool size
    pub max_parallel: usize,

    /// Per-step timeout unless overridden per step or per request
    pub default_timeout_secs: u64,

    /// Bound on exclusive deploy-lock acquisition
    pub lock_wait_secs: u64,

    /// Retries for idempotent advisory steps, timed-out attempts only
    pub timeout_retries: u32,

    /// Per-stream output capture bound
    pub output_cap_kib: usize,

    /// Deployment target id used when a request omits one
    pub environment: String,

    /// Tag applied by the docker-build step
    pub image_tag: String,

    /// Severity list passed to trivy's --severity flag
    pub trivy_severity: String,

    pub aws: AwsConfig,

    /// Binary path overrides, keyed by tool name (tests point these at stubs)
    pub tools: HashMap<String, String>,

    /// Extra environment passed to every tool invocation
    /// (e.g. DOCKER_HOST, AWS_PROFILE)
    pub env: HashMap<String, String>,

    /// Per-step policy overrides, keyed by catalog step name
    pub steps: HashMap<String, StepPolicy>,
}

/// AWS settings for the sam-deploy step
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AwsConfig {
    pub region: String,
    pub stack_name: String,
}

impl Default for AwsConfig {
    fn default() -> Self {
        AwsConfig {
            region: "us-east-1".to_string(),
            stack_name: "shipgate-app".to_string(),
        }
    }
}

/// Overridable policy for one catalog step
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StepPolicy {
    pub gate: Option<GateClass>,
    pub fail_on: Option<Severity>,
    pub timeout_secs: Option<u64>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        AgentConfig {
            max_parallel: 4,
            default_timeout_secs: 300,
            lock_wait_secs: 120,
            timeout_retries: 1,
            output_cap_kib: 1024,
            environment: "default".to_string(),
            image_tag: "shipgate/app:latest".to_string(),
            trivy_severity: "HIGH,CRITICAL".to_string(),
            aws: AwsConfig::default(),
            tools: HashMap::new(),
            env: HashMap::new(),
            steps: HashMap::new(),
        }
    }
}

impl AgentConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: AgentConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate loaded values with specific errors.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_parallel == 0 {
            return Err(ConfigError::Invalid(
                "max_parallel must be at least 1".to_string(),
            ));
        }
        if self.default_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "default_timeout_secs must be positive".to_string(),
            ));
        }
        if self.lock_wait_secs == 0 {
            return Err(ConfigError::Invalid(
                "lock_wait_secs must be positive".to_string(),
            ));
        }
        if self.output_cap_kib == 0 {
            return Err(ConfigError::Invalid(
                "output_cap_kib must be positive".to_string(),
            ));
        }
        for (name, policy) in &self.steps {
            if !Catalog::is_known_step(name) {
                return Err(ConfigError::Invalid(format!(
                    "steps override references unknown step '{}'",
                    name
                )));
            }
            if policy.timeout_secs == Some(0) {
                return Err(ConfigError::Invalid(format!(
                    "step '{}' timeout_secs must be positive",
                    name
                )));
            }
        }
        for name in self.tools.keys() {
            if !Catalog::is_known_tool(name) {
                return Err(ConfigError::Invalid(format!(
                    "tools override references unknown tool '{}'",
                    name
                )));
            }
        }
        Ok(())
    }
}
