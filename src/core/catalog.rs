//! Step catalog: the fixed table of pipeline steps and their policies

use crate::core::config::AgentConfig;
use crate::core::step::Severity;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Which subset of the catalog a request asks for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PipelineKind {
    Lint,
    Scan,
    Audit,
    Build,
    ScanAndDeploy,
    Full,
}

impl PipelineKind {
    pub const ALL: [PipelineKind; 6] = [
        PipelineKind::Lint,
        PipelineKind::Scan,
        PipelineKind::Audit,
        PipelineKind::Build,
        PipelineKind::ScanAndDeploy,
        PipelineKind::Full,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            PipelineKind::Lint => "lint",
            PipelineKind::Scan => "scan",
            PipelineKind::Audit => "audit",
            PipelineKind::Build => "build",
            PipelineKind::ScanAndDeploy => "scan-and-deploy",
            PipelineKind::Full => "full",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PipelineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "lint" => Ok(PipelineKind::Lint),
            "scan" => Ok(PipelineKind::Scan),
            "audit" => Ok(PipelineKind::Audit),
            "build" => Ok(PipelineKind::Build),
            "scan-and-deploy" => Ok(PipelineKind::ScanAndDeploy),
            "full" => Ok(PipelineKind::Full),
            other => Err(format!("unknown pipeline kind '{}'", other)),
        }
    }
}

/// Whether a failed step blocks its dependents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GateClass {
    /// Failure or error cascades as `skipped` to every dependent
    Hard,
    /// Failure is recorded in the report but dependents still run
    Advisory,
}

/// A catalog step resolved against configuration overrides.
///
/// This is the runtime shape the orchestrator schedules; the static
/// table below is the source it is built from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSpec {
    /// Catalog key, unique within a run
    pub name: String,

    /// Binary key looked up in the execution context
    pub tool: String,

    /// Names of steps that must reach a terminal state first
    pub predecessors: Vec<String>,

    pub gate: GateClass,

    /// Mutating steps touch shared external state (daemon, cloud stack)
    /// and run exclusively under the deployment lock
    pub mutating: bool,

    /// Findings at or above this severity fail the step
    pub fail_on: Severity,

    pub timeout: Duration,
}

/// Static catalog row
struct StepDef {
    name: &'static str,
    tool: &'static str,
    predecessors: &'static [&'static str],
    gate: GateClass,
    mutating: bool,
    fail_on: Severity,
    kinds: &'static [PipelineKind],
}

const CATALOG: &[StepDef] = &[
    StepDef {
        name: "hadolint",
        tool: "hadolint",
        predecessors: &[],
        gate: GateClass::Hard,
        mutating: false,
        fail_on: Severity::High,
        kinds: &[
            PipelineKind::Lint,
            PipelineKind::Audit,
            PipelineKind::Build,
            PipelineKind::Full,
        ],
    },
    StepDef {
        name: "trivy",
        tool: "trivy",
        predecessors: &[],
        gate: GateClass::Hard,
        mutating: false,
        fail_on: Severity::High,
        kinds: &[
            PipelineKind::Scan,
            PipelineKind::Audit,
            PipelineKind::Build,
            PipelineKind::ScanAndDeploy,
            PipelineKind::Full,
        ],
    },
    StepDef {
        name: "cfn-lint",
        tool: "cfn-lint",
        predecessors: &[],
        gate: GateClass::Hard,
        mutating: false,
        fail_on: Severity::High,
        kinds: &[
            PipelineKind::Lint,
            PipelineKind::Audit,
            PipelineKind::ScanAndDeploy,
            PipelineKind::Full,
        ],
    },
    StepDef {
        name: "checkov",
        tool: "checkov",
        predecessors: &[],
        gate: GateClass::Advisory,
        mutating: false,
        fail_on: Severity::High,
        kinds: &[
            PipelineKind::Scan,
            PipelineKind::Audit,
            PipelineKind::ScanAndDeploy,
            PipelineKind::Full,
        ],
    },
    StepDef {
        name: "docker-build",
        tool: "docker",
        predecessors: &["hadolint", "trivy"],
        gate: GateClass::Hard,
        mutating: true,
        fail_on: Severity::High,
        kinds: &[PipelineKind::Build, PipelineKind::Full],
    },
    StepDef {
        name: "sam-deploy",
        tool: "sam",
        predecessors: &["docker-build", "cfn-lint", "trivy", "checkov"],
        gate: GateClass::Hard,
        mutating: true,
        fail_on: Severity::High,
        kinds: &[PipelineKind::ScanAndDeploy, PipelineKind::Full],
    },
];

/// Errors constructing the step graph for a run
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GraphError {
    #[error("step '{step}' requires '{predecessor}', which is disabled")]
    DisabledPredecessor { step: String, predecessor: String },

    #[error("dependency cycle involving step '{0}'")]
    Cycle(String),

    #[error("step '{step}' depends on unknown step '{predecessor}'")]
    UnknownPredecessor { step: String, predecessor: String },

    #[error("duplicate step '{0}'")]
    DuplicateStep(String),

    #[error("selection contains no steps")]
    EmptySelection,
}

/// The catalog resolved against the agent configuration.
///
/// Built once at startup; requests select subsets of it by name.
#[derive(Debug, Clone)]
pub struct Catalog {
    steps: Vec<StepSpec>,
}

impl Catalog {
    /// Resolve the built-in table against per-step config overrides.
    ///
    /// Unknown step names in the config are rejected by
    /// [`AgentConfig::validate`] before this is called.
    pub fn from_config(config: &AgentConfig) -> Self {
        let default_timeout = Duration::from_secs(config.default_timeout_secs);
        let steps = CATALOG
            .iter()
            .map(|def| {
                let policy = config.steps.get(def.name);
                StepSpec {
                    name: def.name.to_string(),
                    tool: def.tool.to_string(),
                    predecessors: def.predecessors.iter().map(|p| p.to_string()).collect(),
                    gate: policy.and_then(|p| p.gate).unwrap_or(def.gate),
                    mutating: def.mutating,
                    fail_on: policy.and_then(|p| p.fail_on).unwrap_or(def.fail_on),
                    timeout: policy
                        .and_then(|p| p.timeout_secs)
                        .map(Duration::from_secs)
                        .unwrap_or(default_timeout),
                }
            })
            .collect();
        Catalog { steps }
    }

    pub fn steps(&self) -> &[StepSpec] {
        &self.steps
    }

    pub fn contains(&self, name: &str) -> bool {
        self.steps.iter().any(|s| s.name == name)
    }

    /// Whether `name` belongs to the built-in policy table.
    pub fn is_known_step(name: &str) -> bool {
        CATALOG.iter().any(|d| d.name == name)
    }

    /// Whether any catalog step invokes the tool binary `name`.
    pub fn is_known_tool(name: &str) -> bool {
        CATALOG.iter().any(|d| d.tool == name)
    }

    /// Distinct tool binaries the catalog invokes, in table order.
    pub fn tool_names() -> Vec<&'static str> {
        let mut tools = Vec::new();
        for def in CATALOG {
            if !tools.contains(&def.tool) {
                tools.push(def.tool);
            }
        }
        tools
    }

    fn def(name: &str) -> Option<&'static StepDef> {
        CATALOG.iter().find(|d| d.name == name)
    }

    /// Select the steps for a run.
    ///
    /// A predecessor excluded by kind membership simply drops the edge
    /// (the kind defines the applicable subgraph); a predecessor that
    /// would have run but was explicitly disabled is a [`GraphError`],
    /// reported before any tool runs. Disabling a step the kind never
    /// selects is a no-op.
    pub fn select(
        &self,
        kind: PipelineKind,
        enable: &[String],
        disable: &[String],
    ) -> Result<Vec<StepSpec>, GraphError> {
        let selected: Vec<&StepSpec> = self
            .steps
            .iter()
            .filter(|spec| {
                let in_kind = Self::def(&spec.name)
                    .map(|d| d.kinds.contains(&kind))
                    .unwrap_or(false);
                let enabled = enable.iter().any(|e| e == &spec.name);
                let disabled = disable.iter().any(|d| d == &spec.name);
                (in_kind || enabled) && !disabled
            })
            .collect();

        if selected.is_empty() {
            return Err(GraphError::EmptySelection);
        }

        let names: Vec<&str> = selected.iter().map(|s| s.name.as_str()).collect();
        let mut result = Vec::with_capacity(selected.len());
        for spec in selected {
            for pred in &spec.predecessors {
                if names.contains(&pred.as_str()) {
                    continue;
                }
                let would_run = Self::def(pred)
                    .map(|d| d.kinds.contains(&kind))
                    .unwrap_or(false)
                    || enable.iter().any(|e| e == pred);
                if would_run && disable.iter().any(|d| d == pred) {
                    return Err(GraphError::DisabledPredecessor {
                        step: spec.name.clone(),
                        predecessor: pred.clone(),
                    });
                }
            }
            let mut pruned = spec.clone();
            pruned.predecessors.retain(|pred| names.contains(&pred.as_str()));
            result.push(pruned);
        }

        Ok(result)
    }
}
