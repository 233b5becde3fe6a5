//! Shared test fixtures: scripted adapters and orchestrator builders

use async_trait::async_trait;
use shipgate::adapters::{AdapterSet, ExecContext, Invocation, ToolAdapter};
use shipgate::core::catalog::{GateClass, StepSpec};
use shipgate::core::step::{Finding, Severity, StepResult, StepStatus};
use shipgate::core::{AgentConfig, Request};
use shipgate::execution::{DeployLocks, Orchestrator};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Adapter that replays scripted results instead of running a process.
///
/// Each invocation pops the next scripted result; when the script is
/// exhausted the stub returns success. Optionally records invocation
/// order into a shared log.
pub struct StubAdapter {
    name: &'static str,
    script: Mutex<VecDeque<StepResult>>,
    delay: Option<Duration>,
    calls: AtomicUsize,
    log: Option<Arc<Mutex<Vec<String>>>>,
}

impl StubAdapter {
    pub fn new(name: &'static str) -> Self {
        StubAdapter {
            name,
            script: Mutex::new(VecDeque::new()),
            delay: None,
            calls: AtomicUsize::new(0),
            log: None,
        }
    }

    pub fn returning(self, result: StepResult) -> Self {
        self.script.lock().unwrap().push_back(result);
        self
    }

    pub fn with_status(self, status: StepStatus) -> Self {
        let name = self.name;
        self.returning(StepResult::new(name, status))
    }

    pub fn with_findings(self, findings: Vec<Finding>, status: StepStatus) -> Self {
        let name = self.name;
        let mut result = StepResult::new(name, status);
        result.findings = findings;
        self.returning(result)
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn with_log(mut self, log: Arc<Mutex<Vec<String>>>) -> Self {
        self.log = Some(log);
        self
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolAdapter for StubAdapter {
    fn step_name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, _inv: Invocation<'_>) -> StepResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(log) = &self.log {
            log.lock().unwrap().push(self.name.to_string());
        }
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self.script.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| StepResult::new(self.name, StepStatus::Success))
    }
}

/// Adapter whose task panics instead of producing a result.
pub struct PanickingAdapter {
    name: &'static str,
}

impl PanickingAdapter {
    pub fn new(name: &'static str) -> Self {
        PanickingAdapter { name }
    }
}

#[async_trait]
impl ToolAdapter for PanickingAdapter {
    fn step_name(&self) -> &'static str {
        self.name
    }

    async fn run(&self, _inv: Invocation<'_>) -> StepResult {
        panic!("{} adapter panicked", self.name);
    }
}

pub fn finding(rule: &str, severity: Severity) -> Finding {
    Finding {
        rule_id: rule.to_string(),
        severity,
        message: format!("{} finding", rule),
        file: None,
        line: None,
    }
}

pub fn spec(name: &str, preds: &[&str], gate: GateClass, mutating: bool) -> StepSpec {
    StepSpec {
        name: name.to_string(),
        tool: name.to_string(),
        predecessors: preds.iter().map(|p| p.to_string()).collect(),
        gate,
        mutating,
        fail_on: Severity::High,
        timeout: Duration::from_secs(30),
    }
}

pub fn orchestrator(adapters: Vec<Arc<dyn ToolAdapter>>) -> Orchestrator {
    Orchestrator::new(
        Arc::new(AdapterSet::new(adapters)),
        Arc::new(ExecContext::from_config(&AgentConfig::default())),
        Arc::new(DeployLocks::new()),
        4,
        Duration::from_secs(5),
        1,
    )
}

pub fn request(kind: shipgate::core::PipelineKind) -> Request {
    Request::new("test-request", "Dockerfile", kind, "default")
}
