//! Mutating steps serialize per deployment target

use async_trait::async_trait;
use shipgate::adapters::{AdapterSet, ExecContext, Invocation, ToolAdapter};
use shipgate::core::catalog::{GateClass, StepSpec};
use shipgate::core::step::{Severity, StepResult, StepStatus};
use shipgate::core::{AgentConfig, PipelineKind, PipelineRun, Request};
use shipgate::execution::{DeployLocks, Orchestrator};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Adapter that tracks how many invocations overlap in time.
struct OverlapProbe {
    active: Arc<AtomicUsize>,
    max_active: Arc<AtomicUsize>,
}

#[async_trait]
impl ToolAdapter for OverlapProbe {
    fn step_name(&self) -> &'static str {
        "sam-deploy"
    }

    async fn run(&self, _inv: Invocation<'_>) -> StepResult {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_active.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(300)).await;
        self.active.fetch_sub(1, Ordering::SeqCst);
        StepResult::new("sam-deploy", StepStatus::Success)
    }
}

fn deploy_spec() -> StepSpec {
    StepSpec {
        name: "sam-deploy".to_string(),
        tool: "sam".to_string(),
        predecessors: Vec::new(),
        gate: GateClass::Hard,
        mutating: true,
        fail_on: Severity::High,
        timeout: Duration::from_secs(30),
    }
}

fn shared_orchestrator(probe: Arc<OverlapProbe>, locks: Arc<DeployLocks>) -> Orchestrator {
    Orchestrator::new(
        Arc::new(AdapterSet::new(vec![probe])),
        Arc::new(ExecContext::from_config(&AgentConfig::default())),
        locks,
        4,
        Duration::from_secs(5),
        1,
    )
}

async fn run_deploy(orchestrator: &Orchestrator, environment: &str) {
    let mut run = PipelineRun::new(
        Uuid::new_v4(),
        PipelineKind::ScanAndDeploy,
        vec![deploy_spec()],
    )
    .unwrap();
    let request = Request::new(
        "deploy-test",
        "template.yaml",
        PipelineKind::ScanAndDeploy,
        environment,
    );
    orchestrator
        .execute(&mut run, &request, CancellationToken::new())
        .await;
    assert_eq!(
        run.result("sam-deploy").unwrap().status,
        StepStatus::Success
    );
}

#[tokio::test]
async fn same_environment_deploys_never_overlap() {
    let max_active = Arc::new(AtomicUsize::new(0));
    let probe = Arc::new(OverlapProbe {
        active: Arc::new(AtomicUsize::new(0)),
        max_active: max_active.clone(),
    });
    let locks = Arc::new(DeployLocks::new());

    let first = shared_orchestrator(probe.clone(), locks.clone());
    let second = shared_orchestrator(probe, locks);

    tokio::join!(
        run_deploy(&first, "staging"),
        run_deploy(&second, "staging"),
    );

    assert_eq!(max_active.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn different_environments_deploy_concurrently() {
    let max_active = Arc::new(AtomicUsize::new(0));
    let probe = Arc::new(OverlapProbe {
        active: Arc::new(AtomicUsize::new(0)),
        max_active: max_active.clone(),
    });
    let locks = Arc::new(DeployLocks::new());

    let first = shared_orchestrator(probe.clone(), locks.clone());
    let second = shared_orchestrator(probe, locks);

    tokio::join!(
        run_deploy(&first, "staging"),
        run_deploy(&second, "production"),
    );

    assert_eq!(max_active.load(Ordering::SeqCst), 2);
}
