//! End-to-end orchestrator scenarios with scripted adapters

mod helpers;

use helpers::{finding, orchestrator, request, spec, PanickingAdapter, StubAdapter};
use shipgate::adapters::ToolAdapter;
use shipgate::core::catalog::GateClass;
use shipgate::core::report::aggregate;
use shipgate::core::step::{ErrorKind, Severity, StepStatus};
use shipgate::core::{AgentConfig, Catalog, GraphError, PipelineKind, PipelineRun, Verdict};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

fn catalog() -> Catalog {
    Catalog::from_config(&AgentConfig::default())
}

async fn run_pipeline(
    kind: PipelineKind,
    adapters: Vec<Arc<dyn ToolAdapter>>,
) -> shipgate::core::Report {
    let specs = catalog().select(kind, &[], &[]).unwrap();
    let mut run = PipelineRun::new(Uuid::new_v4(), kind, specs).unwrap();
    orchestrator(adapters)
        .execute(&mut run, &request(kind), CancellationToken::new())
        .await;
    aggregate(&run)
}

#[tokio::test]
async fn lint_failure_produces_ordered_findings() {
    let hadolint = Arc::new(StubAdapter::new("hadolint").with_findings(
        vec![
            finding("DL3025", Severity::High),
            finding("DL3008", Severity::Medium),
        ],
        StepStatus::Failure,
    ));
    let cfn_lint = Arc::new(
        StubAdapter::new("cfn-lint")
            .with_findings(vec![finding("W2001", Severity::Medium)], StepStatus::Warning),
    );

    let report = run_pipeline(PipelineKind::Lint, vec![hadolint, cfn_lint]).await;

    assert_eq!(report.verdict, Verdict::Fail);
    // Severity descending; ties follow execution order (cfn-lint sorts
    // before hadolint), then the tool's own output order.
    let order: Vec<&str> = report.findings.iter().map(|f| f.rule_id.as_str()).collect();
    assert_eq!(order, vec!["DL3025", "W2001", "DL3008"]);
}

#[tokio::test]
async fn hard_gate_failure_blocks_deploy() {
    let trivy = Arc::new(StubAdapter::new("trivy").with_findings(
        vec![finding("CVE-2024-0001", Severity::Critical)],
        StepStatus::Failure,
    ));
    let cfn_lint = Arc::new(StubAdapter::new("cfn-lint"));
    let checkov = Arc::new(StubAdapter::new("checkov"));
    let sam = Arc::new(StubAdapter::new("sam-deploy"));

    let report = run_pipeline(
        PipelineKind::ScanAndDeploy,
        vec![trivy, cfn_lint, checkov, sam.clone()],
    )
    .await;

    assert_eq!(report.verdict, Verdict::Blocked);
    assert_eq!(sam.calls(), 0);
    let deploy = report.steps.iter().find(|s| s.step == "sam-deploy").unwrap();
    assert_eq!(deploy.status, StepStatus::Skipped);
}

#[tokio::test]
async fn advisory_failure_does_not_block_deploy() {
    let trivy = Arc::new(StubAdapter::new("trivy"));
    let cfn_lint = Arc::new(StubAdapter::new("cfn-lint"));
    let checkov = Arc::new(StubAdapter::new("checkov").with_findings(
        vec![finding("CKV_AWS_20", Severity::High)],
        StepStatus::Failure,
    ));
    let sam = Arc::new(StubAdapter::new("sam-deploy"));

    let report = run_pipeline(
        PipelineKind::ScanAndDeploy,
        vec![trivy, cfn_lint, checkov, sam.clone()],
    )
    .await;

    // checkov is advisory: its failure taints the verdict but the
    // deploy still runs.
    assert_eq!(sam.calls(), 1);
    assert_eq!(report.verdict, Verdict::Fail);
    let deploy = report.steps.iter().find(|s| s.step == "sam-deploy").unwrap();
    assert_eq!(deploy.status, StepStatus::Success);
}

#[tokio::test]
async fn disabling_a_needed_predecessor_is_rejected() {
    let err = catalog()
        .select(PipelineKind::ScanAndDeploy, &[], &["trivy".to_string()])
        .unwrap_err();
    assert_eq!(
        err,
        GraphError::DisabledPredecessor {
            step: "sam-deploy".to_string(),
            predecessor: "trivy".to_string(),
        }
    );
}

#[tokio::test]
async fn timed_out_step_retries_once() {
    use shipgate::core::step::StepResult;

    let flaky = Arc::new(
        StubAdapter::new("flaky")
            .returning(StepResult::timed_out("flaky", 30))
            .with_status(StepStatus::Success),
    );

    let specs = vec![spec("flaky", &[], GateClass::Advisory, false)];
    let mut run = PipelineRun::new(Uuid::new_v4(), PipelineKind::Scan, specs).unwrap();
    orchestrator(vec![flaky.clone()])
        .execute(&mut run, &request(PipelineKind::Scan), CancellationToken::new())
        .await;

    assert_eq!(flaky.calls(), 2);
    assert_eq!(run.state, shipgate::core::RunState::Completed);
    let result = run.result("flaky").unwrap();
    assert_eq!(result.status, StepStatus::Success);
    assert_eq!(result.attempts, 2);
}

#[tokio::test]
async fn hard_gate_step_never_retries_a_timeout() {
    use shipgate::core::step::StepResult;

    let scan = Arc::new(
        StubAdapter::new("scan")
            .returning(StepResult::timed_out("scan", 30))
            .with_status(StepStatus::Success),
    );

    let specs = vec![spec("scan", &[], GateClass::Hard, false)];
    let mut run = PipelineRun::new(Uuid::new_v4(), PipelineKind::Scan, specs).unwrap();
    orchestrator(vec![scan.clone()])
        .execute(&mut run, &request(PipelineKind::Scan), CancellationToken::new())
        .await;

    assert_eq!(scan.calls(), 1);
    let result = run.result("scan").unwrap();
    assert_eq!(result.status, StepStatus::TimedOut);
    assert_eq!(result.attempts, 1);
}

#[tokio::test]
async fn panicking_step_settles_as_internal_error() {
    let boom = Arc::new(PanickingAdapter::new("boom"));
    let steady = Arc::new(
        StubAdapter::new("steady").with_delay(std::time::Duration::from_millis(200)),
    );

    let specs = vec![
        spec("boom", &[], GateClass::Hard, false),
        spec("steady", &[], GateClass::Hard, false),
    ];
    let mut run = PipelineRun::new(Uuid::new_v4(), PipelineKind::Scan, specs).unwrap();

    tokio::time::timeout(
        std::time::Duration::from_secs(5),
        orchestrator(vec![boom, steady.clone()]).execute(
            &mut run,
            &request(PipelineKind::Scan),
            CancellationToken::new(),
        ),
    )
    .await
    .expect("run must terminate");

    assert!(run.is_complete());
    let crashed = run.result("boom").unwrap();
    assert_eq!(crashed.status, StepStatus::Error);
    assert_eq!(crashed.error_kind, Some(ErrorKind::Internal));
    assert_eq!(run.result("steady").unwrap().status, StepStatus::Success);
    assert_eq!(steady.calls(), 1);
}

#[tokio::test]
async fn mutating_step_never_retries_a_timeout() {
    use shipgate::core::step::StepResult;

    let deploy = Arc::new(
        StubAdapter::new("deploy")
            .returning(StepResult::timed_out("deploy", 30))
            .with_status(StepStatus::Success),
    );

    let specs = vec![spec("deploy", &[], GateClass::Hard, true)];
    let mut run = PipelineRun::new(Uuid::new_v4(), PipelineKind::Full, specs).unwrap();
    orchestrator(vec![deploy.clone()])
        .execute(&mut run, &request(PipelineKind::Full), CancellationToken::new())
        .await;

    assert_eq!(deploy.calls(), 1);
    assert_eq!(run.result("deploy").unwrap().status, StepStatus::TimedOut);
}

#[tokio::test]
async fn cancellation_marks_pending_steps() {
    let slow = Arc::new(
        StubAdapter::new("slow").with_delay(std::time::Duration::from_millis(500)),
    );
    let after = Arc::new(StubAdapter::new("after"));

    let specs = vec![
        spec("slow", &[], GateClass::Hard, false),
        spec("after", &["slow"], GateClass::Hard, false),
    ];
    let mut run = PipelineRun::new(Uuid::new_v4(), PipelineKind::Scan, specs).unwrap();

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        trigger.cancel();
    });

    orchestrator(vec![slow, after.clone()])
        .execute(&mut run, &request(PipelineKind::Scan), cancel)
        .await;

    assert!(run.is_complete());
    assert_eq!(after.calls(), 0);
    let pending = run.result("after").unwrap();
    assert_eq!(pending.status, StepStatus::Error);
    assert_eq!(pending.error_kind, Some(ErrorKind::Cancelled));
}
