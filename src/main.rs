use anyhow::{Context, Result};
use shipgate::adapters::{probe_tools, AdapterSet, ExecContext};
use shipgate::cli::commands::{CatalogCommand, DoctorCommand, RunCommand};
use shipgate::cli::output::*;
use shipgate::cli::{Cli, Command};
use shipgate::core::{AgentConfig, Catalog, PipelineKind, Verdict};
use shipgate::execution::{DeployLocks, ExecutionEvent, Orchestrator};
use shipgate::protocol::{stdio, RequestRouter, RunRequest};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::from_args();

    // Logs always go to stderr: in serve mode stdout is the protocol
    // channel, in run mode it is the report.
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let config = match &cli.config {
        Some(path) => {
            AgentConfig::from_file(path).with_context(|| format!("failed to load config {}", path))?
        }
        None => AgentConfig::default(),
    };

    match cli.command {
        Command::Serve => serve(&config).await.map(|_| ExitCode::SUCCESS),
        Command::Run(cmd) => run_pipeline(&cmd, &config).await,
        Command::Catalog(cmd) => {
            print_catalog(&cmd, &config)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Doctor(cmd) => doctor(&cmd, &config).await,
    }
}

fn build_router(config: &AgentConfig) -> RequestRouter {
    let orchestrator = Orchestrator::new(
        Arc::new(AdapterSet::builtin()),
        Arc::new(ExecContext::from_config(config)),
        Arc::new(DeployLocks::new()),
        config.max_parallel,
        Duration::from_secs(config.lock_wait_secs),
        config.timeout_retries,
    );
    RequestRouter::new(
        Catalog::from_config(config),
        orchestrator,
        config.environment.clone(),
    )
}

async fn serve(config: &AgentConfig) -> Result<()> {
    let ctx = ExecContext::from_config(config);
    for probe in probe_tools(&ctx).await {
        if !probe.available() {
            eprintln!("{}", format_probe(&probe));
        }
    }

    stdio::serve(Arc::new(build_router(config))).await
}

async fn run_pipeline(cmd: &RunCommand, config: &AgentConfig) -> Result<ExitCode> {
    let request = RunRequest {
        id: Uuid::new_v4().to_string(),
        target: cmd.target.clone(),
        kind: cmd.kind.clone(),
        enable: cmd.enable.clone(),
        disable: cmd.disable.clone(),
        timeout_secs: cmd.timeout_secs,
        environment: cmd.environment.clone(),
    };

    let orchestrator = Orchestrator::new(
        Arc::new(AdapterSet::builtin()),
        Arc::new(ExecContext::from_config(config)),
        Arc::new(DeployLocks::new()),
        config.max_parallel,
        Duration::from_secs(config.lock_wait_secs),
        config.timeout_retries,
    );

    // Stream step progress to stderr while the human report is pending.
    let mut progress = None;
    let orchestrator = if cmd.json {
        orchestrator
    } else {
        // Bar length comes from the graph the request will resolve to;
        // a kind or selection error surfaces from dispatch, so a bare
        // event stream is enough here.
        let bar = cmd
            .kind
            .parse::<PipelineKind>()
            .ok()
            .and_then(|kind| {
                Catalog::from_config(config)
                    .select(kind, &cmd.enable, &cmd.disable)
                    .ok()
            })
            .map(|specs| create_progress_bar(specs.len()));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let task_bar = bar.clone();
        let task = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let line = format_execution_event(&event);
                match &task_bar {
                    Some(bar) => {
                        if matches!(event, ExecutionEvent::StepFinished { .. }) {
                            bar.inc(1);
                        }
                        bar.println(line);
                    }
                    None => eprintln!("{}", line),
                }
            }
        });
        progress = Some((bar, task));
        orchestrator.with_events(tx)
    };

    let router = RequestRouter::new(
        Catalog::from_config(config),
        orchestrator,
        config.environment.clone(),
    );

    let outcome = router.dispatch(request, CancellationToken::new()).await;
    // The router owns the event sender; dropping it ends the stream.
    drop(router);
    if let Some((bar, task)) = progress {
        let _ = task.await;
        if let Some(bar) = bar {
            bar.finish_and_clear();
        }
    }
    let report = match outcome {
        Ok(report) => report,
        Err(err) => {
            eprintln!("{} {}", CROSS, style(err.to_string()).red());
            return Ok(ExitCode::from(2));
        }
    };

    if cmd.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("{}", format_report(&report));
    }

    Ok(match report.verdict {
        Verdict::Pass => ExitCode::SUCCESS,
        Verdict::Fail => ExitCode::from(1),
        Verdict::Blocked => ExitCode::from(2),
    })
}

fn print_catalog(cmd: &CatalogCommand, config: &AgentConfig) -> Result<()> {
    let catalog = Catalog::from_config(config);
    if cmd.json {
        let rows: Vec<serde_json::Value> = catalog
            .steps()
            .iter()
            .map(|spec| {
                serde_json::json!({
                    "step": spec.name,
                    "tool": spec.tool,
                    "predecessors": spec.predecessors,
                    "gate": spec.gate,
                    "mutating": spec.mutating,
                    "fail_on": spec.fail_on,
                    "timeout_secs": spec.timeout.as_secs(),
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for spec in catalog.steps() {
            println!("{}", format_catalog_entry(spec));
        }
    }
    Ok(())
}

async fn doctor(cmd: &DoctorCommand, config: &AgentConfig) -> Result<ExitCode> {
    let ctx = ExecContext::from_config(config);
    let probes = probe_tools(&ctx).await;

    if cmd.json {
        let rows: Vec<serde_json::Value> = probes
            .iter()
            .map(|probe| {
                serde_json::json!({
                    "tool": probe.tool,
                    "available": probe.available(),
                    "version": probe.version,
                })
            })
            .collect();
        println!("{}", serde_json::to_string_pretty(&rows)?);
    } else {
        for probe in &probes {
            println!("{}", format_probe(probe));
        }
    }

    if probes.iter().all(|p| p.available()) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}
