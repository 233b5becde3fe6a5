//! Pipeline orchestrator: drives one run's step graph to completion

use crate::adapters::{AdapterSet, ExecContext, Invocation};
use crate::core::catalog::GateClass;
use crate::core::request::Request;
use crate::core::run::PipelineRun;
use crate::core::step::{ErrorKind, StepResult, StepStatus};
use crate::execution::locks::DeployLocks;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Progress notifications for interactive front-ends
#[derive(Debug, Clone)]
pub enum ExecutionEvent {
    StepStarted { step: String, attempt: u32 },
    StepFinished { step: String, status: StepStatus },
    StepRetrying { step: String, attempt: u32 },
}

/// Schedules a run's steps: advisory steps concurrently under the
/// worker-pool bound, mutating steps exclusively under the deployment
/// lock, hard-gate failures cascading as skips.
pub struct Orchestrator {
    adapters: Arc<AdapterSet>,
    ctx: Arc<ExecContext>,
    locks: Arc<DeployLocks>,
    max_parallel: usize,
    lock_wait: Duration,
    timeout_retries: u32,
    events: Option<mpsc::UnboundedSender<ExecutionEvent>>,
}

impl Orchestrator {
    pub fn new(
        adapters: Arc<AdapterSet>,
        ctx: Arc<ExecContext>,
        locks: Arc<DeployLocks>,
        max_parallel: usize,
        lock_wait: Duration,
        timeout_retries: u32,
    ) -> Self {
        Orchestrator {
            adapters,
            ctx,
            locks,
            max_parallel,
            lock_wait,
            timeout_retries,
            events: None,
        }
    }

    /// Attach a progress-event channel.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<ExecutionEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: ExecutionEvent) {
        if let Some(events) = &self.events {
            let _ = events.send(event);
        }
    }

    /// Drive the run until every step is terminal.
    ///
    /// Never fails: adapter-level problems land in step results, and a
    /// cancelled run still ends with every slot filled so a best-effort
    /// report can be produced.
    pub async fn execute(
        &self,
        run: &mut PipelineRun,
        request: &Request,
        cancel: CancellationToken,
    ) {
        run.start();
        info!(
            run = %run.id,
            kind = %run.kind,
            steps = run.specs().len(),
            environment = %request.environment,
            "run started"
        );

        let semaphore = Arc::new(Semaphore::new(self.max_parallel));
        let mut tasks: JoinSet<StepResult> = JoinSet::new();
        let mut in_flight: HashSet<String> = HashSet::new();
        let mut attempts: HashMap<String, u32> = HashMap::new();
        // Step name per spawned task, so a panicked task can still be
        // settled by name.
        let mut task_names: HashMap<tokio::task::Id, String> = HashMap::new();
        let mut mutating_active = false;

        loop {
            run.apply_gate_cascade();

            if cancel.is_cancelled() {
                self.drain_cancelled(run, &mut tasks, &mut in_flight).await;
                break;
            }

            if run.is_complete() && in_flight.is_empty() {
                break;
            }

            if !mutating_active {
                let ready: Vec<_> = run
                    .ready_steps(&in_flight)
                    .into_iter()
                    .cloned()
                    .collect();
                for spec in ready {
                    if spec.mutating {
                        // Exclusive barrier: a mutating step waits for
                        // every in-flight step to drain and blocks new
                        // scheduling until it finishes.
                        if in_flight.is_empty() {
                            let attempt = *attempts
                                .entry(spec.name.clone())
                                .and_modify(|a| *a += 1)
                                .or_insert(1);
                            self.emit(ExecutionEvent::StepStarted {
                                step: spec.name.clone(),
                                attempt,
                            });
                            let task = self.spawn_mutating(&mut tasks, &spec, request, &cancel);
                            task_names.insert(task, spec.name.clone());
                            in_flight.insert(spec.name.clone());
                            mutating_active = true;
                        }
                        break;
                    }

                    let Ok(permit) = semaphore.clone().try_acquire_owned() else {
                        break;
                    };
                    let attempt = *attempts
                        .entry(spec.name.clone())
                        .and_modify(|a| *a += 1)
                        .or_insert(1);
                    if attempt > 1 {
                        self.emit(ExecutionEvent::StepRetrying {
                            step: spec.name.clone(),
                            attempt,
                        });
                    }
                    self.emit(ExecutionEvent::StepStarted {
                        step: spec.name.clone(),
                        attempt,
                    });
                    let task = self.spawn_advisory(&mut tasks, &spec, request, &cancel, permit);
                    task_names.insert(task, spec.name.clone());
                    in_flight.insert(spec.name.clone());
                }
            }

            if in_flight.is_empty() {
                if run.is_complete() {
                    break;
                }
                // Unreachable with a valid graph; fail the remainder
                // rather than spin.
                error!(run = %run.id, "no runnable steps but run incomplete");
                for name in run.pending_steps() {
                    run.record(StepResult::error(
                        name,
                        ErrorKind::Internal,
                        "scheduler found no runnable steps",
                    ));
                }
                break;
            }

            tokio::select! {
                joined = tasks.join_next_with_id() => {
                    match joined {
                        Some(Ok((id, result))) => {
                            task_names.remove(&id);
                            self.settle(run, result, &mut in_flight, &mut mutating_active, &attempts);
                        }
                        Some(Err(err)) => {
                            error!(run = %run.id, error = %err, "step task failed");
                            if let Some(name) = task_names.remove(&err.id()) {
                                in_flight.remove(&name);
                                if run.spec(&name).map(|s| s.mutating).unwrap_or(false) {
                                    mutating_active = false;
                                }
                                if run.result(&name).is_none() {
                                    run.record(StepResult::error(
                                        name,
                                        ErrorKind::Internal,
                                        "step task panicked",
                                    ));
                                }
                            }
                        }
                        None => {
                            // No task left to produce these results;
                            // settle the orphans so the run terminates.
                            for name in in_flight.drain() {
                                if run.result(&name).is_none() {
                                    run.record(StepResult::error(
                                        name,
                                        ErrorKind::Internal,
                                        "step task vanished",
                                    ));
                                }
                            }
                            mutating_active = false;
                        }
                    }
                }
                _ = cancel.cancelled() => {}
            }
        }

        run.finish();
        info!(run = %run.id, "run finished");
    }

    /// Fold a completed task back into the run, retrying timed-out
    /// advisory steps up to the configured bound.
    fn settle(
        &self,
        run: &mut PipelineRun,
        mut result: StepResult,
        in_flight: &mut HashSet<String>,
        mutating_active: &mut bool,
        attempts: &HashMap<String, u32>,
    ) {
        in_flight.remove(&result.step);
        let spec = run.spec(&result.step);
        let mutating = spec.map(|s| s.mutating).unwrap_or(false);
        let advisory = spec.map(|s| s.gate == GateClass::Advisory).unwrap_or(false);
        if mutating {
            *mutating_active = false;
        }

        let attempt = attempts.get(&result.step).copied().unwrap_or(1);
        if result.status == StepStatus::TimedOut
            && advisory
            && !mutating
            && attempt <= self.timeout_retries
        {
            // Advisory read-only step, timed out: leave the slot empty
            // so the scheduler runs a fresh attempt. Hard-gate steps and
            // failures settle on the first attempt.
            warn!(step = %result.step, attempt, "timed out, will retry");
            return;
        }

        result.attempts = attempt;
        debug!(step = %result.step, status = %result.status, "step settled");
        self.emit(ExecutionEvent::StepFinished {
            step: result.step.clone(),
            status: result.status,
        });
        run.record(result);
    }

    fn spawn_advisory(
        &self,
        tasks: &mut JoinSet<StepResult>,
        spec: &crate::core::catalog::StepSpec,
        request: &Request,
        cancel: &CancellationToken,
        permit: tokio::sync::OwnedSemaphorePermit,
    ) -> tokio::task::Id {
        let Some(adapter) = self.adapters.get(&spec.name) else {
            let name = spec.name.clone();
            return tasks
                .spawn(async move {
                    StepResult::error(name, ErrorKind::Internal, "no adapter registered")
                })
                .id();
        };
        let spec = spec.clone();
        let target = request.target.clone();
        let ctx = self.ctx.clone();
        let timeout = request.step_timeout(spec.timeout);
        let cancel = cancel.clone();

        tasks
            .spawn(async move {
                let _permit = permit;
                adapter
                    .run(Invocation {
                        spec: &spec,
                        target: &target,
                        ctx: &ctx,
                        timeout,
                        cancel,
                    })
                    .await
            })
            .id()
    }

    fn spawn_mutating(
        &self,
        tasks: &mut JoinSet<StepResult>,
        spec: &crate::core::catalog::StepSpec,
        request: &Request,
        cancel: &CancellationToken,
    ) -> tokio::task::Id {
        let Some(adapter) = self.adapters.get(&spec.name) else {
            let name = spec.name.clone();
            return tasks
                .spawn(async move {
                    StepResult::error(name, ErrorKind::Internal, "no adapter registered")
                })
                .id();
        };
        let spec = spec.clone();
        let target = request.target.clone();
        let ctx = self.ctx.clone();
        let locks = self.locks.clone();
        let environment = request.environment.clone();
        let lock_wait = self.lock_wait;
        let timeout = request.step_timeout(spec.timeout);
        let cancel = cancel.clone();

        tasks
            .spawn(async move {
                let _guard = match locks.acquire(&environment, lock_wait).await {
                    Ok(guard) => guard,
                    Err(err) => {
                        return StepResult::error(
                            spec.name.clone(),
                            ErrorKind::ResourceContention,
                            err.to_string(),
                        );
                    }
                };
                if cancel.is_cancelled() {
                    return StepResult::error(
                        spec.name.clone(),
                        ErrorKind::Cancelled,
                        "run cancelled",
                    );
                }
                adapter
                    .run(Invocation {
                        spec: &spec,
                        target: &target,
                        ctx: &ctx,
                        timeout,
                        cancel,
                    })
                    .await
            })
            .id()
    }

    /// Cancellation: pending steps are recorded as cancelled errors,
    /// in-flight steps observe the token (their processes are killed)
    /// and settle with whatever they report.
    async fn drain_cancelled(
        &self,
        run: &mut PipelineRun,
        tasks: &mut JoinSet<StepResult>,
        in_flight: &mut HashSet<String>,
    ) {
        info!(run = %run.id, "cancelling run");
        for name in run.pending_steps() {
            if !in_flight.contains(&name) {
                run.record(StepResult::error(
                    name,
                    ErrorKind::Cancelled,
                    "run cancelled",
                ));
            }
        }
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    in_flight.remove(&result.step);
                    self.emit(ExecutionEvent::StepFinished {
                        step: result.step.clone(),
                        status: result.status,
                    });
                    run.record(result);
                }
                Err(err) => error!(error = %err, "step task failed during cancel"),
            }
        }
        for name in in_flight.drain() {
            if run.result(&name).is_none() {
                run.record(StepResult::error(
                    name,
                    ErrorKind::Cancelled,
                    "run cancelled",
                ));
            }
        }
    }
}
