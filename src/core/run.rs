//! One execution instance of a step graph

use crate::core::catalog::{GateClass, GraphError, PipelineKind, StepSpec};
use crate::core::step::{StepResult, StepStatus};
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};
use tracing::warn;
use uuid::Uuid;

/// Run-level state machine.
///
/// Rejection (a graph error) happens in [`PipelineRun::new`] before a
/// run exists, so only accepted runs carry a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    BuildingGraph,
    Executing,
    Completed,
}

/// A pipeline run: the selected steps in topological order plus their
/// write-once result slots.
///
/// Construction validates the graph (duplicates, unknown predecessors,
/// cycles) before any tool is invoked.
#[derive(Debug)]
pub struct PipelineRun {
    pub id: Uuid,
    pub kind: PipelineKind,
    pub state: RunState,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,

    /// Selected steps, reordered to a topological order of the graph
    specs: Vec<StepSpec>,

    /// Terminal results, first write wins
    results: HashMap<String, StepResult>,
}

impl PipelineRun {
    /// Build the run from a selection, computing the execution order.
    pub fn new(id: Uuid, kind: PipelineKind, specs: Vec<StepSpec>) -> Result<Self, GraphError> {
        if specs.is_empty() {
            return Err(GraphError::EmptySelection);
        }

        let mut seen = HashSet::new();
        for spec in &specs {
            if !seen.insert(spec.name.as_str()) {
                return Err(GraphError::DuplicateStep(spec.name.clone()));
            }
        }
        for spec in &specs {
            for pred in &spec.predecessors {
                if !seen.contains(pred.as_str()) {
                    return Err(GraphError::UnknownPredecessor {
                        step: spec.name.clone(),
                        predecessor: pred.clone(),
                    });
                }
            }
        }

        let order = topological_sort(&specs)?;
        let by_name: HashMap<String, StepSpec> =
            specs.into_iter().map(|s| (s.name.clone(), s)).collect();
        let specs = order
            .iter()
            .map(|name| by_name[name].clone())
            .collect::<Vec<_>>();

        Ok(PipelineRun {
            id,
            kind,
            state: RunState::BuildingGraph,
            started_at: Utc::now(),
            finished_at: None,
            specs,
            results: HashMap::new(),
        })
    }

    pub fn start(&mut self) {
        self.state = RunState::Executing;
        self.started_at = Utc::now();
    }

    pub fn finish(&mut self) {
        self.state = RunState::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Steps in execution (topological) order.
    pub fn specs(&self) -> &[StepSpec] {
        &self.specs
    }

    pub fn spec(&self, name: &str) -> Option<&StepSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn result(&self, name: &str) -> Option<&StepResult> {
        self.results.get(name)
    }

    /// Record a terminal result. First write wins; a duplicate write is
    /// a scheduling bug and is dropped with a warning.
    pub fn record(&mut self, result: StepResult) {
        if self.results.contains_key(&result.step) {
            warn!(step = %result.step, "duplicate result dropped");
            return;
        }
        self.results.insert(result.step.clone(), result);
    }

    /// Names of steps with no recorded result yet.
    pub fn pending_steps(&self) -> Vec<String> {
        self.specs
            .iter()
            .filter(|s| !self.results.contains_key(&s.name))
            .map(|s| s.name.clone())
            .collect()
    }

    /// Steps whose predecessors are all terminal and which are neither
    /// recorded nor currently in flight.
    ///
    /// Call [`apply_gate_cascade`](Self::apply_gate_cascade) first so
    /// steps behind a failed hard gate are already marked skipped.
    pub fn ready_steps(&self, in_flight: &HashSet<String>) -> Vec<&StepSpec> {
        self.specs
            .iter()
            .filter(|spec| {
                !self.results.contains_key(&spec.name)
                    && !in_flight.contains(&spec.name)
                    && spec
                        .predecessors
                        .iter()
                        .all(|pred| self.results.contains_key(pred))
            })
            .collect()
    }

    /// Mark every pending step behind a failed hard gate (or a skipped
    /// predecessor) as skipped, to a fixpoint so the cascade is
    /// transitive.
    pub fn apply_gate_cascade(&mut self) {
        loop {
            let mut to_skip = Vec::new();
            for spec in &self.specs {
                if self.results.contains_key(&spec.name) {
                    continue;
                }
                for pred in &spec.predecessors {
                    let Some(result) = self.results.get(pred) else {
                        continue;
                    };
                    let pred_gate = self
                        .spec(pred)
                        .map(|s| s.gate)
                        .unwrap_or(GateClass::Hard);
                    let blocks = result.status == StepStatus::Skipped
                        || (pred_gate == GateClass::Hard && !result.status.is_gate_pass());
                    if blocks {
                        to_skip.push((spec.name.clone(), pred.clone()));
                        break;
                    }
                }
            }
            if to_skip.is_empty() {
                break;
            }
            for (name, pred) in to_skip {
                self.record(StepResult::skipped(name, &pred));
            }
        }
    }

    /// All steps terminal.
    pub fn is_complete(&self) -> bool {
        self.specs
            .iter()
            .all(|s| self.results.contains_key(&s.name))
    }

}

/// Depth-first topological sort over the selection.
///
/// Step names are visited in sorted order so the result is
/// deterministic for a given selection.
fn topological_sort(specs: &[StepSpec]) -> Result<Vec<String>, GraphError> {
    let by_name: HashMap<&str, &StepSpec> =
        specs.iter().map(|s| (s.name.as_str(), s)).collect();

    let mut names: Vec<&str> = specs.iter().map(|s| s.name.as_str()).collect();
    names.sort_unstable();

    let mut result = Vec::with_capacity(specs.len());
    let mut visited = HashSet::new();
    let mut on_stack = HashSet::new();

    fn visit<'a>(
        name: &'a str,
        by_name: &HashMap<&'a str, &'a StepSpec>,
        visited: &mut HashSet<&'a str>,
        on_stack: &mut HashSet<&'a str>,
        result: &mut Vec<String>,
    ) -> Result<(), GraphError> {
        if visited.contains(name) {
            return Ok(());
        }
        if !on_stack.insert(name) {
            return Err(GraphError::Cycle(name.to_string()));
        }
        if let Some(spec) = by_name.get(name) {
            let mut preds: Vec<&str> = spec.predecessors.iter().map(|p| p.as_str()).collect();
            preds.sort_unstable();
            for pred in preds {
                if on_stack.contains(pred) {
                    return Err(GraphError::Cycle(pred.to_string()));
                }
                visit(pred, by_name, visited, on_stack, result)?;
            }
        }
        on_stack.remove(name);
        visited.insert(name);
        result.push(name.to_string());
        Ok(())
    }

    for name in names {
        visit(name, &by_name, &mut visited, &mut on_stack, &mut result)?;
    }

    Ok(result)
}
