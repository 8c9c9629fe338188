// src/simulation/runner.rs — Runs personas through the ReAct engine

use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;

use super::metrics::normalize_text;
use super::task::SimulationTask;
use super::tools::{reported_issue, REPORT_ISSUE, USE_MODULE};
use super::{OutcomeFlags, SimulationResult};
use crate::core::executor::{AbortReason, ExecutionResult, ReactEngine};
use crate::core::contracts::SimulationOutcome;
use crate::persona::Persona;

pub struct Simulator {
    engine: Arc<ReactEngine>,
    parallelism: usize,
}

impl Simulator {
    pub fn new(engine: Arc<ReactEngine>, parallelism: usize) -> Self {
        Self {
            engine,
            parallelism: parallelism.max(1),
        }
    }

    /// One persona, one session. Never fails: an aborted execution becomes
    /// a result with `completed_successfully: false`.
    pub async fn simulate(
        &self,
        run_id: &str,
        iteration: u32,
        persona: &Persona,
        task: &SimulationTask,
    ) -> SimulationResult {
        let result = self.engine.execute(task, persona).await;
        let sim = to_simulation_result(run_id, iteration, persona, result);
        tracing::info!(
            iteration,
            persona = %persona.name,
            success = sim.outcome.completed_successfully,
            steps = sim.steps,
            duration_ms = sim.duration_ms,
            abort_reason = sim.abort_reason.as_deref().unwrap_or("-"),
            "Simulation finished"
        );
        sim
    }

    /// Simulate every persona with bounded concurrency. Results come back in
    /// persona order.
    pub async fn simulate_all(
        &self,
        run_id: &str,
        iteration: u32,
        personas: &[Persona],
        task: &SimulationTask,
    ) -> Vec<SimulationResult> {
        let mut done: Vec<(usize, SimulationResult)> = stream::iter(personas.iter().enumerate())
            .map(|(i, p)| async move { (i, self.simulate(run_id, iteration, p, task).await) })
            .buffer_unordered(self.parallelism)
            .collect()
            .await;
        done.sort_by_key(|(i, _)| *i);
        done.into_iter().map(|(_, sim)| sim).collect()
    }
}

fn push_unique(out: &mut Vec<String>, seen: &mut HashSet<String>, text: &str) {
    let text = text.trim();
    if !text.is_empty() && seen.insert(normalize_text(text)) {
        out.push(text.to_string());
    }
}

pub fn to_simulation_result(
    run_id: &str,
    iteration: u32,
    persona: &Persona,
    result: ExecutionResult<SimulationOutcome>,
) -> SimulationResult {
    let mut modules_used = Vec::new();
    let mut module_seen = HashSet::new();
    let mut friction_points = Vec::new();
    let mut friction_seen = HashSet::new();

    for action in result.trace.steps().iter().filter_map(|s| s.action.as_ref()) {
        match action.tool.as_str() {
            USE_MODULE => {
                if let Some(m) = action.params["module"].as_str() {
                    push_unique(&mut modules_used, &mut module_seen, m);
                }
            }
            REPORT_ISSUE => {
                if let Some(issue) = reported_issue(&action.params) {
                    push_unique(&mut friction_points, &mut friction_seen, issue);
                }
            }
            _ => {}
        }
    }

    let mut transcript = result.trace.render();
    if let Some(answer) = &result.raw_final {
        transcript.push_str(&format!("Final Answer: {}\n", answer.trim()));
    }

    let (summary, goal_achieved, abandoned) = match result.output() {
        Some(out) => {
            for m in &out.modules_used {
                push_unique(&mut modules_used, &mut module_seen, m);
            }
            for f in &out.friction_points {
                push_unique(&mut friction_points, &mut friction_seen, f);
            }
            (out.summary.clone(), out.goal_achieved, out.abandoned)
        }
        None => (String::new(), false, false),
    };

    let abort = result.abort_reason();
    let error_encountered = matches!(
        abort,
        Some(AbortReason::Inference { .. } | AbortReason::UnparsableAnswer { .. })
    );

    SimulationResult {
        id: uuid::Uuid::new_v4().to_string(),
        run_id: run_id.to_string(),
        iteration,
        persona_id: persona.id.clone(),
        persona_name: persona.name.clone(),
        criticality: persona.criticality,
        summary: if summary.is_empty() {
            abort.map(ToString::to_string).unwrap_or_default()
        } else {
            summary
        },
        transcript,
        modules_used,
        friction_points,
        outcome: OutcomeFlags {
            completed_successfully: result.success(),
            goal_achieved,
            abandoned,
            error_encountered,
        },
        abort_reason: abort.map(ToString::to_string),
        steps: result.trace.len() as u32,
        duration_ms: result.elapsed_ms,
        tokens: result.usage.total() as u64,
        grade: result.grade,
        created_at: Utc::now(),
    }
}
