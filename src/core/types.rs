// src/core/types.rs — Core loop types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::simulation::metrics::IterationMetrics;

/// Phases of one loop iteration, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoopPhase {
    Generating,
    Simulating,
    Grading,
    Optimizing,
    ConvergenceCheck,
}

impl std::fmt::Display for LoopPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LoopPhase::Generating => "generating personas",
            LoopPhase::Simulating => "simulating",
            LoopPhase::Grading => "collecting feedback",
            LoopPhase::Optimizing => "optimizing configs",
            LoopPhase::ConvergenceCheck => "checking convergence",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Converged,
    /// Every observed satisfaction band met its target.
    TargetsMet,
    MaxIterationsReached,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::Converged => "converged",
            ExitReason::TargetsMet => "targets_met",
            ExitReason::MaxIterationsReached => "max_iterations_reached",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "converged" => Some(ExitReason::Converged),
            "targets_met" => Some(ExitReason::TargetsMet),
            "max_iterations_reached" => Some(ExitReason::MaxIterationsReached),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExitReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A module pinned to one of its config versions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionRef {
    pub module: String,
    pub version: u32,
}

/// Everything one iteration produced, persisted before the next starts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationRecord {
    pub run_id: String,
    /// 1-based.
    pub iteration: u32,
    pub target_criticality: u8,
    pub persona_ids: Vec<String>,
    pub personas_discarded: usize,
    pub simulation_ids: Vec<String>,
    pub feedback_ids: Vec<String>,
    pub metrics: IterationMetrics,
    /// Mean of the optimizer's per-module convergence scores, in [0, 1].
    pub convergence_score: f64,
    pub changes_proposed: usize,
    /// Versions in effect after this iteration's optimization.
    pub config_versions: Vec<VersionRef>,
    pub duration_ms: u64,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSummary {
    pub run_id: String,
    pub iterations_run: u32,
    /// True only if the convergence rule held after the last iteration.
    pub converged: bool,
    pub exit_reason: ExitReason,
    pub final_convergence_score: f64,
    pub final_mean_satisfaction: f64,
    pub final_versions: Vec<VersionRef>,
    pub total_duration_ms: u64,
    pub total_tokens: u64,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub records: Vec<IterationRecord>,
}

/// Emitted by the loop so front-ends can render progress.
#[derive(Debug, Clone)]
pub enum ProgressEvent {
    IterationStart {
        iteration: u32,
        max_iterations: u32,
        target_criticality: u8,
    },
    PhaseChanged {
        iteration: u32,
        phase: LoopPhase,
    },
    PersonaDiscarded {
        iteration: u32,
        name: String,
        reason: String,
    },
    SimulationFinished {
        iteration: u32,
        persona: String,
        success: bool,
        abort_reason: Option<String>,
    },
    VersionAppended {
        iteration: u32,
        module: String,
        version: u32,
    },
    IterationEnd {
        iteration: u32,
        mean_satisfaction: f64,
        convergence_score: f64,
        changes_proposed: usize,
    },
    Complete {
        iterations: u32,
        converged: bool,
        exit_reason: ExitReason,
    },
}
