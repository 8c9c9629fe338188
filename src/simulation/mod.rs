// src/simulation/mod.rs — Persona simulation, feedback and metrics

pub mod feedback;
pub mod metrics;
pub mod runner;
pub mod task;
pub mod tools;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::evaluator::GradeResult;

pub use feedback::{FeedbackCollector, FeedbackReport, Suggestion};
pub use metrics::IterationMetrics;
pub use runner::Simulator;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeFlags {
    /// The engine reached a final answer.
    pub completed_successfully: bool,
    pub goal_achieved: bool,
    pub abandoned: bool,
    /// Inference failed or the final answer was unusable.
    pub error_encountered: bool,
}

/// One persona's session against the current module configs. Immutable
/// once written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationResult {
    pub id: String,
    pub run_id: String,
    pub iteration: u32,
    pub persona_id: String,
    pub persona_name: String,
    pub criticality: u8,
    /// Rendered execution trace.
    pub transcript: String,
    pub summary: String,
    pub modules_used: Vec<String>,
    pub friction_points: Vec<String>,
    pub outcome: OutcomeFlags,
    pub abort_reason: Option<String>,
    pub grade: Option<GradeResult>,
    pub steps: u32,
    pub duration_ms: u64,
    pub tokens: u64,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}
