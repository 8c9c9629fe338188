// src/simulation/feedback.rs — In-character feedback after a simulation

use minijinja::context;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::SimulationResult;
use crate::core::budget::TimeBudget;
use crate::core::contracts::{FeedbackDraft, FEEDBACK_REPORT};
use crate::core::system_prompt::{render, FEEDBACK_TEMPLATE};
use crate::evaluator::utils::truncate_for_eval;
use crate::infra::errors::EngineError;
use crate::persona::Persona;
use crate::provider::{ChatRequest, InferenceService, TokenUsage};

/// Satisfaction used when no usable feedback comes back.
pub const FALLBACK_SATISFACTION: f64 = 5.0;

const MAX_TRANSCRIPT_CHARS: usize = 8_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Suggestion {
    /// None when the suggestion is not tied to a known module.
    pub module: Option<String>,
    pub text: String,
    /// 1 (most urgent) ..= 5.
    pub priority: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackReport {
    pub id: String,
    pub simulation_id: String,
    pub persona_id: String,
    pub iteration: u32,
    /// 1 ..= 10.
    pub overall_satisfaction: f64,
    pub would_recommend: bool,
    pub module_ratings: BTreeMap<String, f64>,
    pub issues: Vec<String>,
    pub suggestions: Vec<Suggestion>,
    /// The model's reply was unavailable and the neutral fallback was used.
    pub degraded: bool,
}

impl FeedbackReport {
    pub fn fallback(sim: &SimulationResult) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            simulation_id: sim.id.clone(),
            persona_id: sim.persona_id.clone(),
            iteration: sim.iteration,
            overall_satisfaction: FALLBACK_SATISFACTION,
            would_recommend: false,
            module_ratings: BTreeMap::new(),
            issues: Vec::new(),
            suggestions: Vec::new(),
            degraded: true,
        }
    }

    /// Clamp a draft into range and drop ratings for modules that do not exist.
    pub fn from_draft(draft: FeedbackDraft, sim: &SimulationResult, modules: &[String]) -> Self {
        let known = |m: &str| modules.iter().any(|k| k == m);
        let module_ratings = draft
            .module_ratings
            .into_iter()
            .filter(|(m, _)| known(m))
            .map(|(m, r)| (m, clamp_rating(r)))
            .collect();
        let suggestions = draft
            .suggestions
            .into_iter()
            .filter(|s| !s.text.trim().is_empty())
            .map(|s| Suggestion {
                module: Some(s.module.trim().to_string()).filter(|m| known(m)),
                text: s.text.trim().to_string(),
                priority: s.priority.clamp(1, 5),
            })
            .collect();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            simulation_id: sim.id.clone(),
            persona_id: sim.persona_id.clone(),
            iteration: sim.iteration,
            overall_satisfaction: clamp_rating(draft.overall_satisfaction),
            would_recommend: draft.would_recommend,
            module_ratings,
            issues: draft
                .issues
                .into_iter()
                .map(|i| i.trim().to_string())
                .filter(|i| !i.is_empty())
                .collect(),
            suggestions,
            degraded: false,
        }
    }
}

fn clamp_rating(value: f64) -> f64 {
    if value.is_nan() {
        FALLBACK_SATISFACTION
    } else {
        value.clamp(1.0, 10.0)
    }
}

/// Asks the persona, in character, how the session went.
pub struct FeedbackCollector {
    provider: Arc<dyn InferenceService>,
    budget: TimeBudget,
    modules: Vec<String>,
}

impl FeedbackCollector {
    pub fn new(provider: Arc<dyn InferenceService>, budget: TimeBudget, modules: Vec<String>) -> Self {
        Self {
            provider,
            budget,
            modules,
        }
    }

    /// Never fails: any inference, timeout or decode problem yields the
    /// fallback report.
    pub async fn collect(&self, persona: &Persona, sim: &SimulationResult) -> (FeedbackReport, TokenUsage) {
        match self.request(persona, sim).await {
            Ok((draft, usage)) => (FeedbackReport::from_draft(draft, sim, &self.modules), usage),
            Err(e) => {
                tracing::warn!(persona = %persona.name, simulation = %sim.id, error = %e, "Feedback unavailable, using fallback");
                (FeedbackReport::fallback(sim), TokenUsage::default())
            }
        }
    }

    async fn request(&self, persona: &Persona, sim: &SimulationResult) -> Result<(FeedbackDraft, TokenUsage), EngineError> {
        let prompt = render(
            FEEDBACK_TEMPLATE,
            context! {
                persona => persona,
                transcript => truncate_for_eval(&sim.transcript, MAX_TRANSCRIPT_CHARS),
                outcome => &sim.summary,
                abort_reason => &sim.abort_reason,
                modules => &self.modules,
            },
        )?;
        let request = ChatRequest::new(
            format!("You are {}. Answer only with JSON.", persona.name),
            prompt,
        )
        .with_limits(800, 0.3);
        FEEDBACK_REPORT
            .request(self.provider.as_ref(), request, self.budget)
            .await
    }
}
