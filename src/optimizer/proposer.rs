// src/optimizer/proposer.rs — Per-module revision proposals

use minijinja::context;
use std::sync::Arc;

use crate::core::budget::TimeBudget;
use crate::core::contracts::{ConfigProposal, CONFIG_PROPOSAL};
use crate::core::system_prompt::{render, OPTIMIZER_TEMPLATE};
use crate::evaluator::utils::clamp_unit;
use crate::infra::config::ModuleSeed;
use crate::infra::errors::EngineError;
use crate::memory::ConfigVersion;
use crate::provider::{ChatRequest, InferenceService, TokenUsage};
use crate::simulation::IterationMetrics;

/// Issues shown to the optimizer per module.
const MAX_ISSUES: usize = 8;

/// What the optimizer decided for one module.
#[derive(Debug, Clone)]
pub struct ModuleProposal {
    pub module: String,
    pub based_on_version: u32,
    /// New payload when a change was proposed.
    pub new_payload: Option<String>,
    pub changelog: String,
    /// In [0, 1]. 0.0 when no proposal could be obtained.
    pub convergence_score: f64,
    pub error: Option<String>,
}

impl ModuleProposal {
    fn unavailable(module: &str, version: u32, error: String) -> Self {
        Self {
            module: module.to_string(),
            based_on_version: version,
            new_payload: None,
            changelog: String::new(),
            convergence_score: 0.0,
            error: Some(error),
        }
    }

    pub fn wants_change(&self) -> bool {
        self.new_payload.is_some()
    }
}

pub struct Proposer {
    provider: Arc<dyn InferenceService>,
    budget: TimeBudget,
}

impl Proposer {
    pub fn new(provider: Arc<dyn InferenceService>, budget: TimeBudget) -> Self {
        Self { provider, budget }
    }

    /// Ask for a revision of one module. Never fails: an unavailable or
    /// malformed reply means "no change" with a convergence score of 0.
    pub async fn propose(
        &self,
        module: &ModuleSeed,
        current: &ConfigVersion,
        metrics: &IterationMetrics,
    ) -> (ModuleProposal, TokenUsage) {
        match self.request(module, current, metrics).await {
            Ok((proposal, usage)) => (interpret(module, current, proposal), usage),
            Err(e) => {
                tracing::warn!(module = %module.key, error = %e, "Optimizer proposal unavailable");
                (
                    ModuleProposal::unavailable(&module.key, current.version, e.to_string()),
                    TokenUsage::default(),
                )
            }
        }
    }

    async fn request(
        &self,
        module: &ModuleSeed,
        current: &ConfigVersion,
        metrics: &IterationMetrics,
    ) -> Result<(ConfigProposal, TokenUsage), EngineError> {
        let issues: Vec<&str> = metrics
            .top_issues
            .iter()
            .take(MAX_ISSUES)
            .map(|c| c.text.as_str())
            .collect();
        let suggestions: Vec<String> = metrics
            .suggestions_for(&module.key)
            .into_iter()
            .map(|s| format!("{} (x{}, priority {})", s.text, s.count, s.priority))
            .collect();
        let prompt = render(
            OPTIMIZER_TEMPLATE,
            context! {
                module => context! { key => &module.key, description => &module.description },
                version => current.version,
                payload => &current.payload,
                metrics => context! {
                    iteration => metrics.iteration,
                    mean_satisfaction => format!("{:.2}", metrics.mean_satisfaction),
                    success_rate => format!("{:.2}", metrics.success_rate),
                    recommend_rate => format!("{:.2}", metrics.recommend_rate),
                },
                module_rating => metrics.module_ratings.get(&module.key).map(|r| format!("{r:.1}")),
                issues => issues,
                suggestions => suggestions,
            },
        )?;
        let request = ChatRequest::new("You improve product prompts. Reply only with JSON.", prompt)
            .with_limits(3_000, 0.4);
        CONFIG_PROPOSAL
            .request(self.provider.as_ref(), request, self.budget)
            .await
    }
}

/// Normalize a raw proposal: a change needs a non-empty payload that
/// differs from the current one.
fn interpret(module: &ModuleSeed, current: &ConfigVersion, p: ConfigProposal) -> ModuleProposal {
    let new_payload = p
        .new_payload
        .map(|s| s.trim().to_string())
        .filter(|s| p.should_change && !s.is_empty() && *s != current.payload.trim());
    ModuleProposal {
        module: module.key.clone(),
        based_on_version: current.version,
        new_payload,
        changelog: p.changelog.trim().to_string(),
        convergence_score: clamp_unit(p.convergence_score),
        error: None,
    }
}
