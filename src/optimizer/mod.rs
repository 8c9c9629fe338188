// src/optimizer/mod.rs — Configuration optimizer
//
// After each iteration every module gets a proposal. Accepted changes are
// appended to the versioned store; the mean of the per-module convergence
// scores becomes the iteration's convergence score.

pub mod proposer;

use futures::future::join_all;
use std::sync::Arc;

use crate::core::budget::TimeBudget;
use crate::evaluator::utils::compute_diff_ratio;
use crate::infra::config::ModuleSeed;
use crate::infra::errors::EngineError;
use crate::memory::{ConfigVersion, NewConfigVersion, VersionStore};
use crate::provider::{InferenceService, TokenUsage};
use crate::simulation::IterationMetrics;

pub use proposer::{ModuleProposal, Proposer};

#[derive(Debug, Clone, Default)]
pub struct OptimizationOutcome {
    pub proposals: Vec<ModuleProposal>,
    /// Versions actually written this iteration.
    pub appended: Vec<ConfigVersion>,
    /// Mean of the per-module scores, in [0, 1].
    pub convergence_score: f64,
    pub usage: TokenUsage,
}

impl OptimizationOutcome {
    pub fn changes(&self) -> usize {
        self.appended.len()
    }
}

pub struct ConfigOptimizer {
    proposer: Proposer,
    versions: VersionStore,
    modules: Vec<ModuleSeed>,
}

impl ConfigOptimizer {
    pub fn new(
        provider: Arc<dyn InferenceService>,
        budget: TimeBudget,
        versions: VersionStore,
        modules: Vec<ModuleSeed>,
    ) -> Self {
        Self {
            proposer: Proposer::new(provider, budget),
            versions,
            modules,
        }
    }

    /// Propose for every module concurrently, then append the changes.
    /// Only store failures are errors.
    pub async fn optimize(
        &self,
        run_id: &str,
        iteration: u32,
        metrics: &IterationMetrics,
    ) -> Result<OptimizationOutcome, EngineError> {
        let mut current = Vec::with_capacity(self.modules.len());
        for m in &self.modules {
            current.push(self.versions.require_current(&m.key)?);
        }

        let results = join_all(
            self.modules
                .iter()
                .zip(&current)
                .map(|(m, v)| self.proposer.propose(m, v, metrics)),
        )
        .await;

        let snapshot = serde_json::to_value(metrics).ok();
        let mut outcome = OptimizationOutcome::default();
        for ((proposal, usage), base) in results.into_iter().zip(&current) {
            outcome.usage.add(&usage);
            if let Some(payload) = &proposal.new_payload {
                let changelog = if proposal.changelog.is_empty() {
                    format!(
                        "revised {:.0}% of lines",
                        compute_diff_ratio(&base.payload, payload) * 100.0
                    )
                } else {
                    proposal.changelog.clone()
                };
                let new = NewConfigVersion {
                    module: proposal.module.clone(),
                    payload: payload.clone(),
                    changelog,
                    metrics_snapshot: snapshot.clone(),
                    convergence_score: Some(proposal.convergence_score),
                    run_id: Some(run_id.to_string()),
                    iteration,
                };
                if let Some(v) = self.versions.append(new)? {
                    outcome.appended.push(v);
                }
            }
            outcome.proposals.push(proposal);
        }

        outcome.convergence_score = if outcome.proposals.is_empty() {
            0.0
        } else {
            outcome.proposals.iter().map(|p| p.convergence_score).sum::<f64>()
                / outcome.proposals.len() as f64
        };
        tracing::info!(
            iteration,
            changes = outcome.changes(),
            convergence = outcome.convergence_score,
            "Optimization finished"
        );
        Ok(outcome)
    }
}
