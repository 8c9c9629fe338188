// src/cli/run.rs — `tuneloop run`: drive the optimization loop

use std::sync::Arc;

use super::progress::terminal_progress;
use crate::core::orchestrator::AgentLoop;
use crate::core::types::LoopSummary;
use crate::infra::config::Config;
use crate::provider::openai_compat::OpenAICompatService;
use crate::provider::retry::{RetryConfig, RetryService};
use crate::provider::InferenceService;

/// Command-line overrides applied on top of the loaded config.
#[derive(Debug, Clone, Default)]
pub struct RunOverrides {
    pub max_iterations: Option<u32>,
    pub personas: Option<usize>,
    pub threshold: Option<f64>,
}

impl RunOverrides {
    pub fn apply(&self, config: &mut Config) -> anyhow::Result<()> {
        if let Some(n) = self.max_iterations {
            config.agent_loop.max_iterations = n;
        }
        if let Some(n) = self.personas {
            config.agent_loop.personas_per_iteration = n;
        }
        if let Some(t) = self.threshold {
            config.agent_loop.convergence_threshold = t;
        }
        config.validate()
    }
}

pub async fn run_loop(
    mut config: Config,
    overrides: RunOverrides,
    db: Option<&str>,
    verbose: bool,
    quiet: bool,
) -> anyhow::Result<()> {
    overrides.apply(&mut config)?;

    let service = OpenAICompatService::from_config(&config.provider)?;
    let provider: Arc<dyn InferenceService> = Arc::new(RetryService::with_config(
        Arc::new(service),
        RetryConfig::from(&config.retry),
    ));
    tracing::info!(model = %config.provider.model, base_url = %config.provider.base_url, "Inference service ready");

    let store = super::open_store(db)?.into_shared();
    let mut agent = AgentLoop::new(provider, store, &config);
    if !quiet {
        agent = agent.with_progress(terminal_progress(verbose));
    }

    let summary = agent.run().await?;
    print_summary(&summary);
    Ok(())
}

fn print_summary(summary: &LoopSummary) {
    println!("Run {}", summary.run_id);
    println!(
        "  {} after {} iteration(s), converged: {}",
        summary.exit_reason,
        summary.iterations_run,
        if summary.converged { "yes" } else { "no" }
    );
    println!(
        "  convergence {:.2}, satisfaction {:.1}/10",
        summary.final_convergence_score, summary.final_mean_satisfaction
    );
    println!(
        "  {} tokens in {:.1}s",
        summary.total_tokens,
        summary.total_duration_ms as f64 / 1000.0
    );
    println!("  Versions:");
    for v in &summary.final_versions {
        println!("    {:<20} v{}", v.module, v.version);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_applied() {
        let mut config = Config::default();
        RunOverrides {
            max_iterations: Some(2),
            personas: Some(3),
            threshold: Some(0.9),
        }
        .apply(&mut config)
        .unwrap();
        assert_eq!(config.agent_loop.max_iterations, 2);
        assert_eq!(config.agent_loop.personas_per_iteration, 3);
        assert_eq!(config.agent_loop.convergence_threshold, 0.9);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let mut config = Config::default();
        let err = RunOverrides {
            max_iterations: Some(0),
            ..Default::default()
        }
        .apply(&mut config)
        .unwrap_err();
        assert!(err.to_string().contains("max_iterations"));
    }
}
