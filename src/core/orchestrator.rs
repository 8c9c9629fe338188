// src/core/orchestrator.rs — Iteration controller

use chrono::Utc;
use futures::future::join_all;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Instant;

use super::budget::TimeBudget;
use super::convergence::{has_converged, ConvergencePolicy};
use super::executor::{EngineSettings, ReactEngine};
use super::types::*;
use crate::evaluator::judge::JudgeGrader;
use crate::evaluator::rules::RuleGrader;
use crate::evaluator::similarity::SimilarityGrader;
use crate::evaluator::MultiGrader;
use crate::infra::config::{Config, LoopSettings, ModuleSeed, SatisfactionBand};
use crate::infra::errors::EngineError;
use crate::memory::store::Store;
use crate::memory::VersionStore;
use crate::optimizer::ConfigOptimizer;
use crate::persona::{target_criticality, Persona, PersonaGenerator};
use crate::provider::InferenceService;
use crate::simulation::metrics::{self, IterationMetrics};
use crate::simulation::task::SimulationTask;
use crate::simulation::tools::simulation_registry;
use crate::simulation::{FeedbackCollector, FeedbackReport, SimulationResult, Simulator};

/// Words a simulation transcript needs before the length rule is satisfied.
const MIN_TRANSCRIPT_WORDS: usize = 40;

/// Drives generate, simulate, grade, optimize until convergence, the
/// satisfaction targets, or the iteration cap.
pub struct AgentLoop {
    generator: PersonaGenerator,
    simulator: Simulator,
    feedback: FeedbackCollector,
    optimizer: ConfigOptimizer,
    versions: VersionStore,
    store: Arc<Mutex<Store>>,
    modules: Vec<ModuleSeed>,
    settings: LoopSettings,
    policy: ConvergencePolicy,
    /// Serialized config recorded with each run.
    config_json: String,
    on_progress: Option<Box<dyn Fn(ProgressEvent) + Send + Sync>>,
}

impl AgentLoop {
    pub fn new(provider: Arc<dyn InferenceService>, store: Arc<Mutex<Store>>, config: &Config) -> Self {
        let versions = VersionStore::new(store.clone());
        let module_keys: Vec<String> = config.modules.iter().map(|m| m.key.clone()).collect();

        let tools = simulation_registry(
            provider.clone(),
            versions.clone(),
            config.modules.clone(),
            TimeBudget::from(&config.budgets.module),
            config.react.module_call_cost_ms,
        );
        let engine = ReactEngine::new(
            provider.clone(),
            Arc::new(tools),
            EngineSettings::from_config(&config.react, &config.budgets.simulation),
        )
        .with_grader(Arc::new(build_grader(provider.clone(), config)));

        Self {
            generator: PersonaGenerator::new(provider.clone(), config),
            simulator: Simulator::new(Arc::new(engine), config.agent_loop.parallelism),
            feedback: FeedbackCollector::new(
                provider.clone(),
                TimeBudget::from(&config.budgets.feedback),
                module_keys,
            ),
            optimizer: ConfigOptimizer::new(
                provider,
                TimeBudget::from(&config.budgets.optimization),
                versions.clone(),
                config.modules.clone(),
            ),
            versions,
            store,
            modules: config.modules.clone(),
            settings: config.agent_loop.clone(),
            policy: ConvergencePolicy::from(&config.agent_loop),
            config_json: serde_json::to_string(config).unwrap_or_default(),
            on_progress: None,
        }
    }

    /// Set a callback for real-time progress events.
    pub fn with_progress(mut self, cb: impl Fn(ProgressEvent) + Send + Sync + 'static) -> Self {
        self.on_progress = Some(Box::new(cb));
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(ref cb) = self.on_progress {
            cb(event);
        }
    }

    fn store(&self) -> Result<MutexGuard<'_, Store>, EngineError> {
        self.store
            .lock()
            .map_err(|e| EngineError::StoreUnavailable(e.to_string()))
    }

    fn bands(&self) -> &[SatisfactionBand] {
        self.settings
            .progressive
            .as_ref()
            .map(|p| p.bands.as_slice())
            .unwrap_or(&[])
    }

    fn current_versions(&self) -> Result<Vec<VersionRef>, EngineError> {
        self.modules
            .iter()
            .map(|m| {
                self.versions.require_current(&m.key).map(|v| VersionRef {
                    module: v.module,
                    version: v.version,
                })
            })
            .collect()
    }

    /// Run the loop to completion. Inference failures degrade inside each
    /// phase; only store failures end the run early.
    pub async fn run(&self) -> Result<LoopSummary, EngineError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let started_at = Utc::now();
        let start = Instant::now();

        self.store()?.insert_run(&run_id, &self.config_json, started_at)?;
        self.versions.seed(&self.modules)?;
        tracing::info!(
            run_id = %run_id,
            max_iterations = self.settings.max_iterations,
            personas = self.settings.personas_per_iteration,
            "Agent loop started"
        );

        let mut records: Vec<IterationRecord> = Vec::new();
        let mut seen_personas: Vec<Persona> = Vec::new();
        let mut previous_transcripts: Vec<String> = Vec::new();
        let mut total_tokens: u64 = 0;
        let mut exit_reason = ExitReason::MaxIterationsReached;
        let mut converged = false;
        let mut last_satisfaction = 0.0;

        for iteration in 1..=self.settings.max_iterations {
            let iter_start = Instant::now();
            let iter_started_at = Utc::now();
            let criticality = target_criticality(
                self.settings.initial_criticality,
                self.settings.criticality_increment,
                iteration,
            );
            self.emit(ProgressEvent::IterationStart {
                iteration,
                max_iterations: self.settings.max_iterations,
                target_criticality: criticality,
            });

            // Generate
            self.emit(ProgressEvent::PhaseChanged {
                iteration,
                phase: LoopPhase::Generating,
            });
            let generated = self
                .generator
                .generate(
                    iteration,
                    criticality,
                    self.settings.personas_per_iteration,
                    &seen_personas,
                )
                .await;
            total_tokens += generated.usage.total() as u64;
            for d in &generated.discarded {
                self.emit(ProgressEvent::PersonaDiscarded {
                    iteration,
                    name: d.name.clone(),
                    reason: d.reasons.join("; "),
                });
            }
            for p in &generated.personas {
                self.store()?.insert_persona(&run_id, p)?;
            }
            let personas = generated.personas;

            // Simulate
            self.emit(ProgressEvent::PhaseChanged {
                iteration,
                phase: LoopPhase::Simulating,
            });
            let task = SimulationTask::new(self.modules.iter().map(|m| m.key.clone()).collect())
                .with_comparison_set(std::mem::take(&mut previous_transcripts));
            let sims = self
                .simulator
                .simulate_all(&run_id, iteration, &personas, &task)
                .await;
            for sim in &sims {
                total_tokens += sim.tokens;
                self.store()?.insert_simulation(sim)?;
                self.emit(ProgressEvent::SimulationFinished {
                    iteration,
                    persona: sim.persona_name.clone(),
                    success: sim.outcome.completed_successfully,
                    abort_reason: sim.abort_reason.clone(),
                });
            }

            // Feedback
            self.emit(ProgressEvent::PhaseChanged {
                iteration,
                phase: LoopPhase::Grading,
            });
            let reports = self.collect_feedback(&personas, &sims, &mut total_tokens).await;
            for r in &reports {
                self.store()?.insert_feedback(&run_id, r)?;
            }
            let metrics = metrics::aggregate(iteration, &personas, &sims, &reports, self.bands());

            // Optimize
            self.emit(ProgressEvent::PhaseChanged {
                iteration,
                phase: LoopPhase::Optimizing,
            });
            let optimization = self.optimizer.optimize(&run_id, iteration, &metrics).await?;
            total_tokens += optimization.usage.total() as u64;
            for v in &optimization.appended {
                self.emit(ProgressEvent::VersionAppended {
                    iteration,
                    module: v.module.clone(),
                    version: v.version,
                });
            }

            let record = IterationRecord {
                run_id: run_id.clone(),
                iteration,
                target_criticality: criticality,
                persona_ids: personas.iter().map(|p| p.id.clone()).collect(),
                personas_discarded: generated.discarded.len(),
                simulation_ids: sims.iter().map(|s| s.id.clone()).collect(),
                feedback_ids: reports.iter().map(|r| r.id.clone()).collect(),
                convergence_score: optimization.convergence_score,
                changes_proposed: optimization.changes(),
                config_versions: self.current_versions()?,
                duration_ms: iter_start.elapsed().as_millis() as u64,
                started_at: iter_started_at,
                metrics,
            };
            self.store()?.insert_iteration_record(&record)?;
            last_satisfaction = record.metrics.mean_satisfaction;
            self.emit(ProgressEvent::IterationEnd {
                iteration,
                mean_satisfaction: record.metrics.mean_satisfaction,
                convergence_score: record.convergence_score,
                changes_proposed: record.changes_proposed,
            });
            log_iteration(&record);
            let targets_met = self.settings.progressive.is_some() && record.metrics.targets_met();
            records.push(record);

            // Convergence
            self.emit(ProgressEvent::PhaseChanged {
                iteration,
                phase: LoopPhase::ConvergenceCheck,
            });
            converged = has_converged(&records, &self.policy);
            if converged {
                exit_reason = ExitReason::Converged;
                break;
            }
            if targets_met {
                exit_reason = ExitReason::TargetsMet;
                break;
            }

            previous_transcripts = sims.into_iter().map(|s| s.transcript).collect();
            seen_personas.extend(personas);
        }

        let final_versions = match records.last() {
            Some(r) => r.config_versions.clone(),
            None => self.current_versions()?,
        };
        let summary = LoopSummary {
            run_id,
            iterations_run: records.len() as u32,
            converged,
            exit_reason,
            final_convergence_score: records.last().map(|r| r.convergence_score).unwrap_or(0.0),
            final_mean_satisfaction: last_satisfaction,
            final_versions,
            total_duration_ms: start.elapsed().as_millis() as u64,
            total_tokens,
            started_at,
            finished_at: Utc::now(),
            records,
        };
        self.store()?.finish_run(&summary)?;

        tracing::info!(
            run_id = %summary.run_id,
            iterations = summary.iterations_run,
            exit_reason = %summary.exit_reason,
            tokens = summary.total_tokens,
            "Agent loop finished"
        );
        self.emit(ProgressEvent::Complete {
            iterations: summary.iterations_run,
            converged: summary.converged,
            exit_reason: summary.exit_reason,
        });
        Ok(summary)
    }

    /// One report per simulation, in simulation order. Collection itself
    /// never fails; unusable replies come back as degraded reports.
    async fn collect_feedback(
        &self,
        personas: &[Persona],
        sims: &[SimulationResult],
        total_tokens: &mut u64,
    ) -> Vec<FeedbackReport> {
        let results = join_all(
            personas
                .iter()
                .zip(sims)
                .map(|(p, s)| self.feedback.collect(p, s)),
        )
        .await;
        results
            .into_iter()
            .map(|(report, usage)| {
                *total_tokens += usage.total() as u64;
                report
            })
            .collect()
    }
}

fn build_grader(provider: Arc<dyn InferenceService>, config: &Config) -> MultiGrader {
    let grading = &config.grading;
    let mut grader = MultiGrader::new(grading.aggregation)
        .with_weights(grading.weights.clone())
        .with(Arc::new(RuleGrader::min_length(MIN_TRANSCRIPT_WORDS)))
        .with(Arc::new(RuleGrader::criteria_coverage()))
        .with(Arc::new(SimilarityGrader::new(grading.similarity_threshold)));
    if grading.use_judge {
        grader = grader.with(Arc::new(JudgeGrader::new(
            provider,
            TimeBudget::from(&config.budgets.judge),
        )));
    }
    grader
}

fn log_iteration(record: &IterationRecord) {
    let m: &IterationMetrics = &record.metrics;
    tracing::info!(
        iteration = record.iteration,
        criticality = record.target_criticality,
        simulations = m.simulations,
        satisfaction = m.mean_satisfaction,
        success_rate = m.success_rate,
        convergence = record.convergence_score,
        changes = record.changes_proposed,
        duration_ms = record.duration_ms,
        "Iteration complete"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::{ProgressiveConfig, SatisfactionBand};
    use crate::memory::MemoryManager;
    use crate::provider::{ChatRequest, ChatResponse};
    use async_trait::async_trait;

    /// Scripted service: answers each contract with a fixed reply and every
    /// ReAct turn with an immediate final answer.
    struct Scripted {
        satisfaction: f64,
        proposal: &'static str,
    }

    #[async_trait]
    impl InferenceService for Scripted {
        fn id(&self) -> &str {
            "scripted"
        }
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, EngineError> {
            let reply = match req.contract_name() {
                Some("persona_batch") => r#"{"personas": [
                    {"name": "Ana", "target_role": "data analyst", "industry": "retail", "years_of_experience": 3, "goals": ["resume"], "scenario": "Applying to analyst roles"},
                    {"name": "Ben", "target_role": "product manager", "industry": "fintech", "years_of_experience": 6, "goals": ["match"], "scenario": "Switching industries"}
                ]}"#
                .to_string(),
                Some("feedback_report") => format!(
                    r#"{{"overall_satisfaction": {}, "would_recommend": true, "issues": ["slow"], "suggestions": []}}"#,
                    self.satisfaction
                ),
                Some("config_proposal") => self.proposal.to_string(),
                Some(other) => panic!("unexpected contract {other}"),
                None => "Thought: done\nFinal Answer: {\"summary\": \"Built a resume\", \"goal_achieved\": true}"
                    .to_string(),
            };
            Ok(ChatResponse::text(reply))
        }
    }

    fn config(max_iterations: u32) -> Config {
        let mut config = Config::default();
        config.agent_loop.max_iterations = max_iterations;
        config.agent_loop.personas_per_iteration = 2;
        config.grading.use_judge = false;
        config
    }

    fn agent(service: Scripted, config: &Config) -> (AgentLoop, Arc<Mutex<Store>>) {
        let store = MemoryManager::in_memory().unwrap().into_shared();
        (AgentLoop::new(Arc::new(service), store.clone(), config), store)
    }

    // ─── Exit conditions ────────────────────────────────────────

    #[tokio::test]
    async fn test_converges_after_two_stable_iterations() {
        let (agent, store) = agent(
            Scripted {
                satisfaction: 8.0,
                proposal: r#"{"should_change": false, "convergence_score": 0.9}"#,
            },
            &config(5),
        );
        let summary = agent.run().await.unwrap();
        assert_eq!(summary.iterations_run, 2);
        assert!(summary.converged);
        assert_eq!(summary.exit_reason, ExitReason::Converged);

        let store = store.lock().unwrap();
        let records = store.list_iteration_records(&summary.run_id).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(store.list_simulations(&summary.run_id, None).unwrap().len(), 4);
        assert_eq!(store.list_feedback(&summary.run_id, Some(2)).unwrap().len(), 2);
        let row = store.run_summary(&summary.run_id).unwrap().unwrap();
        assert_eq!(row.exit_reason, ExitReason::Converged);
    }

    #[tokio::test]
    async fn test_max_iterations_reached() {
        let (agent, _) = agent(
            Scripted {
                satisfaction: 4.0,
                proposal: r#"{"should_change": false, "convergence_score": 0.2}"#,
            },
            &config(3),
        );
        let summary = agent.run().await.unwrap();
        assert_eq!(summary.iterations_run, 3);
        assert!(!summary.converged);
        assert_eq!(summary.exit_reason, ExitReason::MaxIterationsReached);
        assert_eq!(summary.final_mean_satisfaction, 4.0);
    }

    #[tokio::test]
    async fn test_progressive_targets_end_the_run() {
        let mut config = config(5);
        config.agent_loop.progressive = Some(ProgressiveConfig {
            bands: vec![SatisfactionBand {
                name: "all".into(),
                min_criticality: 1,
                max_criticality: 10,
                target_satisfaction: 7.0,
            }],
        });
        let (agent, _) = agent(
            Scripted {
                satisfaction: 8.0,
                proposal: r#"{"should_change": false, "convergence_score": 0.1}"#,
            },
            &config,
        );
        let summary = agent.run().await.unwrap();
        assert_eq!(summary.iterations_run, 1);
        assert_eq!(summary.exit_reason, ExitReason::TargetsMet);
        assert!(!summary.converged);
    }

    // ─── Versions and progress ──────────────────────────────────

    #[tokio::test]
    async fn test_changes_append_versions_and_emit_events() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = events.clone();
        let (agent, _) = agent(
            Scripted {
                satisfaction: 5.0,
                proposal: r#"{"should_change": true, "new_payload": "Quantify achievements.", "changelog": "metrics", "convergence_score": 0.5}"#,
            },
            &config(2),
        );
        let agent = agent.with_progress(move |e| sink.lock().unwrap().push(e));
        let summary = agent.run().await.unwrap();

        // Every module changes in iteration 1; iteration 2 proposes the same payload.
        let first = &summary.records[0];
        assert_eq!(first.changes_proposed, 3);
        assert!(first.config_versions.iter().all(|v| v.version == 2));
        assert_eq!(summary.records[1].changes_proposed, 0);

        let events = events.lock().unwrap();
        let appended = events
            .iter()
            .filter(|e| matches!(e, ProgressEvent::VersionAppended { .. }))
            .count();
        assert_eq!(appended, 3);
        assert!(matches!(events.first(), Some(ProgressEvent::IterationStart { iteration: 1, .. })));
        assert!(matches!(events.last(), Some(ProgressEvent::Complete { iterations: 2, .. })));
    }

    #[tokio::test]
    async fn test_criticality_rises_each_iteration() {
        let mut config = config(3);
        config.agent_loop.initial_criticality = 2;
        config.agent_loop.criticality_increment = 3;
        let (agent, _) = agent(
            Scripted {
                satisfaction: 5.0,
                proposal: r#"{"should_change": false, "convergence_score": 0.0}"#,
            },
            &config,
        );
        let summary = agent.run().await.unwrap();
        let levels: Vec<u8> = summary.records.iter().map(|r| r.target_criticality).collect();
        assert_eq!(levels, vec![2, 5, 8]);
    }
}
