// src/persona/generator.rs — Persona generation at a target criticality

use minijinja::context;
use serde_json::json;
use std::sync::Arc;

use super::types::{Persona, PersonaConstraints};
use super::validation::validate_or_repair;
use crate::core::budget::TimeBudget;
use crate::core::contracts::{PersonaBatch, PersonaDraft, PERSONA_BATCH};
use crate::core::system_prompt::{render, PERSONA_TEMPLATE};
use crate::evaluator::SimilarityGrader;
use crate::infra::config::{Config, ModuleSeed};
use crate::infra::errors::EngineError;
use crate::provider::{ChatRequest, InferenceService, TokenUsage};

/// Criticality for an iteration: `initial + (iteration - 1) * increment`,
/// capped at 10.
pub fn target_criticality(initial: u8, increment: u8, iteration: u32) -> u8 {
    let raised = initial as u64 + (iteration.saturating_sub(1) as u64) * increment as u64;
    raised.min(10) as u8
}

/// A candidate that was dropped, and why.
#[derive(Debug, Clone)]
pub struct Discard {
    pub name: String,
    pub reasons: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct GenerationOutcome {
    pub personas: Vec<Persona>,
    pub discarded: Vec<Discard>,
    pub attempts: u32,
    /// Some personas came from seed roles because generation fell short.
    pub fell_back: bool,
    pub usage: TokenUsage,
}

pub struct PersonaGenerator {
    provider: Arc<dyn InferenceService>,
    budget: TimeBudget,
    constraints: PersonaConstraints,
    uniqueness: SimilarityGrader,
    min_uniqueness: f64,
    seed_roles: Vec<String>,
    modules: Vec<ModuleSeed>,
    max_attempts: u32,
}

impl PersonaGenerator {
    pub fn new(provider: Arc<dyn InferenceService>, config: &Config) -> Self {
        Self {
            provider,
            budget: TimeBudget::from(&config.budgets.generation),
            constraints: PersonaConstraints::from(&config.personas),
            uniqueness: SimilarityGrader::new(config.grading.similarity_threshold),
            min_uniqueness: config.personas.min_uniqueness,
            seed_roles: config.personas.seed_roles.clone(),
            modules: config.modules.clone(),
            max_attempts: config.agent_loop.max_generation_attempts.max(1),
        }
    }

    pub fn constraints(&self) -> &PersonaConstraints {
        &self.constraints
    }

    /// Produce up to `count` valid, mutually distinct personas that also
    /// differ from `existing`. Invalid and duplicate candidates are dropped
    /// and reported, never counted.
    pub async fn generate(
        &self,
        iteration: u32,
        criticality: u8,
        count: usize,
        existing: &[Persona],
    ) -> GenerationOutcome {
        let mut out = GenerationOutcome::default();
        let mut comparison: Vec<String> = existing.iter().map(Persona::profile_text).collect();
        let mut labels: Vec<String> = existing.iter().map(Persona::label).collect();

        while out.personas.len() < count && out.attempts < self.max_attempts {
            out.attempts += 1;
            let needed = count - out.personas.len();
            let batch = match self.request(needed, criticality, &labels).await {
                Ok((batch, usage)) => {
                    out.usage.add(&usage);
                    batch
                }
                Err(e) => {
                    tracing::warn!(iteration, attempt = out.attempts, error = %e, "Persona generation failed");
                    continue;
                }
            };

            for draft in batch.personas {
                if out.personas.len() >= count {
                    break;
                }
                let candidate = Persona::from_draft(draft, iteration, criticality);
                let name = candidate.name.clone();
                let persona = match validate_or_repair(candidate, &self.constraints) {
                    Ok(p) => p,
                    Err(violations) => {
                        tracing::warn!(iteration, persona = %name, ?violations, "Discarding invalid persona");
                        out.discarded.push(Discard {
                            name,
                            reasons: violations.iter().map(ToString::to_string).collect(),
                        });
                        continue;
                    }
                };
                let profile = persona.profile_text();
                let score = self.uniqueness.score(&profile, &comparison);
                if score < self.min_uniqueness {
                    tracing::debug!(iteration, persona = %persona.name, score, "Discarding near-duplicate persona");
                    out.discarded.push(Discard {
                        name: persona.name,
                        reasons: vec![format!("near-duplicate (uniqueness {score:.2})")],
                    });
                    continue;
                }
                comparison.push(profile);
                labels.push(persona.label());
                out.personas.push(persona);
            }
        }

        if out.personas.len() < count {
            let fallback = self.seed_personas(iteration, criticality, count - out.personas.len());
            if !fallback.is_empty() {
                tracing::info!(iteration, added = fallback.len(), "Filled persona shortfall from seed roles");
                out.fell_back = true;
                out.personas.extend(fallback);
            }
        }
        out
    }

    async fn request(
        &self,
        count: usize,
        criticality: u8,
        existing: &[String],
    ) -> Result<(PersonaBatch, TokenUsage), EngineError> {
        let modules: Vec<_> = self
            .modules
            .iter()
            .map(|m| json!({"key": m.key, "description": m.description}))
            .collect();
        let prompt = render(
            PERSONA_TEMPLATE,
            context! {
                count => count,
                criticality => criticality,
                min_years => self.constraints.min_years,
                max_years => self.constraints.max_years,
                excluded => &self.constraints.excluded_keywords,
                modules => modules,
                existing => existing,
            },
        )?;
        let request = ChatRequest::new("You design realistic test users. Reply only with JSON.", prompt)
            .with_limits(2_000, 0.9);
        PERSONA_BATCH
            .request(self.provider.as_ref(), request, self.budget)
            .await
    }

    /// Deterministic personas built from the configured seed roles.
    fn seed_personas(&self, iteration: u32, criticality: u8, count: usize) -> Vec<Persona> {
        if self.seed_roles.is_empty() {
            return Vec::new();
        }
        let years = (self.constraints.min_years + self.constraints.max_years) / 2;
        (0..count)
            .filter_map(|i| {
                let role = &self.seed_roles[(iteration as usize + i) % self.seed_roles.len()];
                let draft = PersonaDraft {
                    name: format!("Seed {role} {iteration}.{}", i + 1),
                    target_role: role.clone(),
                    years_of_experience: years as i64,
                    goals: vec![format!("land a {role} role")],
                    scenario: format!("Preparing applications for {role} openings"),
                    ..Default::default()
                };
                validate_or_repair(Persona::from_draft(draft, iteration, criticality), &self.constraints).ok()
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ChatResponse;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Returns one scripted batch per call, then errors.
    struct Batches(Mutex<Vec<String>>);

    #[async_trait]
    impl InferenceService for Batches {
        fn id(&self) -> &str {
            "batches"
        }
        async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, EngineError> {
            assert_eq!(req.contract_name(), Some("persona_batch"));
            let mut replies = self.0.lock().unwrap();
            if replies.is_empty() {
                return Err(EngineError::malformed("persona_batch.v1", "exhausted"));
            }
            Ok(ChatResponse::text(replies.remove(0)))
        }
    }

    fn generator(replies: Vec<String>, config: &Config) -> PersonaGenerator {
        PersonaGenerator::new(Arc::new(Batches(Mutex::new(replies))), config)
    }

    fn batch(personas: &[&str]) -> String {
        format!(r#"{{"personas": [{}]}}"#, personas.join(", "))
    }

    const ANA: &str = r#"{"name": "Ana", "target_role": "data analyst", "industry": "retail", "years_of_experience": 3, "goals": ["switch to tech"], "scenario": "Tailoring her resume for analyst roles at startups"}"#;
    const BEN: &str = r#"{"name": "Ben", "target_role": "registered nurse", "industry": "healthcare", "years_of_experience": 20, "goals": ["move into clinical informatics"], "scenario": "Needs a cover letter for a hospital IT position"}"#;

    // ─── Criticality schedule ───────────────────────────────────

    #[test]
    fn test_target_criticality_schedule() {
        assert_eq!(target_criticality(3, 1, 1), 3);
        assert_eq!(target_criticality(3, 1, 4), 6);
        assert_eq!(target_criticality(3, 2, 10), 10);
        assert_eq!(target_criticality(10, 1, 1), 10);
        assert_eq!(target_criticality(5, 0, 9), 5);
    }

    // ─── Generation ─────────────────────────────────────────────

    #[tokio::test]
    async fn test_generates_and_repairs() {
        let config = Config::default();
        let g = generator(vec![batch(&[ANA, BEN])], &config);
        let out = g.generate(2, 4, 2, &[]).await;
        assert_eq!(out.personas.len(), 2);
        assert_eq!(out.attempts, 1);
        assert!(!out.fell_back);
        assert!(out.personas.iter().all(|p| p.criticality == 4 && p.iteration == 2));
        // Ben's 20 years clamped to the default max of 15
        assert_eq!(out.personas[1].years_of_experience, 15);
    }

    #[tokio::test]
    async fn test_duplicates_discarded() {
        let config = Config::default();
        let g = generator(vec![batch(&[ANA, ANA])], &config);
        let out = g.generate(1, 3, 2, &[]).await;
        assert_eq!(out.discarded.len(), 1);
        assert!(out.discarded[0].reasons[0].contains("near-duplicate"));
        // the shortfall is filled from seed roles
        assert_eq!(out.personas.len(), 2);
        assert!(out.fell_back);
    }

    #[tokio::test]
    async fn test_unrepairable_discarded_and_retried() {
        let mut config = Config::default();
        config.personas.seed_roles.clear();
        let g = generator(
            vec![
                batch(&[r#"{"name": "Nobody", "target_role": "tester"}"#]),
                batch(&[ANA]),
            ],
            &config,
        );
        let out = g.generate(1, 3, 1, &[]).await;
        assert_eq!(out.attempts, 2);
        assert_eq!(out.personas.len(), 1);
        assert_eq!(out.discarded[0].name, "Nobody");
        assert!(out.discarded[0].reasons.iter().any(|r| r.contains("scenario")));
    }

    #[tokio::test]
    async fn test_existing_personas_block_duplicates() {
        let config = Config::default();
        let first = generator(vec![batch(&[ANA])], &config)
            .generate(1, 3, 1, &[])
            .await;
        let mut config = config;
        config.personas.seed_roles.clear();
        let second = generator(vec![batch(&[ANA])], &config)
            .generate(2, 4, 1, &first.personas)
            .await;
        assert!(second.personas.is_empty());
        assert_eq!(second.discarded.len(), 1);
    }

    #[tokio::test]
    async fn test_total_failure_uses_seed_roles() {
        let config = Config::default();
        let g = generator(vec![], &config);
        let out = g.generate(1, 7, 3, &[]).await;
        assert_eq!(out.attempts, config.agent_loop.max_generation_attempts);
        assert_eq!(out.personas.len(), 3);
        assert!(out.fell_back);
        assert!(out.personas.iter().all(|p| p.criticality == 7));
        let roles: Vec<&str> = out.personas.iter().map(|p| p.target_role.as_str()).collect();
        assert_eq!(roles, vec!["product manager", "data analyst", "ux designer"]);
    }
}
