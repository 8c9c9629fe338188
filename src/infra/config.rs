// src/infra/config.rs — Configuration loading (TOML)

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::core::budget::PriorityMode;
use crate::evaluator::Aggregation;
use crate::infra::paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub provider: ProviderConfig,

    #[serde(default, rename = "loop")]
    pub agent_loop: LoopSettings,

    #[serde(default)]
    pub budgets: BudgetsConfig,

    #[serde(default)]
    pub react: ReactConfig,

    #[serde(default)]
    pub grading: GradingConfig,

    #[serde(default)]
    pub personas: PersonaConfig,

    #[serde(default = "default_modules")]
    pub modules: Vec<ModuleSeed>,

    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::default(),
            agent_loop: LoopSettings::default(),
            budgets: BudgetsConfig::default(),
            react: ReactConfig::default(),
            grading: GradingConfig::default(),
            personas: PersonaConfig::default(),
            modules: default_modules(),
            retry: RetrySettings::default(),
        }
    }
}

/// Where the inference service lives. Passed explicitly into the service
/// constructor; nothing reads it globally.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    pub model: String,
    /// Name of the environment variable holding the API key.
    pub api_key_env: String,
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".into(),
            model: "gpt-4.1-mini".into(),
            api_key_env: "OPENAI_API_KEY".into(),
            request_timeout_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopSettings {
    pub max_iterations: u32,
    pub personas_per_iteration: usize,
    pub initial_criticality: u8,
    pub criticality_increment: u8,
    pub convergence_threshold: f64,
    /// Lower bar that still converges when the last iteration proposed no changes.
    pub stable_convergence_threshold: f64,
    /// Max personas simulated concurrently within one iteration.
    pub parallelism: usize,
    pub max_generation_attempts: u32,
    #[serde(default)]
    pub progressive: Option<ProgressiveConfig>,
}

impl Default for LoopSettings {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            personas_per_iteration: 5,
            initial_criticality: 3,
            criticality_increment: 1,
            convergence_threshold: 0.85,
            stable_convergence_threshold: 0.70,
            parallelism: 4,
            max_generation_attempts: 3,
            progressive: None,
        }
    }
}

/// Banded satisfaction targets: the loop stops once every band that saw a
/// persona meets its target in the same iteration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressiveConfig {
    pub bands: Vec<SatisfactionBand>,
}

impl Default for ProgressiveConfig {
    fn default() -> Self {
        Self {
            bands: vec![
                SatisfactionBand {
                    name: "lenient".into(),
                    min_criticality: 1,
                    max_criticality: 3,
                    target_satisfaction: 8.0,
                },
                SatisfactionBand {
                    name: "moderate".into(),
                    min_criticality: 4,
                    max_criticality: 6,
                    target_satisfaction: 7.0,
                },
                SatisfactionBand {
                    name: "critical".into(),
                    min_criticality: 7,
                    max_criticality: 10,
                    target_satisfaction: 6.0,
                },
            ],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SatisfactionBand {
    pub name: String,
    pub min_criticality: u8,
    pub max_criticality: u8,
    pub target_satisfaction: f64,
}

impl SatisfactionBand {
    pub fn contains(&self, criticality: u8) -> bool {
        (self.min_criticality..=self.max_criticality).contains(&criticality)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BudgetConfig {
    pub max_duration_ms: u64,
    #[serde(default)]
    pub priority_mode: PriorityMode,
    #[serde(default)]
    pub warning_threshold_ms: Option<u64>,
}

impl BudgetConfig {
    pub fn new(max_duration_ms: u64, priority_mode: PriorityMode) -> Self {
        Self {
            max_duration_ms,
            priority_mode,
            warning_threshold_ms: None,
        }
    }
}

/// Per-component time budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetsConfig {
    pub simulation: BudgetConfig,
    pub generation: BudgetConfig,
    pub feedback: BudgetConfig,
    pub optimization: BudgetConfig,
    pub judge: BudgetConfig,
    /// One `use_module` call made during a simulation.
    pub module: BudgetConfig,
}

impl Default for BudgetsConfig {
    fn default() -> Self {
        Self {
            simulation: BudgetConfig::new(90_000, PriorityMode::Quality),
            generation: BudgetConfig::new(45_000, PriorityMode::Balanced),
            feedback: BudgetConfig::new(30_000, PriorityMode::Balanced),
            optimization: BudgetConfig::new(60_000, PriorityMode::Quality),
            judge: BudgetConfig::new(20_000, PriorityMode::Speed),
            module: BudgetConfig::new(20_000, PriorityMode::Speed),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReactConfig {
    /// Expected wall-clock cost of one think/act round, used for step caps.
    pub avg_step_cost_ms: u64,
    /// Phrases in a thought that count as "done" without a final-answer marker.
    pub completion_phrases: Vec<String>,
    /// Injected once the budget is near timeout.
    pub final_directive: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Estimated cost of a module call, checked before the engine runs it.
    #[serde(default = "default_module_call_cost_ms")]
    pub module_call_cost_ms: u64,
}

fn default_module_call_cost_ms() -> u64 {
    6_000
}

impl Default for ReactConfig {
    fn default() -> Self {
        Self {
            avg_step_cost_ms: 8_000,
            completion_phrases: vec![
                "sufficient information".into(),
                "enough information".into(),
            ],
            final_directive: "[TIME CHECK] You are almost out of time. Respond now with \
                              `Final Answer:` followed by your answer. Do not call any more tools."
                .into(),
            max_tokens: 2048,
            temperature: 0.4,
            module_call_cost_ms: default_module_call_cost_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradingConfig {
    pub aggregation: Aggregation,
    #[serde(default)]
    pub weights: BTreeMap<String, f64>,
    /// Jaccard similarity above which a transcript or persona counts as a duplicate.
    pub similarity_threshold: f64,
    pub use_judge: bool,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            aggregation: Aggregation::Average,
            weights: BTreeMap::new(),
            similarity_threshold: 0.6,
            use_judge: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaConfig {
    pub min_years_experience: u32,
    pub max_years_experience: u32,
    pub excluded_role_keywords: Vec<String>,
    /// Replacement for an excluded keyword during repair. Keywords without an
    /// entry are removed.
    #[serde(default)]
    pub keyword_substitutions: BTreeMap<String, String>,
    pub seed_roles: Vec<String>,
    /// Minimum uniqueness score (from the similarity grader) for a new persona.
    pub min_uniqueness: f64,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        let mut keyword_substitutions = BTreeMap::new();
        keyword_substitutions.insert("chief".into(), "lead".into());
        keyword_substitutions.insert("vp".into(), "manager".into());
        keyword_substitutions.insert("director".into(), "manager".into());
        Self {
            min_years_experience: 0,
            max_years_experience: 15,
            excluded_role_keywords: vec!["chief".into(), "vp".into(), "director".into()],
            keyword_substitutions,
            seed_roles: vec![
                "software engineer".into(),
                "product manager".into(),
                "data analyst".into(),
                "ux designer".into(),
            ],
            min_uniqueness: 0.5,
        }
    }
}

/// A tunable module of the product and the prompt it starts from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ModuleSeed {
    pub key: String,
    #[serde(default)]
    pub description: String,
    pub initial_payload: String,
}

fn default_modules() -> Vec<ModuleSeed> {
    vec![
        ModuleSeed {
            key: "resume_builder".into(),
            description: "Rewrites resume sections for a target role".into(),
            initial_payload: "You help job seekers improve resume sections. Rewrite the \
                              provided section for the stated target role. Keep claims truthful \
                              and quantify impact where the input allows it."
                .into(),
        },
        ModuleSeed {
            key: "job_matcher".into(),
            description: "Scores how well a profile fits a job posting".into(),
            initial_payload: "You compare a candidate profile with a job posting. Report a fit \
                              score from 0 to 100, the strongest matches and the most important \
                              gaps."
                .into(),
        },
        ModuleSeed {
            key: "cover_letter".into(),
            description: "Drafts cover letters".into(),
            initial_payload: "You draft concise cover letters tailored to one job posting, \
                              using only facts from the candidate's profile."
                .into(),
        },
    ]
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    pub max_retries: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 1_000,
            max_delay_ms: 15_000,
        }
    }
}

impl Config {
    /// Load config from file, falling back to defaults.
    pub fn load() -> anyhow::Result<Self> {
        let path = paths::config_file_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let l = &self.agent_loop;
        if l.max_iterations == 0 {
            anyhow::bail!("loop.max_iterations must be at least 1");
        }
        if l.personas_per_iteration == 0 {
            anyhow::bail!("loop.personas_per_iteration must be at least 1");
        }
        if !(1..=10).contains(&l.initial_criticality) {
            anyhow::bail!("loop.initial_criticality must be within 1..=10");
        }
        if !(0.0..=1.0).contains(&l.convergence_threshold) {
            anyhow::bail!("loop.convergence_threshold must be within 0.0..=1.0");
        }
        if self.personas.min_years_experience > self.personas.max_years_experience {
            anyhow::bail!("personas.min_years_experience exceeds max_years_experience");
        }
        if self.modules.is_empty() {
            anyhow::bail!("at least one [[modules]] entry is required");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_reasonable() {
        let c = Config::default();
        assert_eq!(c.agent_loop.max_iterations, 5);
        assert_eq!(c.agent_loop.personas_per_iteration, 5);
        assert!((c.agent_loop.convergence_threshold - 0.85).abs() < 1e-9);
        assert!((c.agent_loop.stable_convergence_threshold - 0.70).abs() < 1e-9);
        assert!(c.agent_loop.progressive.is_none());
        assert_eq!(c.budgets.judge.priority_mode, PriorityMode::Speed);
        assert_eq!(c.modules.len(), 3);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn test_completion_phrases_default() {
        let r = ReactConfig::default();
        assert!(r
            .completion_phrases
            .iter()
            .any(|p| p == "sufficient information"));
        assert!(r.final_directive.contains("Final Answer:"));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.agent_loop.max_iterations, 5);
        assert_eq!(config.modules.len(), 3);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml_str = r#"
[provider]
base_url = "http://localhost:11434/v1"
model = "llama3"
api_key_env = "LOCAL_KEY"
request_timeout_secs = 30

[loop]
max_iterations = 8
personas_per_iteration = 3
initial_criticality = 2
criticality_increment = 2
convergence_threshold = 0.9
stable_convergence_threshold = 0.75
parallelism = 2
max_generation_attempts = 5

[[loop.progressive.bands]]
name = "all"
min_criticality = 1
max_criticality = 10
target_satisfaction = 7.5

[budgets.simulation]
max_duration_ms = 5000
priority_mode = "speed"

[budgets.generation]
max_duration_ms = 1000

[budgets.feedback]
max_duration_ms = 1000
warning_threshold_ms = 500

[budgets.optimization]
max_duration_ms = 1000
priority_mode = "quality"

[budgets.judge]
max_duration_ms = 1000

[grading]
aggregation = "min"
similarity_threshold = 0.5
use_judge = false

[personas]
min_years_experience = 1
max_years_experience = 8
excluded_role_keywords = ["principal"]
seed_roles = ["nurse"]
min_uniqueness = 0.4

[personas.keyword_substitutions]
principal = "senior"

[[modules]]
key = "resume_builder"
initial_payload = "Improve the resume."
"#;
        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.provider.model, "llama3");
        assert_eq!(config.agent_loop.max_iterations, 8);
        assert_eq!(config.agent_loop.criticality_increment, 2);
        let bands = &config.agent_loop.progressive.as_ref().unwrap().bands;
        assert_eq!(bands.len(), 1);
        assert!(bands[0].contains(10));
        assert_eq!(config.budgets.simulation.priority_mode, PriorityMode::Speed);
        assert_eq!(config.budgets.generation.priority_mode, PriorityMode::Balanced);
        assert_eq!(config.budgets.feedback.warning_threshold_ms, Some(500));
        assert_eq!(config.grading.aggregation, Aggregation::Min);
        assert!(!config.grading.use_judge);
        assert_eq!(config.personas.max_years_experience, 8);
        assert_eq!(
            config.personas.keyword_substitutions.get("principal"),
            Some(&"senior".to_string())
        );
        assert_eq!(config.modules.len(), 1);
        assert!(config.modules[0].description.is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut c = Config::default();
        c.agent_loop.max_iterations = 0;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.agent_loop.initial_criticality = 11;
        assert!(c.validate().is_err());

        let mut c = Config::default();
        c.modules.clear();
        assert!(c.validate().is_err());
    }

    #[test]
    fn test_progressive_default_bands_cover_range() {
        let p = ProgressiveConfig::default();
        for c in 1..=10u8 {
            assert_eq!(p.bands.iter().filter(|b| b.contains(c)).count(), 1);
        }
    }

    #[test]
    fn test_serialize_roundtrip() {
        let config = Config::default();
        let serialized = toml::to_string(&config).unwrap();
        let deserialized: Config = toml::from_str(&serialized).unwrap();
        assert_eq!(
            deserialized.agent_loop.max_iterations,
            config.agent_loop.max_iterations
        );
        assert_eq!(deserialized.modules, config.modules);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[loop]\nmax_iterations = 2\npersonas_per_iteration = 1\ninitial_criticality = 5\ncriticality_increment = 1\nconvergence_threshold = 0.8\nstable_convergence_threshold = 0.7\nparallelism = 1\nmax_generation_attempts = 1\n").unwrap();
        let config = Config::load_from(&path).unwrap();
        assert_eq!(config.agent_loop.max_iterations, 2);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let result = Config::load_from(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }
}
