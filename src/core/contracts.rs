// src/core/contracts.rs — Named, versioned structured-output contracts
//
// Every place the engine asks a model for structured data goes through one
// of the contracts below. The schema travels with the request; the reply is
// decoded (fences stripped, JSON extracted, required keys checked) into the
// contract's Rust type. A failed decode is a MalformedResponse, never a panic.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::marker::PhantomData;

use crate::core::budget::TimeBudget;
use crate::infra::errors::EngineError;
use crate::provider::{ChatRequest, InferenceService, TokenUsage};

/// Untyped view of a contract, carried on the wire request.
#[derive(Debug, Clone, Copy)]
pub struct ContractSpec {
    pub name: &'static str,
    pub version: u32,
    pub schema: fn() -> Value,
}

impl ContractSpec {
    pub fn id(&self) -> String {
        format!("{}.v{}", self.name, self.version)
    }
}

/// A contract bound to the type its replies decode into.
pub struct Contract<T> {
    spec: ContractSpec,
    _output: PhantomData<fn() -> T>,
}

impl<T> Contract<T> {
    pub const fn new(name: &'static str, version: u32, schema: fn() -> Value) -> Self {
        Self {
            spec: ContractSpec {
                name,
                version,
                schema,
            },
            _output: PhantomData,
        }
    }

    pub fn spec(&self) -> ContractSpec {
        self.spec
    }

    pub fn name(&self) -> &'static str {
        self.spec.name
    }

    pub fn id(&self) -> String {
        self.spec.id()
    }
}

impl<T: DeserializeOwned> Contract<T> {
    /// Decode a raw model reply.
    pub fn decode(&self, text: &str) -> Result<T, EngineError> {
        let raw = extract_json(text)
            .ok_or_else(|| EngineError::malformed(self.id(), "no JSON object in reply"))?;
        let value: Value = serde_json::from_str(raw)
            .map_err(|e| EngineError::malformed(self.id(), format!("invalid JSON: {e}")))?;

        let schema = (self.spec.schema)();
        if let (Some(required), Some(obj)) = (schema["required"].as_array(), value.as_object()) {
            for key in required.iter().filter_map(|k| k.as_str()) {
                if !obj.contains_key(key) {
                    return Err(EngineError::malformed(
                        self.id(),
                        format!("missing required field '{key}'"),
                    ));
                }
            }
        }

        serde_json::from_value(value).map_err(|e| EngineError::malformed(self.id(), e.to_string()))
    }

    /// Send `request` with this contract attached, raced against `budget`,
    /// and decode the reply.
    pub async fn request(
        &self,
        service: &dyn InferenceService,
        request: ChatRequest,
        budget: TimeBudget,
    ) -> Result<(T, TokenUsage), EngineError> {
        let clock = budget.start();
        let request = request.with_contract(self.spec);
        let response = clock.with_timeout(service.chat(request), None).await??;
        let value = self.decode(&response.content)?;
        Ok((value, response.usage))
    }
}

/// Locate the JSON payload in a model reply: fenced block first, then the
/// outermost `{...}` or `[...]` span.
pub fn extract_json(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        let body_start = after.find('\n').map(|i| i + 1).unwrap_or(0);
        let body = &after[body_start..];
        if let Some(end) = body.find("```") {
            let inner = body[..end].trim();
            if inner.starts_with('{') || inner.starts_with('[') {
                return Some(inner);
            }
        }
    }

    let open = trimmed.find(['{', '['])?;
    let close_char = if trimmed[open..].starts_with('{') { '}' } else { ']' };
    let close = trimmed.rfind(close_char)?;
    if close < open {
        return None;
    }
    Some(&trimmed[open..=close])
}

// ─── Wire types ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersonaBatch {
    pub personas: Vec<PersonaDraft>,
}

/// A persona as a model proposes it. Numeric fields are signed and
/// optional so out-of-range values reach validation instead of failing
/// the whole batch.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PersonaDraft {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub target_role: String,
    #[serde(default)]
    pub industry: String,
    #[serde(default)]
    pub years_of_experience: i64,
    #[serde(default)]
    pub trust: Option<i64>,
    #[serde(default)]
    pub goals: Vec<String>,
    #[serde(default)]
    pub pain_points: Vec<String>,
    #[serde(default)]
    pub scenario: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackDraft {
    pub overall_satisfaction: f64,
    #[serde(default)]
    pub would_recommend: bool,
    #[serde(default)]
    pub module_ratings: BTreeMap<String, f64>,
    #[serde(default)]
    pub issues: Vec<String>,
    #[serde(default)]
    pub suggestions: Vec<SuggestionDraft>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuggestionDraft {
    #[serde(default)]
    pub module: String,
    pub text: String,
    #[serde(default = "default_priority")]
    pub priority: u8,
}

fn default_priority() -> u8 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigProposal {
    pub should_change: bool,
    #[serde(default)]
    pub new_payload: Option<String>,
    #[serde(default)]
    pub changelog: String,
    pub convergence_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JudgeVerdict {
    pub score: f64,
    #[serde(default)]
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulationOutcome {
    pub summary: String,
    pub goal_achieved: bool,
    #[serde(default)]
    pub abandoned: bool,
    #[serde(default)]
    pub modules_used: Vec<String>,
    #[serde(default)]
    pub friction_points: Vec<String>,
}

// ─── Contracts ──────────────────────────────────────────────────────

pub const PERSONA_BATCH: Contract<PersonaBatch> =
    Contract::new("persona_batch", 1, persona_batch_schema);
pub const FEEDBACK_REPORT: Contract<FeedbackDraft> =
    Contract::new("feedback_report", 1, feedback_report_schema);
pub const CONFIG_PROPOSAL: Contract<ConfigProposal> =
    Contract::new("config_proposal", 1, config_proposal_schema);
pub const JUDGE_VERDICT: Contract<JudgeVerdict> =
    Contract::new("judge_verdict", 1, judge_verdict_schema);
pub const SIMULATION_OUTCOME: Contract<SimulationOutcome> =
    Contract::new("simulation_outcome", 1, simulation_outcome_schema);

fn string_list() -> Value {
    json!({"type": "array", "items": {"type": "string"}})
}

fn persona_batch_schema() -> Value {
    json!({
        "type": "object",
        "required": ["personas"],
        "properties": {
            "personas": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["name", "target_role", "years_of_experience", "scenario"],
                    "properties": {
                        "name": {"type": "string"},
                        "target_role": {"type": "string"},
                        "industry": {"type": "string"},
                        "years_of_experience": {"type": "integer"},
                        "trust": {"type": "integer", "minimum": 1, "maximum": 10},
                        "goals": string_list(),
                        "pain_points": string_list(),
                        "scenario": {"type": "string"}
                    }
                }
            }
        }
    })
}

fn feedback_report_schema() -> Value {
    json!({
        "type": "object",
        "required": ["overall_satisfaction"],
        "properties": {
            "overall_satisfaction": {"type": "number", "minimum": 1, "maximum": 10},
            "would_recommend": {"type": "boolean"},
            "module_ratings": {"type": "object", "additionalProperties": {"type": "number"}},
            "issues": string_list(),
            "suggestions": {
                "type": "array",
                "items": {
                    "type": "object",
                    "required": ["text"],
                    "properties": {
                        "module": {"type": "string"},
                        "text": {"type": "string"},
                        "priority": {"type": "integer", "minimum": 1, "maximum": 5}
                    }
                }
            }
        }
    })
}

fn config_proposal_schema() -> Value {
    json!({
        "type": "object",
        "required": ["should_change", "convergence_score"],
        "properties": {
            "should_change": {"type": "boolean"},
            "new_payload": {"type": ["string", "null"]},
            "changelog": {"type": "string"},
            "convergence_score": {"type": "number", "minimum": 0, "maximum": 1}
        }
    })
}

fn judge_verdict_schema() -> Value {
    json!({
        "type": "object",
        "required": ["score"],
        "properties": {
            "score": {"type": "number", "minimum": 0, "maximum": 1},
            "feedback": {"type": "string"}
        }
    })
}

fn simulation_outcome_schema() -> Value {
    json!({
        "type": "object",
        "required": ["summary", "goal_achieved"],
        "properties": {
            "summary": {"type": "string"},
            "goal_achieved": {"type": "boolean"},
            "abandoned": {"type": "boolean"},
            "modules_used": string_list(),
            "friction_points": string_list()
        }
    })
}
