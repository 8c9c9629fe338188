// src/persona/types.rs — Persona types

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::contracts::PersonaDraft;
use crate::infra::config::PersonaConfig;

/// Trust level assumed when a draft omits it.
const DEFAULT_TRUST: u8 = 5;

/// A synthetic user. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    pub id: String,
    /// Iteration that generated this persona (1-based).
    pub iteration: u32,
    pub name: String,
    pub target_role: String,
    pub industry: String,
    pub years_of_experience: u32,
    /// 1 (forgiving) ..= 10 (hardest to satisfy).
    pub criticality: u8,
    /// 1 ..= 10.
    pub trust: u8,
    pub goals: Vec<String>,
    pub pain_points: Vec<String>,
    pub scenario: String,
    pub created_at: DateTime<Utc>,
}

impl Persona {
    /// Convert a model draft. Numeric fields saturate into their storage
    /// types; range checks are left to validation.
    pub fn from_draft(draft: PersonaDraft, iteration: u32, criticality: u8) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            iteration,
            name: draft.name.trim().to_string(),
            target_role: draft.target_role.trim().to_string(),
            industry: draft.industry.trim().to_string(),
            years_of_experience: draft.years_of_experience.clamp(0, u32::MAX as i64) as u32,
            criticality,
            trust: draft
                .trust
                .map(|t| t.clamp(0, u8::MAX as i64) as u8)
                .unwrap_or(DEFAULT_TRUST),
            goals: draft.goals,
            pain_points: draft.pain_points,
            scenario: draft.scenario.trim().to_string(),
            created_at: Utc::now(),
        }
    }

    /// Short label for logs and prompts.
    pub fn label(&self) -> String {
        format!("{} ({}, {}y)", self.name, self.target_role, self.years_of_experience)
    }

    /// Text used for uniqueness comparison.
    pub fn profile_text(&self) -> String {
        format!(
            "{} {} {} {} {}",
            self.target_role,
            self.industry,
            self.goals.join(" "),
            self.pain_points.join(" "),
            self.scenario
        )
    }
}

/// Validation limits, resolved from config.
#[derive(Debug, Clone)]
pub struct PersonaConstraints {
    pub min_years: u32,
    pub max_years: u32,
    /// Lowercase keywords that may not appear in a target role.
    pub excluded_keywords: Vec<String>,
    pub substitutions: BTreeMap<String, String>,
}

impl From<&PersonaConfig> for PersonaConstraints {
    fn from(cfg: &PersonaConfig) -> Self {
        Self {
            min_years: cfg.min_years_experience,
            max_years: cfg.max_years_experience,
            excluded_keywords: cfg
                .excluded_role_keywords
                .iter()
                .map(|k| k.to_lowercase())
                .collect(),
            substitutions: cfg
                .keyword_substitutions
                .iter()
                .map(|(k, v)| (k.to_lowercase(), v.clone()))
                .collect(),
        }
    }
}
