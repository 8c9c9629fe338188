// src/persona/validation.rs — Domain constraints and repair

use super::types::{Persona, PersonaConstraints};

#[derive(Debug, Clone, PartialEq)]
pub enum Violation {
    ExperienceOutOfRange { years: u32, min: u32, max: u32 },
    ExcludedRoleKeyword { keyword: String },
    CriticalityOutOfRange(u8),
    TrustOutOfRange(u8),
    MissingField(&'static str),
}

impl std::fmt::Display for Violation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Violation::ExperienceOutOfRange { years, min, max } => {
                write!(f, "{years} years of experience outside {min}..={max}")
            }
            Violation::ExcludedRoleKeyword { keyword } => {
                write!(f, "target role contains excluded keyword '{keyword}'")
            }
            Violation::CriticalityOutOfRange(c) => write!(f, "criticality {c} outside 1..=10"),
            Violation::TrustOutOfRange(t) => write!(f, "trust {t} outside 1..=10"),
            Violation::MissingField(field) => write!(f, "missing {field}"),
        }
    }
}

fn role_tokens(role: &str) -> impl Iterator<Item = String> + '_ {
    role.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(|t| t.to_lowercase())
}

/// Every constraint the persona breaks. Empty means valid.
pub fn validate(p: &Persona, c: &PersonaConstraints) -> Vec<Violation> {
    let mut out = Vec::new();
    if p.name.trim().is_empty() {
        out.push(Violation::MissingField("name"));
    }
    if p.target_role.trim().is_empty() {
        out.push(Violation::MissingField("target_role"));
    }
    if p.scenario.trim().is_empty() {
        out.push(Violation::MissingField("scenario"));
    }
    if p.years_of_experience < c.min_years || p.years_of_experience > c.max_years {
        out.push(Violation::ExperienceOutOfRange {
            years: p.years_of_experience,
            min: c.min_years,
            max: c.max_years,
        });
    }
    let tokens: Vec<String> = role_tokens(&p.target_role).collect();
    for keyword in &c.excluded_keywords {
        if tokens.iter().any(|t| t == keyword) {
            out.push(Violation::ExcludedRoleKeyword {
                keyword: keyword.clone(),
            });
        }
    }
    if !(1..=10).contains(&p.criticality) {
        out.push(Violation::CriticalityOutOfRange(p.criticality));
    }
    if !(1..=10).contains(&p.trust) {
        out.push(Violation::TrustOutOfRange(p.trust));
    }
    out
}

/// Fix what can be fixed: clamp numbers, substitute or drop excluded role
/// words, name anonymous personas. A missing role or scenario stays broken.
pub fn repair(mut p: Persona, c: &PersonaConstraints) -> Persona {
    p.years_of_experience = p.years_of_experience.clamp(c.min_years, c.max_years);
    p.criticality = p.criticality.clamp(1, 10);
    p.trust = p.trust.clamp(1, 10);

    let words: Vec<String> = p
        .target_role
        .split_whitespace()
        .filter_map(|word| {
            let key = word
                .trim_matches(|ch: char| !ch.is_alphanumeric())
                .to_lowercase();
            if !c.excluded_keywords.contains(&key) {
                return Some(word.to_string());
            }
            c.substitutions.get(&key).cloned()
        })
        .collect();
    p.target_role = words.join(" ");

    if p.name.trim().is_empty() && !p.target_role.is_empty() {
        p.name = format!("Anonymous {}", p.target_role);
    }
    p
}

/// Validate, repairing once if needed. Err carries what is still wrong.
pub fn validate_or_repair(p: Persona, c: &PersonaConstraints) -> Result<Persona, Vec<Violation>> {
    if validate(&p, c).is_empty() {
        return Ok(p);
    }
    let repaired = repair(p, c);
    let remaining = validate(&repaired, c);
    if remaining.is_empty() {
        Ok(repaired)
    } else {
        Err(remaining)
    }
}
