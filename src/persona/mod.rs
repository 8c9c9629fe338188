// src/persona/mod.rs — Synthetic users

pub mod generator;
pub mod types;
pub mod validation;

pub use generator::{target_criticality, GenerationOutcome, PersonaGenerator};
pub use types::{Persona, PersonaConstraints};
pub use validation::{validate, validate_or_repair, Violation};
