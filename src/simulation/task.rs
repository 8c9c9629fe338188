// src/simulation/task.rs — A persona session as a ReAct task

use minijinja::context;

use crate::core::contracts::{SimulationOutcome, SIMULATION_OUTCOME};
use crate::core::executor::ReactTask;
use crate::core::system_prompt::{render, SIMULATION_ANSWER_FORMAT, SIMULATION_FRAMING_TEMPLATE};
use crate::core::trace::ExecutionTrace;
use crate::evaluator::GradeContext;
use crate::persona::Persona;

/// One iteration's simulation task. The comparison set holds the previous
/// iteration's transcripts so the similarity grader can flag sessions that
/// merely replay them.
#[derive(Debug, Clone, Default)]
pub struct SimulationTask {
    modules: Vec<String>,
    comparison_set: Vec<String>,
}

impl SimulationTask {
    pub fn new(modules: Vec<String>) -> Self {
        Self {
            modules,
            comparison_set: Vec::new(),
        }
    }

    pub fn with_comparison_set(mut self, transcripts: Vec<String>) -> Self {
        self.comparison_set = transcripts;
        self
    }
}

impl ReactTask for SimulationTask {
    type Input = Persona;
    type Output = SimulationOutcome;

    fn name(&self) -> &str {
        "simulation"
    }

    fn system_framing(&self, persona: &Persona) -> String {
        render(SIMULATION_FRAMING_TEMPLATE, context! { persona => persona }).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Simulation framing failed to render, using plain profile");
            format!(
                "You are role-playing {}. Scenario: {}",
                persona.label(),
                persona.scenario
            )
        })
    }

    fn initial_prompt(&self, persona: &Persona) -> String {
        format!(
            "Begin your session. The product's modules are: {}. Your scenario: {}",
            self.modules.join(", "),
            persona.scenario
        )
    }

    fn answer_format(&self) -> &str {
        SIMULATION_ANSWER_FORMAT
    }

    /// JSON-led answers must match the outcome contract. Anything else is a
    /// plain-text answer (e.g. after a completion phrase) and is kept as the
    /// summary, unless it embeds a valid outcome object.
    fn parse_final(&self, answer: &str) -> Result<SimulationOutcome, String> {
        let summary = answer.trim();
        if summary.starts_with('{') || summary.starts_with("```") {
            return SIMULATION_OUTCOME.decode(summary).map_err(|e| e.to_string());
        }
        if summary.is_empty() {
            return Err("empty final answer".into());
        }
        if let Ok(outcome) = SIMULATION_OUTCOME.decode(summary) {
            return Ok(outcome);
        }
        Ok(SimulationOutcome {
            summary: summary.to_string(),
            goal_achieved: false,
            abandoned: false,
            modules_used: Vec::new(),
            friction_points: Vec::new(),
        })
    }

    fn artifact(&self, output: &SimulationOutcome, trace: &ExecutionTrace) -> String {
        format!("{}\nOutcome: {}", trace.render(), output.summary)
    }

    fn grade_context(&self, persona: &Persona) -> GradeContext {
        GradeContext::new(format!("{} tries to: {}", persona.label(), persona.scenario))
            .with_criteria(persona.goals.clone())
            .with_comparison_set(self.comparison_set.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::contracts::PersonaDraft;

    fn persona() -> Persona {
        Persona::from_draft(
            PersonaDraft {
                name: "Ana".into(),
                target_role: "data analyst".into(),
                years_of_experience: 3,
                goals: vec!["a sharper resume".into()],
                scenario: "Applying to analyst roles".into(),
                ..Default::default()
            },
            1,
            4,
        )
    }

    fn task() -> SimulationTask {
        SimulationTask::new(vec!["resume_builder".into(), "job_matcher".into()])
    }

    #[test]
    fn test_framing_mentions_persona() {
        let framing = task().system_framing(&persona());
        assert!(framing.contains("Name: Ana"));
        assert!(framing.contains("Criticality: 4/10"));
        assert!(framing.contains("Goals: a sharper resume"));
    }

    #[test]
    fn test_initial_prompt_lists_modules() {
        let prompt = task().initial_prompt(&persona());
        assert!(prompt.contains("resume_builder, job_matcher"));
    }

    #[test]
    fn test_parse_json_outcome() {
        let out = task()
            .parse_final(r#"{"summary": "done", "goal_achieved": true, "modules_used": ["resume_builder"]}"#)
            .unwrap();
        assert!(out.goal_achieved);
        assert_eq!(out.modules_used, vec!["resume_builder"]);
    }

    #[test]
    fn test_parse_plain_text_outcome() {
        let out = task().parse_final("I have sufficient information.").unwrap();
        assert_eq!(out.summary, "I have sufficient information.");
        assert!(!out.goal_achieved);
    }

    #[test]
    fn test_parse_plain_text_with_brackets() {
        let text = "I have sufficient information (the resume builder [v1] helped).";
        let out = task().parse_final(text).unwrap();
        assert_eq!(out.summary, text);
        assert!(out.modules_used.is_empty());
    }

    #[test]
    fn test_parse_embedded_outcome_after_prose() {
        let out = task()
            .parse_final(r#"Wrapping up: {"summary": "done", "goal_achieved": true}"#)
            .unwrap();
        assert_eq!(out.summary, "done");
        assert!(out.goal_achieved);
    }

    #[test]
    fn test_parse_broken_json_is_error() {
        let err = task().parse_final(r#"{"goal_achieved": true}"#).unwrap_err();
        assert!(err.contains("summary"));
        assert!(task().parse_final("   ").is_err());
    }

    #[test]
    fn test_grade_context() {
        let ctx = task()
            .with_comparison_set(vec!["old transcript".into()])
            .grade_context(&persona());
        assert!(ctx.task.starts_with("Ana (data analyst, 3y)"));
        assert_eq!(ctx.criteria, vec!["a sharper resume"]);
        assert_eq!(ctx.comparison_set.len(), 1);
    }
}
