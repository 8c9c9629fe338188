// src/core/system_prompt.rs — Prompt assembly and templates
//
// The ReAct system prompt is built section by section. Every other prompt
// is a minijinja template rendered against a serializable context.

use minijinja::Environment;
use serde::Serialize;

use super::react_parser::CompletionPolicy;
use super::tools::ToolRegistry;
use crate::infra::errors::EngineError;

/// Render a template against `ctx`.
pub fn render<S: Serialize>(template: &str, ctx: S) -> Result<String, EngineError> {
    let env = Environment::new();
    env.render_str(template, ctx)
        .map_err(|e| EngineError::Other(anyhow::anyhow!("template render failed: {e}")))
}

/// System prompt for a ReAct execution.
///
/// Sections (in order):
///   1. Framing: who the agent is and what it is trying to do
///   2. Tools: name, description, parameter schema
///   3. Format: the Thought/Action/Final Answer protocol
pub fn build_react_prompt(framing: &str, tools: &ToolRegistry, policy: &CompletionPolicy, answer_format: &str) -> String {
    let mut prompt = String::with_capacity(4096);

    prompt.push_str(framing.trim());
    prompt.push_str("\n\n");

    prompt.push_str("# Tools\n\n");
    prompt.push_str(&tools.catalog_text());
    prompt.push_str("\n\n");

    prompt.push_str("# Format\n\n");
    prompt.push_str(
        "Work in rounds. Each reply contains exactly one of the following shapes.\n\n\
         To use a tool:\n\
         Thought: <your reasoning>\n\
         Action: <tool name>\n\
         Action Input: <JSON object of parameters>\n\n\
         To finish:\n\
         Thought: <your reasoning>\n\
         Final Answer: <your answer>\n\n\
         After each Action you will receive an Observation with the tool result. \
         Do not invent observations.\n",
    );
    if !answer_format.trim().is_empty() {
        prompt.push_str("\nThe Final Answer must be: ");
        prompt.push_str(answer_format.trim());
        prompt.push('\n');
    }
    if let Some(phrase) = policy.completion_phrases.first() {
        prompt.push_str(&format!(
            "\nWhen you have {phrase}, stop calling tools and give the Final Answer.\n"
        ));
    }

    prompt
}

/// Sent when a reply had neither an action nor a final answer.
pub const CONTINUE_PROMPT: &str =
    "Continue. Either call a tool with Action/Action Input or finish with Final Answer.";

pub const JUDGE_TEMPLATE: &str = r#"You are a strict, fair reviewer grading an artifact produced by an AI-assisted product session.

## Task the artifact was meant to accomplish
{{ task }}
{% if criteria %}
## Criteria
{% for c in criteria %}- {{ c }}
{% endfor %}{% endif %}
## Artifact
{{ output }}

Grade from 0.0 (useless) to 1.0 (excellent). Reply with a JSON object:
{"score": <number 0..1>, "feedback": "<one or two sentences>"}"#;

pub const PERSONA_TEMPLATE: &str = r#"Create {{ count }} distinct synthetic users for a career-tools product.

Each persona is a job seeker who will try the product's modules:
{% for m in modules %}- {{ m.key }}: {{ m.description }}
{% endfor %}
Constraints:
- years_of_experience between {{ min_years }} and {{ max_years }}
- target_role must not contain: {{ excluded | join(", ") }}
- criticality {{ criticality }}/10: {% if criticality <= 3 %}forgiving, happy with reasonable help{% elif criticality <= 6 %}expects solid, specific output{% else %}demanding, notices every weakness and abandons quickly{% endif %}
- each persona has a concrete scenario describing what they want to get done
{% if existing %}
They must differ clearly from these existing personas:
{% for e in existing %}- {{ e }}
{% endfor %}{% endif %}
Reply with a JSON object: {"personas": [{"name", "target_role", "industry", "years_of_experience", "trust", "goals", "pain_points", "scenario"}]}"#;

pub const SIMULATION_FRAMING_TEMPLATE: &str = r#"You are role-playing a user of a career-tools product. Stay in character.

Name: {{ persona.name }}
Target role: {{ persona.target_role }}{% if persona.industry %} ({{ persona.industry }}){% endif %}
Experience: {{ persona.years_of_experience }} years
Criticality: {{ persona.criticality }}/10 (higher means harder to satisfy)
Trust in AI tools: {{ persona.trust }}/10
{% if persona.goals %}Goals: {{ persona.goals | join("; ") }}
{% endif %}{% if persona.pain_points %}Pain points: {{ persona.pain_points | join("; ") }}
{% endif %}
Scenario: {{ persona.scenario }}

Use the tools to try the product the way this person would. Report problems with report_issue as you hit them. Give up if the product is not helping."#;

pub const SIMULATION_ANSWER_FORMAT: &str = r#"a JSON object {"summary": "<what happened>", "goal_achieved": <bool>, "abandoned": <bool>, "modules_used": [<module keys>], "friction_points": [<short strings>]}"#;

pub const FEEDBACK_TEMPLATE: &str = r#"You just finished a session with a career-tools product, role-playing this user:

Name: {{ persona.name }}, {{ persona.years_of_experience }} years, targeting {{ persona.target_role }}
Criticality: {{ persona.criticality }}/10
Scenario: {{ persona.scenario }}

## Session transcript
{{ transcript }}
{% if outcome %}
## Outcome
{{ outcome }}
{% endif %}{% if abort_reason %}
The session ended early: {{ abort_reason }}
{% endif %}
Rate the experience in character. Modules: {{ modules | join(", ") }}.
Reply with a JSON object:
{"overall_satisfaction": <1-10>, "would_recommend": <bool>, "module_ratings": {"<module>": <1-10>}, "issues": [<strings>], "suggestions": [{"module": "<module>", "text": "<suggestion>", "priority": <1-5>}]}"#;

pub const OPTIMIZER_TEMPLATE: &str = r#"You maintain the instruction prompt for one module of a career-tools product.

Module: {{ module.key }}{% if module.description %} ({{ module.description }}){% endif %}
Current version: {{ version }}

## Current prompt
{{ payload }}

## Iteration {{ metrics.iteration }} results
- mean satisfaction: {{ metrics.mean_satisfaction }}/10
- success rate: {{ metrics.success_rate }}
- would recommend: {{ metrics.recommend_rate }}
{% if module_rating is not none %}- this module's mean rating: {{ module_rating }}/10
{% endif %}{% if issues %}
## Most reported issues
{% for i in issues %}- {{ i }}
{% endfor %}{% endif %}{% if suggestions %}
## Suggestions for this module
{% for s in suggestions %}- {{ s }}
{% endfor %}{% endif %}
Decide whether the prompt should change. Keep what works. Only propose a new prompt if it addresses the feedback.
convergence_score is your confidence (0..1) that this module needs no further changes.
Reply with a JSON object:
{"should_change": <bool>, "new_payload": "<full new prompt or null>", "changelog": "<what changed and why>", "convergence_score": <0..1>}"#;
