// src/core/react_parser.rs — Parse model replies into ReAct turns
//
// Accepts either a JSON object ({"thought", "action", "action_input",
// "final_answer"}) or the line format:
//
//   Thought: ...
//   Action: tool_name
//   Action Input: {"param": "value"}
//   Final Answer: ...
//
// Anything else is treated as a bare thought. Parsing never fails.

use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

use crate::core::contracts::extract_json;
use crate::core::trace::ToolInvocation;
use crate::infra::config::ReactConfig;

/// What counts as "done" for a ReAct execution.
#[derive(Debug, Clone)]
pub struct CompletionPolicy {
    /// Lowercase phrases that end the execution when a thought contains one
    /// and no action was requested.
    pub completion_phrases: Vec<String>,
    /// Injected once the budget is near timeout.
    pub final_directive: String,
}

impl From<&ReactConfig> for CompletionPolicy {
    fn from(cfg: &ReactConfig) -> Self {
        Self {
            completion_phrases: cfg
                .completion_phrases
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
            final_directive: cfg.final_directive.clone(),
        }
    }
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        Self::from(&ReactConfig::default())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedTurn {
    pub thought: String,
    pub action: Option<ToolInvocation>,
    pub is_final: bool,
    pub final_answer: Option<String>,
    /// Final because of a completion phrase rather than an explicit marker.
    pub heuristic_final: bool,
}

impl ParsedTurn {
    /// The answer text to hand to the task: the explicit final answer, or
    /// the thought for heuristic completions.
    pub fn answer_text(&self) -> &str {
        self.final_answer.as_deref().unwrap_or(&self.thought)
    }
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?im)^[ \t>#*-]*(thought|action[ _]input|action|final[ _]answer)[ \t*]*:[ \t*]*")
            .expect("marker pattern is valid")
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Marker {
    Thought,
    Action,
    ActionInput,
    FinalAnswer,
}

impl Marker {
    fn from_label(label: &str) -> Self {
        let l = label.to_lowercase().replace('_', " ");
        match l.as_str() {
            "thought" => Marker::Thought,
            "action input" => Marker::ActionInput,
            "action" => Marker::Action,
            _ => Marker::FinalAnswer,
        }
    }
}

pub fn parse(response: &str, policy: &CompletionPolicy) -> ParsedTurn {
    let trimmed = response.trim();
    let mut turn = parse_json(trimmed).unwrap_or_else(|| parse_markers(trimmed));

    if turn.final_answer.is_some() {
        turn.is_final = true;
        // A final answer wins over a simultaneous tool request.
        turn.action = None;
    } else if turn.action.is_none() && mentions_completion(&turn.thought, policy) {
        turn.is_final = true;
        turn.heuristic_final = true;
    }
    turn
}

fn mentions_completion(thought: &str, policy: &CompletionPolicy) -> bool {
    let lower = thought.to_lowercase();
    policy
        .completion_phrases
        .iter()
        .any(|p| !p.is_empty() && lower.contains(p.as_str()))
}

fn parse_json(text: &str) -> Option<ParsedTurn> {
    if !(text.starts_with('{') || text.starts_with("```")) {
        return None;
    }
    let value: Value = serde_json::from_str(extract_json(text)?).ok()?;
    let obj = value.as_object()?;
    let known = ["thought", "action", "action_input", "final_answer"];
    if !known.iter().any(|k| obj.contains_key(*k)) {
        return None;
    }

    let thought = obj
        .get("thought")
        .and_then(|v| v.as_str())
        .unwrap_or_default()
        .trim()
        .to_string();

    let action = match obj.get("action") {
        Some(Value::String(tool)) if !tool.trim().is_empty() => Some(ToolInvocation {
            tool: tool.trim().to_string(),
            params: obj
                .get("action_input")
                .map(normalize_params)
                .unwrap_or_else(empty_params),
        }),
        Some(Value::Object(a)) => {
            let tool = a
                .get("tool")
                .or_else(|| a.get("name"))
                .and_then(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty());
            tool.map(|tool| ToolInvocation {
                tool,
                params: a
                    .get("params")
                    .or_else(|| a.get("input"))
                    .or_else(|| a.get("arguments"))
                    .or_else(|| obj.get("action_input"))
                    .map(normalize_params)
                    .unwrap_or_else(empty_params),
            })
        }
        _ => None,
    };

    let final_answer = obj.get("final_answer").and_then(|v| match v {
        Value::Null => None,
        Value::String(s) => Some(s.trim().to_string()),
        other => Some(other.to_string()),
    });

    Some(ParsedTurn {
        thought,
        action,
        final_answer,
        ..Default::default()
    })
}

fn parse_markers(text: &str) -> ParsedTurn {
    let re = marker_regex();
    let hits: Vec<(Marker, usize, usize)> = re
        .captures_iter(text)
        .filter_map(|c| {
            let whole = c.get(0)?;
            let label = c.get(1)?;
            Some((Marker::from_label(label.as_str()), whole.start(), whole.end()))
        })
        .collect();

    if hits.is_empty() {
        return ParsedTurn {
            thought: text.to_string(),
            ..Default::default()
        };
    }

    let mut thought_parts: Vec<&str> = Vec::new();
    let preamble = text[..hits[0].1].trim();
    if !preamble.is_empty() {
        thought_parts.push(preamble);
    }

    let mut tool: Option<String> = None;
    let mut input: Option<String> = None;
    let mut final_answer: Option<String> = None;

    for (i, (marker, _, body_start)) in hits.iter().enumerate() {
        let body_end = hits.get(i + 1).map(|h| h.1).unwrap_or(text.len());
        let body = text[*body_start..body_end].trim();
        match marker {
            Marker::Thought => {
                if !body.is_empty() {
                    thought_parts.push(body);
                }
            }
            Marker::Action if tool.is_none() => {
                let (name, inline) = split_action(body);
                if !name.is_empty() {
                    tool = Some(name);
                    if inline.is_some() && input.is_none() {
                        input = inline;
                    }
                }
            }
            Marker::ActionInput if input.is_none() => input = Some(body.to_string()),
            Marker::FinalAnswer if final_answer.is_none() => {
                // The final answer runs to the end of the reply.
                final_answer = Some(text[*body_start..].trim().to_string());
                break;
            }
            _ => {}
        }
    }

    let action = tool.map(|tool| ToolInvocation {
        tool,
        params: input
            .as_deref()
            .map(parse_params)
            .unwrap_or_else(empty_params),
    });

    ParsedTurn {
        thought: thought_parts.join("\n"),
        action,
        final_answer,
        ..Default::default()
    }
}

/// `use_module({"module": "x"})` or `use_module` on the first line.
fn split_action(body: &str) -> (String, Option<String>) {
    let line = body
        .lines()
        .next()
        .unwrap_or_default()
        .trim()
        .trim_matches(|c| c == '`' || c == '"' || c == '\'' || c == '*')
        .trim();
    if let Some(open) = line.find('(') {
        if line.ends_with(')') {
            let inner = line[open + 1..line.len() - 1].trim();
            let inline = (!inner.is_empty()).then(|| inner.to_string());
            return (line[..open].trim().to_string(), inline);
        }
    }
    (line.to_string(), None)
}

fn parse_params(raw: &str) -> Value {
    match extract_json(raw).and_then(|j| serde_json::from_str::<Value>(j).ok()) {
        Some(v) => normalize_params(&v),
        None if raw.trim().is_empty() => empty_params(),
        None => Value::String(raw.trim().to_string()),
    }
}

fn normalize_params(v: &Value) -> Value {
    match v {
        Value::Null => empty_params(),
        Value::String(s) => match serde_json::from_str::<Value>(s) {
            Ok(inner @ Value::Object(_)) => inner,
            _ => v.clone(),
        },
        other => other.clone(),
    }
}

fn empty_params() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;
    use serde_json::json;

    fn p(text: &str) -> ParsedTurn {
        parse(text, &CompletionPolicy::default())
    }

    // ─── Line format ────────────────────────────────────────────

    #[test]
    fn test_thought_action_input() {
        let t = p("Thought: I should look at the modules.\nAction: list_modules\nAction Input: {}");
        assert_eq!(t.thought, "I should look at the modules.");
        assert_eq!(
            t.action,
            Some(ToolInvocation {
                tool: "list_modules".into(),
                params: json!({})
            })
        );
        assert!(!t.is_final);
    }

    #[test]
    fn test_multiline_action_input() {
        let t = p("Thought: try it\nAction: use_module\nAction Input: {\n  \"module\": \"resume_builder\",\n  \"request\": \"fix my summary\"\n}");
        let a = t.action.unwrap();
        assert_eq!(a.tool, "use_module");
        assert_eq!(a.params["module"], "resume_builder");
    }

    #[test]
    fn test_inline_call_syntax() {
        let t = p("Action: `use_module({\"module\": \"cover_letter\"})`");
        let a = t.action.unwrap();
        assert_eq!(a.tool, "use_module");
        assert_eq!(a.params["module"], "cover_letter");
    }

    #[test]
    fn test_final_answer_marker() {
        let t = p("Thought: done now\nFinal Answer: {\"summary\": \"ok\",\n\"goal_achieved\": true}");
        assert!(t.is_final);
        assert!(!t.heuristic_final);
        assert_eq!(t.answer_text(), "{\"summary\": \"ok\",\n\"goal_achieved\": true}");
    }

    #[test]
    fn test_final_answer_wins_over_action() {
        let t = p("Action: list_modules\nFinal Answer: nothing more to do");
        assert!(t.is_final);
        assert!(t.action.is_none());
    }

    #[test]
    fn test_bold_markers() {
        let t = p("**Thought:** thinking\n**Final Answer:** 42");
        assert_eq!(t.thought, "thinking");
        assert_eq!(t.final_answer.as_deref(), Some("42"));
    }

    #[test]
    fn test_non_json_action_input_kept_as_string() {
        let t = p("Action: report_issue\nAction Input: the export button is broken");
        assert_eq!(
            t.action.unwrap().params,
            Value::String("the export button is broken".into())
        );
    }

    // ─── JSON format ────────────────────────────────────────────

    #[test]
    fn test_json_turn() {
        let t = p(r#"{"thought": "check", "action": "use_module", "action_input": {"module": "job_matcher"}}"#);
        assert_eq!(t.action.unwrap().params["module"], "job_matcher");
    }

    #[test]
    fn test_json_nested_action() {
        let t = p(r#"{"thought": "x", "action": {"tool": "list_modules", "params": null}}"#);
        assert_eq!(t.action.unwrap().params, json!({}));
    }

    #[test]
    fn test_json_final_object() {
        let t = p(r#"{"thought": "done", "final_answer": {"summary": "s", "goal_achieved": false}}"#);
        assert!(t.is_final);
        assert!(t.answer_text().contains("goal_achieved"));
    }

    #[test]
    fn test_json_without_known_keys_is_thought() {
        let t = p(r#"{"summary": "s", "goal_achieved": true}"#);
        assert!(t.action.is_none());
        assert!(!t.is_final);
        assert!(t.thought.contains("summary"));
    }

    // ─── Heuristic completion ───────────────────────────────────

    #[test]
    fn test_completion_phrase_without_marker() {
        let t = p("Thought: I now have Sufficient Information to answer.");
        assert!(t.is_final);
        assert!(t.heuristic_final);
        assert_eq!(t.answer_text(), "I now have Sufficient Information to answer.");
    }

    #[test]
    fn test_completion_phrase_ignored_when_action_requested() {
        let t = p("Thought: almost sufficient information, one more look\nAction: list_modules");
        assert!(!t.is_final);
        assert!(t.action.is_some());
    }

    #[test]
    fn test_custom_completion_phrases() {
        let policy = CompletionPolicy {
            completion_phrases: vec!["i'm done".into()],
            final_directive: String::new(),
        };
        assert!(parse("I'm done with this", &policy).is_final);
        assert!(!parse("sufficient information", &policy).is_final);
    }

    #[test]
    fn test_garbage_becomes_thought() {
        let t = p("   just rambling   ");
        assert_eq!(t.thought, "just rambling");
        assert!(t.action.is_none());
        assert!(!t.is_final);
    }

    // ─── Properties ─────────────────────────────────────────────

    proptest! {
        #[test]
        fn prop_parse_never_panics(s in "\\PC*") {
            let _ = p(&s);
        }

        #[test]
        fn prop_action_names_non_empty(s in "(Thought: [a-z ]{0,20}\n)?Action: [a-z_ ]{0,12}\n(Action Input: \\{\\})?") {
            let t = p(&s);
            if let Some(a) = t.action {
                prop_assert!(!a.tool.is_empty());
            }
        }

        #[test]
        fn prop_final_marker_always_final(prefix in "[a-zA-Z ]{0,30}", answer in "[a-zA-Z0-9 ]{0,30}") {
            let text = format!("Thought: {prefix}\nFinal Answer: {answer}");
            let t = p(&text);
            prop_assert!(t.is_final);
            prop_assert!(t.action.is_none());
        }

        #[test]
        fn prop_markerless_text_is_trimmed_thought(s in "[a-z ]{1,40}") {
            let t = p(&s);
            if !t.is_final {
                prop_assert_eq!(t.thought, s.trim().to_string());
            }
        }
    }
}
