// src/core/trace.rs — Execution traces for the ReAct engine

use serde::{Deserialize, Serialize};

/// A tool call as the model requested it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInvocation {
    pub tool: String,
    pub params: serde_json::Value,
}

/// One think/act/observe round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// 1-based, contiguous.
    pub index: u32,
    pub thought: String,
    pub action: Option<ToolInvocation>,
    pub observation: Option<String>,
    /// Budget elapsed when the step was recorded.
    pub elapsed_ms: u64,
}

/// Ordered steps of one execution.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionTrace {
    steps: Vec<Step>,
}

impl ExecutionTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(
        &mut self,
        thought: impl Into<String>,
        action: Option<ToolInvocation>,
        observation: Option<String>,
        elapsed_ms: u64,
    ) -> u32 {
        let index = self.steps.len() as u32 + 1;
        self.steps.push(Step {
            index,
            thought: thought.into(),
            action,
            observation,
            elapsed_ms,
        });
        index
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn last(&self) -> Option<&Step> {
        self.steps.last()
    }

    /// Tools invoked, in order.
    pub fn tools_used(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter_map(|s| s.action.as_ref().map(|a| a.tool.as_str()))
            .collect()
    }

    /// Plain-text transcript, suitable for persistence and grading.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for step in &self.steps {
            out.push_str(&format!("[{}] Thought: {}\n", step.index, step.thought.trim()));
            if let Some(action) = &step.action {
                out.push_str(&format!("[{}] Action: {} {}\n", step.index, action.tool, action.params));
            }
            if let Some(obs) = &step.observation {
                out.push_str(&format!("[{}] Observation: {}\n", step.index, obs.trim()));
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_indices_contiguous_from_one() {
        let mut t = ExecutionTrace::new();
        assert_eq!(t.push("a", None, None, 0), 1);
        assert_eq!(t.push("b", None, None, 5), 2);
        assert_eq!(t.push("c", None, None, 9), 3);
        let indices: Vec<u32> = t.steps().iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_render_and_tools_used() {
        let mut t = ExecutionTrace::new();
        t.push(
            "check modules",
            Some(ToolInvocation {
                tool: "list_modules".into(),
                params: serde_json::json!({}),
            }),
            Some("resume_builder".into()),
            10,
        );
        t.push("done", None, None, 20);
        let text = t.render();
        assert!(text.contains("[1] Action: list_modules {}"));
        assert!(text.contains("[1] Observation: resume_builder"));
        assert!(text.contains("[2] Thought: done"));
        assert_eq!(t.tools_used(), vec!["list_modules"]);
    }
}
