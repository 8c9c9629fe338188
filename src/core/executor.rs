// src/core/executor.rs — Budget-aware ReAct engine
//
// One execution alternates Thinking → ToolCall → Observing until the model
// gives a final answer or the budget/step limit stops it. Every decision
// point checks the budget; a tool whose estimated cost does not fit in the
// remaining time is never started.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::budget::{Budget, TimeBudget};
use super::react_parser::{self, CompletionPolicy};
use super::system_prompt::{build_react_prompt, CONTINUE_PROMPT};
use super::tools::ToolRegistry;
use super::trace::{ExecutionTrace, ToolInvocation};
use crate::evaluator::{GradeContext, GradeResult, MultiGrader};
use crate::infra::config::{BudgetConfig, ReactConfig};
use crate::provider::{ChatRequest, InferenceService, Message, TokenUsage};

/// A unit of work the engine can drive. The task owns the framing and the
/// interpretation of the final answer; the engine owns the loop.
pub trait ReactTask: Send + Sync {
    type Input: Send + Sync;
    type Output: Send;

    fn name(&self) -> &str;
    fn system_framing(&self, input: &Self::Input) -> String;
    fn initial_prompt(&self, input: &Self::Input) -> String;

    /// Shape of the final answer, appended to the system prompt.
    fn answer_format(&self) -> &str {
        ""
    }

    fn parse_final(&self, answer: &str) -> Result<Self::Output, String>;

    /// Text handed to the graders.
    fn artifact(&self, output: &Self::Output, trace: &ExecutionTrace) -> String;

    fn grade_context(&self, _input: &Self::Input) -> GradeContext {
        GradeContext::new(self.name())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineState {
    Thinking,
    ToolCall,
    Observing,
    Final,
    Aborted,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AbortReason {
    InsufficientTimeForTool {
        tool: String,
        estimated_ms: u64,
        remaining_ms: u64,
    },
    BudgetExpired,
    StepLimit {
        max_steps: u32,
    },
    Timeout {
        elapsed_ms: u64,
    },
    Inference {
        message: String,
    },
    UnparsableAnswer {
        message: String,
    },
}

impl AbortReason {
    /// Stable short code, used in persisted outcomes.
    pub fn code(&self) -> &'static str {
        match self {
            AbortReason::InsufficientTimeForTool { .. } => "insufficient time for tool",
            AbortReason::BudgetExpired => "budget expired",
            AbortReason::StepLimit { .. } => "step limit reached",
            AbortReason::Timeout { .. } => "timed out",
            AbortReason::Inference { .. } => "inference failed",
            AbortReason::UnparsableAnswer { .. } => "unparsable final answer",
        }
    }
}

impl std::fmt::Display for AbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AbortReason::InsufficientTimeForTool {
                tool,
                estimated_ms,
                remaining_ms,
            } => write!(
                f,
                "insufficient time for tool '{tool}' (needs {estimated_ms}ms, {remaining_ms}ms left)"
            ),
            AbortReason::StepLimit { max_steps } => write!(f, "step limit reached ({max_steps})"),
            AbortReason::Timeout { elapsed_ms } => write!(f, "timed out after {elapsed_ms}ms"),
            AbortReason::Inference { message } => write!(f, "inference failed: {message}"),
            AbortReason::UnparsableAnswer { message } => {
                write!(f, "unparsable final answer: {message}")
            }
            AbortReason::BudgetExpired => write!(f, "budget expired"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum ExecutionOutcome<T> {
    Final(T),
    Aborted(AbortReason),
}

#[derive(Debug, Clone)]
pub struct ExecutionResult<T> {
    pub outcome: ExecutionOutcome<T>,
    pub trace: ExecutionTrace,
    /// Present only for final outcomes when a grader is attached.
    pub grade: Option<GradeResult>,
    pub usage: TokenUsage,
    pub raw_final: Option<String>,
    pub elapsed_ms: u64,
    pub max_steps: u32,
}

impl<T> ExecutionResult<T> {
    pub fn success(&self) -> bool {
        matches!(self.outcome, ExecutionOutcome::Final(_))
    }

    pub fn output(&self) -> Option<&T> {
        match &self.outcome {
            ExecutionOutcome::Final(t) => Some(t),
            ExecutionOutcome::Aborted(_) => None,
        }
    }

    pub fn abort_reason(&self) -> Option<&AbortReason> {
        match &self.outcome {
            ExecutionOutcome::Final(_) => None,
            ExecutionOutcome::Aborted(r) => Some(r),
        }
    }

    pub fn final_state(&self) -> EngineState {
        if self.success() {
            EngineState::Final
        } else {
            EngineState::Aborted
        }
    }
}

/// Engine knobs, resolved from config once.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub budget: TimeBudget,
    pub avg_step_cost_ms: u64,
    pub policy: CompletionPolicy,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl EngineSettings {
    pub fn from_config(react: &ReactConfig, budget: &BudgetConfig) -> Self {
        Self {
            budget: TimeBudget::from(budget),
            avg_step_cost_ms: react.avg_step_cost_ms,
            policy: CompletionPolicy::from(react),
            max_tokens: react.max_tokens,
            temperature: react.temperature,
        }
    }
}

pub struct ReactEngine {
    provider: Arc<dyn InferenceService>,
    tools: Arc<ToolRegistry>,
    settings: EngineSettings,
    grader: Option<Arc<MultiGrader>>,
}

impl ReactEngine {
    pub fn new(provider: Arc<dyn InferenceService>, tools: Arc<ToolRegistry>, settings: EngineSettings) -> Self {
        Self {
            provider,
            tools,
            settings,
            grader: None,
        }
    }

    pub fn with_grader(mut self, grader: Arc<MultiGrader>) -> Self {
        self.grader = Some(grader);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    /// Run one execution under a fresh budget.
    pub async fn execute<T: ReactTask>(&self, task: &T, input: &T::Input) -> ExecutionResult<T::Output> {
        let budget = self.settings.budget.start();
        let max_steps = budget.recommended_max_steps(self.settings.avg_step_cost_ms);
        let system = build_react_prompt(
            &task.system_framing(input),
            &self.tools,
            &self.settings.policy,
            task.answer_format(),
        );

        tracing::debug!(
            task = task.name(),
            budget_ms = budget.spec().max_duration_ms,
            mode = %budget.priority_mode(),
            max_steps,
            "Starting ReAct execution"
        );

        let mut run = Run {
            budget: &budget,
            trace: ExecutionTrace::new(),
            usage: TokenUsage::default(),
            messages: vec![Message::user(task.initial_prompt(input))],
            raw_final: None,
        };

        let outcome = self.drive(task, &system, max_steps, &mut run).await;

        let grade = match (&outcome, &self.grader) {
            (ExecutionOutcome::Final(out), Some(grader)) => {
                let artifact = task.artifact(out, &run.trace);
                Some(grader.evaluate(&artifact, &task.grade_context(input)).await)
            }
            _ => None,
        };

        match &outcome {
            ExecutionOutcome::Final(_) => tracing::debug!(
                task = task.name(),
                steps = run.trace.len(),
                elapsed_ms = budget.elapsed(),
                "ReAct execution finished"
            ),
            ExecutionOutcome::Aborted(reason) => tracing::info!(
                task = task.name(),
                steps = run.trace.len(),
                elapsed_ms = budget.elapsed(),
                reason = %reason,
                "ReAct execution aborted"
            ),
        }

        ExecutionResult {
            outcome,
            elapsed_ms: budget.elapsed(),
            trace: run.trace,
            grade,
            usage: run.usage,
            raw_final: run.raw_final,
            max_steps,
        }
    }

    async fn drive<T: ReactTask>(
        &self,
        task: &T,
        system: &str,
        max_steps: u32,
        run: &mut Run<'_>,
    ) -> ExecutionOutcome<T::Output> {
        let policy = &self.settings.policy;
        let mut directive_sent = false;

        loop {
            if run.budget.is_expired() {
                return ExecutionOutcome::Aborted(AbortReason::BudgetExpired);
            }
            if run.trace.len() as u32 >= max_steps {
                return ExecutionOutcome::Aborted(AbortReason::StepLimit { max_steps });
            }
            if run.budget.is_near_timeout() && !directive_sent {
                run.messages.push(Message::user(policy.final_directive.clone()));
                directive_sent = true;
                tracing::debug!(task = task.name(), elapsed_ms = run.budget.elapsed(), "Near timeout, requesting final answer");
            }

            // Thinking
            let request = ChatRequest {
                model: None,
                messages: run.messages.clone(),
                max_tokens: Some(self.settings.max_tokens),
                temperature: Some(self.settings.temperature),
                system: Some(system.to_string()),
                contract: None,
            };
            let response = match run.budget.with_timeout(self.provider.chat(request), None).await {
                Ok(Ok(r)) => r,
                Ok(Err(e)) => {
                    return ExecutionOutcome::Aborted(AbortReason::Inference {
                        message: e.to_string(),
                    })
                }
                Err(_) => {
                    return ExecutionOutcome::Aborted(AbortReason::Timeout {
                        elapsed_ms: run.budget.elapsed(),
                    })
                }
            };
            run.usage.add(&response.usage);
            run.messages.push(Message::assistant(response.content.clone()));
            let turn = react_parser::parse(&response.content, policy);

            if turn.is_final {
                run.trace.push(turn.thought.clone(), None, None, run.budget.elapsed());
                let answer = turn.answer_text().to_string();
                run.raw_final = Some(answer.clone());
                tracing::trace!(task = task.name(), state = ?EngineState::Final, heuristic = turn.heuristic_final);
                return match task.parse_final(&answer) {
                    Ok(out) => ExecutionOutcome::Final(out),
                    Err(message) => ExecutionOutcome::Aborted(AbortReason::UnparsableAnswer { message }),
                };
            }

            let Some(action) = turn.action else {
                run.trace.push(turn.thought, None, None, run.budget.elapsed());
                run.messages.push(Message::user(CONTINUE_PROMPT));
                continue;
            };

            // ToolCall
            let estimated_ms = self
                .tools
                .get(&action.tool)
                .map(|t| t.estimated_cost_ms())
                .unwrap_or(0);
            if !run.budget.has_time_for(estimated_ms) {
                let remaining_ms = run.budget.remaining();
                let tool = action.tool.clone();
                run.trace.push(turn.thought, Some(action), None, run.budget.elapsed());
                return ExecutionOutcome::Aborted(AbortReason::InsufficientTimeForTool {
                    tool,
                    estimated_ms,
                    remaining_ms,
                });
            }

            tracing::trace!(task = task.name(), state = ?EngineState::ToolCall, tool = %action.tool);
            let result = match run
                .budget
                .with_timeout(self.tools.execute(&action.tool, action.params.clone()), None)
                .await
            {
                Ok(r) => r,
                Err(_) => {
                    run.trace.push(
                        turn.thought,
                        Some(action),
                        Some("ERROR: cancelled, budget expired".into()),
                        run.budget.elapsed(),
                    );
                    return ExecutionOutcome::Aborted(AbortReason::BudgetExpired);
                }
            };

            // Observing
            let observation = result.to_observation();
            tracing::trace!(task = task.name(), state = ?EngineState::Observing, success = result.success, ms = result.execution_time_ms);
            run.messages.push(Message::user(format!("Observation: {observation}")));
            run.trace.push(
                turn.thought,
                Some(ToolInvocation {
                    tool: action.tool,
                    params: action.params,
                }),
                Some(observation),
                run.budget.elapsed(),
            );
        }
    }
}

/// Mutable state of one execution.
struct Run<'a> {
    budget: &'a Budget,
    trace: ExecutionTrace,
    usage: TokenUsage,
    messages: Vec<Message>,
    raw_final: Option<String>,
}
