// src/evaluator/judge.rs — Model-as-judge grader

use async_trait::async_trait;
use minijinja::context;
use std::sync::Arc;

use super::parser::parse_verdict;
use super::utils::{truncate_for_eval, NEUTRAL_SCORE};
use super::{GradeContext, Grader, GraderScore};
use crate::core::budget::TimeBudget;
use crate::core::contracts::JUDGE_VERDICT;
use crate::core::system_prompt::{render, JUDGE_TEMPLATE};
use crate::provider::{ChatRequest, InferenceService};

/// Artifacts longer than this are cut before grading.
const MAX_ARTIFACT_CHARS: usize = 12_000;

/// Asks a model to score the artifact against a templated rubric. Any
/// failure (render, inference, timeout, unparsable reply) yields the
/// neutral score with a note rather than an error.
pub struct JudgeGrader {
    name: String,
    provider: Arc<dyn InferenceService>,
    template: String,
    budget: TimeBudget,
}

impl JudgeGrader {
    pub fn new(provider: Arc<dyn InferenceService>, budget: TimeBudget) -> Self {
        Self {
            name: "judge".into(),
            provider,
            template: JUDGE_TEMPLATE.into(),
            budget,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_template(mut self, template: impl Into<String>) -> Self {
        self.template = template.into();
        self
    }

    fn neutral(&self, note: String) -> GraderScore {
        tracing::debug!(grader = %self.name, %note, "Judge fell back to neutral score");
        GraderScore {
            grader: self.name.clone(),
            score: NEUTRAL_SCORE,
            feedback: note,
        }
    }
}

#[async_trait]
impl Grader for JudgeGrader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn grade(&self, output: &str, ctx: &GradeContext) -> GraderScore {
        let prompt = match render(
            &self.template,
            context! {
                task => &ctx.task,
                criteria => &ctx.criteria,
                output => truncate_for_eval(output, MAX_ARTIFACT_CHARS),
            },
        ) {
            Ok(p) => p,
            Err(e) => return self.neutral(format!("judge unavailable: {e}")),
        };

        let request = ChatRequest::new("You grade artifacts. Reply only with JSON.", prompt)
            .with_contract(JUDGE_VERDICT.spec())
            .with_limits(400, 0.0);

        let clock = self.budget.start();
        let response = match clock.with_timeout(self.provider.chat(request), None).await {
            Ok(Ok(r)) => r,
            Ok(Err(e)) => return self.neutral(format!("judge unavailable: {e}")),
            Err(e) => return self.neutral(format!("judge unavailable: {e}")),
        };

        match parse_verdict(&response.content) {
            Some(v) => GraderScore {
                grader: self.name.clone(),
                score: v.score,
                feedback: v.feedback,
            },
            None => self.neutral("judge reply could not be parsed".into()),
        }
    }
}
