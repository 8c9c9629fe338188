// src/evaluator/rules.rs — Deterministic rule-based graders

use async_trait::async_trait;
use std::sync::Arc;

use super::similarity::term_coverage;
use super::{GradeContext, Grader, GraderScore};

const ADDRESSED_COVERAGE: f64 = 0.5;

type RuleFn = dyn Fn(&str, &GradeContext) -> (f64, String) + Send + Sync;

/// A grader backed by a plain function. No inference, no I/O.
#[derive(Clone)]
pub struct RuleGrader {
    name: String,
    rule: Arc<RuleFn>,
}

impl RuleGrader {
    pub fn new<F>(name: impl Into<String>, rule: F) -> Self
    where
        F: Fn(&str, &GradeContext) -> (f64, String) + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            rule: Arc::new(rule),
        }
    }

    /// Penalizes outputs shorter than `min_words` linearly.
    pub fn min_length(min_words: usize) -> Self {
        Self::new("length", move |output, _| {
            let words = output.split_whitespace().count();
            if min_words == 0 || words >= min_words {
                (1.0, format!("{words} words"))
            } else {
                (
                    words as f64 / min_words as f64,
                    format!("only {words} of {min_words} expected words"),
                )
            }
        })
    }

    /// Mean per-criterion word coverage. A criterion counts as addressed
    /// when at least half of its content words appear in the output, in any
    /// order.
    pub fn criteria_coverage() -> Self {
        Self::new("coverage", |output, ctx| {
            if ctx.criteria.is_empty() {
                return (1.0, "no criteria".into());
            }
            let per_criterion: Vec<(f64, &str)> = ctx
                .criteria
                .iter()
                .map(|c| (term_coverage(c, output), c.as_str()))
                .collect();
            let missing: Vec<&str> = per_criterion
                .iter()
                .filter(|(cov, _)| *cov < ADDRESSED_COVERAGE)
                .map(|(_, c)| *c)
                .collect();
            let score = per_criterion.iter().map(|(cov, _)| cov).sum::<f64>() / per_criterion.len() as f64;
            let feedback = if missing.is_empty() {
                "all criteria addressed".to_string()
            } else {
                format!("missing: {}", missing.join(", "))
            };
            (score, feedback)
        })
    }

    /// 1.0 when the output parses as a JSON object, else 0.0.
    pub fn json_object() -> Self {
        Self::new("structure", |output, _| {
            let parsed = crate::core::contracts::extract_json(output)
                .and_then(|j| serde_json::from_str::<serde_json::Value>(j).ok());
            match parsed {
                Some(v) if v.is_object() => (1.0, "valid JSON object".into()),
                _ => (0.0, "not a JSON object".into()),
            }
        })
    }
}

#[async_trait]
impl Grader for RuleGrader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn grade(&self, output: &str, ctx: &GradeContext) -> GraderScore {
        let (score, feedback) = (self.rule)(output, ctx);
        GraderScore {
            grader: self.name.clone(),
            score,
            feedback,
        }
    }
}
