// src/evaluator/mod.rs — Multi-grader framework
//
// A MultiGrader runs every configured grader concurrently over one artifact
// and aggregates their scores. Graders never fail: a grader that cannot
// reach a verdict returns a neutral score with a note.

pub mod judge;
pub mod parser;
pub mod rules;
pub mod similarity;
pub mod utils;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub use judge::JudgeGrader;
pub use rules::RuleGrader;
pub use similarity::SimilarityGrader;

/// How per-grader scores combine into one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    #[default]
    Average,
    Min,
    Weighted,
}

impl std::fmt::Display for Aggregation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Aggregation::Average => write!(f, "average"),
            Aggregation::Min => write!(f, "min"),
            Aggregation::Weighted => write!(f, "weighted"),
        }
    }
}

/// What the graders know about the artifact beyond its text.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GradeContext {
    /// What the artifact was supposed to accomplish.
    pub task: String,
    pub criteria: Vec<String>,
    /// Texts the artifact should not duplicate.
    pub comparison_set: Vec<String>,
}

impl GradeContext {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            ..Default::default()
        }
    }

    pub fn with_criteria(mut self, criteria: Vec<String>) -> Self {
        self.criteria = criteria;
        self
    }

    pub fn with_comparison_set(mut self, comparison_set: Vec<String>) -> Self {
        self.comparison_set = comparison_set;
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraderScore {
    pub grader: String,
    /// In [0, 1].
    pub score: f64,
    pub feedback: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradeResult {
    pub overall_score: f64,
    pub aggregation: Aggregation,
    /// One entry per configured grader, in configuration order.
    pub per_grader: Vec<GraderScore>,
}

impl GradeResult {
    pub fn score_for(&self, grader: &str) -> Option<f64> {
        self.per_grader
            .iter()
            .find(|s| s.grader == grader)
            .map(|s| s.score)
    }
}

#[async_trait]
pub trait Grader: Send + Sync {
    fn name(&self) -> &str;
    async fn grade(&self, output: &str, ctx: &GradeContext) -> GraderScore;
}

pub struct MultiGrader {
    graders: Vec<Arc<dyn Grader>>,
    aggregation: Aggregation,
    weights: BTreeMap<String, f64>,
}

impl MultiGrader {
    pub fn new(aggregation: Aggregation) -> Self {
        Self {
            graders: Vec::new(),
            aggregation,
            weights: BTreeMap::new(),
        }
    }

    pub fn with(mut self, grader: Arc<dyn Grader>) -> Self {
        self.graders.push(grader);
        self
    }

    pub fn with_weights(mut self, weights: BTreeMap<String, f64>) -> Self {
        self.weights = weights;
        self
    }

    pub fn len(&self) -> usize {
        self.graders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.graders.is_empty()
    }

    /// Run every grader concurrently and aggregate.
    pub async fn evaluate(&self, output: &str, ctx: &GradeContext) -> GradeResult {
        let futures = self.graders.iter().map(|g| g.grade(output, ctx));
        let per_grader: Vec<GraderScore> = futures::future::join_all(futures)
            .await
            .into_iter()
            .map(|mut s| {
                s.score = utils::clamp_unit(s.score);
                s
            })
            .collect();

        let overall_score = utils::aggregate(self.aggregation, &per_grader, &self.weights);
        tracing::debug!(
            graders = per_grader.len(),
            aggregation = %self.aggregation,
            overall = overall_score,
            "Graded artifact"
        );

        GradeResult {
            overall_score,
            aggregation: self.aggregation,
            per_grader,
        }
    }
}
