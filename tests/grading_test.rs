// tests/grading_test.rs — Integration test: multi-grader with rule, similarity and judge graders

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use tuneloop::core::budget::{PriorityMode, TimeBudget};
use tuneloop::evaluator::{Aggregation, GradeContext, JudgeGrader, MultiGrader, RuleGrader, SimilarityGrader};
use tuneloop::infra::errors::EngineError;
use tuneloop::provider::{ChatRequest, ChatResponse, InferenceService};

/// Judge that answers after `delay_ms` with a fixed reply.
struct Judge {
    reply: &'static str,
    delay_ms: u64,
}

#[async_trait]
impl InferenceService for Judge {
    fn id(&self) -> &str {
        "judge"
    }

    async fn chat(&self, req: ChatRequest) -> Result<ChatResponse, EngineError> {
        assert_eq!(req.contract_name(), Some("judge_verdict"));
        tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        Ok(ChatResponse::text(self.reply))
    }
}

fn judge(reply: &'static str, delay_ms: u64, budget_ms: u64) -> Arc<JudgeGrader> {
    Arc::new(JudgeGrader::new(
        Arc::new(Judge { reply, delay_ms }),
        TimeBudget::new(budget_ms, PriorityMode::Speed),
    ))
}

const TRANSCRIPT: &str = "Thought: I want a resume for data analyst roles\n\
                          Action: use_module\nObservation: a resume draft\n\
                          Outcome: got a sharper resume with SQL highlighted";

fn ctx() -> GradeContext {
    GradeContext::new("Ana tries to get a sharper resume")
        .with_criteria(vec!["sharper resume".into(), "SQL".into()])
        .with_comparison_set(vec!["completely unrelated words about gardening".into()])
}

#[tokio::test(start_paused = true)]
async fn test_average_of_all_graders() {
    let grader = MultiGrader::new(Aggregation::Average)
        .with(Arc::new(RuleGrader::criteria_coverage()))
        .with(Arc::new(SimilarityGrader::new(0.6)))
        .with(judge(r#"{"score": 0.4, "feedback": "thin"}"#, 10, 1_000));

    let result = grader.evaluate(TRANSCRIPT, &ctx()).await;
    assert_eq!(result.per_grader.len(), 3);
    assert_eq!(result.score_for("coverage"), Some(1.0));
    assert_eq!(result.score_for("similarity"), Some(1.0));
    assert_eq!(result.score_for("judge"), Some(0.4));
    assert!((result.overall_score - 0.8).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_min_aggregation_takes_worst_grader() {
    let grader = MultiGrader::new(Aggregation::Min)
        .with(Arc::new(RuleGrader::json_object()))
        .with(judge(r#"{"score": 0.9}"#, 10, 1_000));

    let result = grader.evaluate(TRANSCRIPT, &ctx()).await;
    assert_eq!(result.score_for("structure"), Some(0.0));
    assert_eq!(result.overall_score, 0.0);
}

#[tokio::test(start_paused = true)]
async fn test_weighted_aggregation_defaults_missing_weights_to_one() {
    let mut weights = BTreeMap::new();
    weights.insert("judge".to_string(), 3.0);
    let grader = MultiGrader::new(Aggregation::Weighted)
        .with_weights(weights)
        .with(Arc::new(RuleGrader::json_object()))
        .with(judge(r#"{"score": 0.8}"#, 10, 1_000));

    let result = grader.evaluate(TRANSCRIPT, &ctx()).await;
    // (0.0 * 1 + 0.8 * 3) / 4
    assert!((result.overall_score - 0.6).abs() < 1e-9);
}

#[tokio::test(start_paused = true)]
async fn test_slow_judge_degrades_to_neutral() {
    let grader = MultiGrader::new(Aggregation::Average)
        .with(Arc::new(RuleGrader::criteria_coverage()))
        .with(judge(r#"{"score": 1.0}"#, 5_000, 200));

    let result = grader.evaluate(TRANSCRIPT, &ctx()).await;
    assert_eq!(result.score_for("judge"), Some(0.5));
    let judge_feedback = &result.per_grader[1].feedback;
    assert!(judge_feedback.starts_with("judge unavailable"));
    assert!((result.overall_score - 0.75).abs() < 1e-9);
}

#[tokio::test]
async fn test_near_duplicate_transcript_penalized() {
    let grader = MultiGrader::new(Aggregation::Average).with(Arc::new(SimilarityGrader::new(0.6)));
    let ctx = GradeContext::new("replay").with_comparison_set(vec![TRANSCRIPT.to_string()]);
    let result = grader.evaluate(TRANSCRIPT, &ctx).await;
    assert!(result.overall_score < 0.5);
}

#[tokio::test]
async fn test_empty_grader_set_is_neutral() {
    let result = MultiGrader::new(Aggregation::Min)
        .evaluate(TRANSCRIPT, &GradeContext::default())
        .await;
    assert!(result.per_grader.is_empty());
    assert_eq!(result.overall_score, 0.5);
}
