// src/evaluator/utils.rs — Helper functions for grading

use std::collections::BTreeMap;

use super::{Aggregation, GraderScore};

/// Score used when there is nothing to aggregate.
pub const NEUTRAL_SCORE: f64 = 0.5;

/// Clamp into [0, 1]. NaN counts as a failed grade.
pub fn clamp_unit(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// Combine per-grader scores. Weighted aggregation uses 1.0 for graders
/// missing from `weights` and falls back to the plain average when no
/// weights are configured or they sum to zero.
pub fn aggregate(aggregation: Aggregation, scores: &[GraderScore], weights: &BTreeMap<String, f64>) -> f64 {
    if scores.is_empty() {
        return NEUTRAL_SCORE;
    }

    let mean = || scores.iter().map(|s| s.score).sum::<f64>() / scores.len() as f64;

    match aggregation {
        Aggregation::Average => mean(),
        Aggregation::Min => scores.iter().map(|s| s.score).fold(f64::INFINITY, f64::min),
        Aggregation::Weighted => {
            if weights.is_empty() {
                return mean();
            }
            let weight_of = |s: &GraderScore| weights.get(&s.grader).copied().unwrap_or(1.0).max(0.0);
            let total_weight: f64 = scores.iter().map(weight_of).sum();
            if total_weight == 0.0 {
                return mean();
            }
            scores.iter().map(|s| s.score * weight_of(s)).sum::<f64>() / total_weight
        }
    }
}

/// Fraction of lines that differ between two texts (0.0 = identical).
pub fn compute_diff_ratio(prev: &str, current: &str) -> f64 {
    let prev_lines: Vec<&str> = prev.lines().collect();
    let curr_lines: Vec<&str> = current.lines().collect();

    let total = prev_lines.len().max(curr_lines.len());
    if total == 0 {
        return 0.0;
    }

    let changed = (0..total)
        .filter(|&i| prev_lines.get(i) != curr_lines.get(i))
        .count();

    changed as f64 / total as f64
}

/// Truncate text for grading prompts, on a char boundary.
pub fn truncate_for_eval(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
