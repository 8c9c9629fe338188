// src/evaluator/similarity.rs — Duplicate detection by word-set overlap

use async_trait::async_trait;
use std::collections::HashSet;

use super::{GradeContext, Grader, GraderScore};

/// Slope of the penalty once overlap exceeds the threshold.
const PENALTY_SLOPE: f64 = 2.0;

fn word_set(text: &str) -> HashSet<String> {
    text.split_whitespace()
        .map(|w| {
            w.trim_matches(|c: char| !c.is_alphanumeric())
                .to_lowercase()
        })
        .filter(|w| !w.is_empty())
        .collect()
}

/// Jaccard similarity of the two texts' word sets. Empty text is never
/// considered similar to anything.
pub fn jaccard(a: &str, b: &str) -> f64 {
    let words_a = word_set(a);
    let words_b = word_set(b);
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }
    let intersection = words_a.intersection(&words_b).count();
    let union = words_a.union(&words_b).count();
    intersection as f64 / union as f64
}

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "at", "be", "for", "from", "get", "in", "into", "is", "my", "of", "on", "or", "the", "to",
    "with",
];

/// Fraction of `phrase`'s content words that appear in `text`. A phrase with
/// only stopwords falls back to all of its words; an empty phrase is covered.
pub fn term_coverage(phrase: &str, text: &str) -> f64 {
    let all = word_set(phrase);
    let content: HashSet<&String> = all.iter().filter(|w| !STOPWORDS.contains(&w.as_str())).collect();
    let terms: HashSet<&String> = if content.is_empty() { all.iter().collect() } else { content };
    if terms.is_empty() {
        return 1.0;
    }
    let haystack = word_set(text);
    let found = terms.iter().filter(|t| haystack.contains(t.as_str())).count();
    found as f64 / terms.len() as f64
}

/// Highest similarity between `text` and any member of `others`.
pub fn max_similarity<'a>(text: &str, others: impl IntoIterator<Item = &'a str>) -> f64 {
    others
        .into_iter()
        .map(|o| jaccard(text, o))
        .fold(0.0, f64::max)
}

/// Map a similarity onto a uniqueness score: 1.0 up to the threshold, then
/// linearly decreasing.
pub fn uniqueness(similarity: f64, threshold: f64) -> f64 {
    if similarity <= threshold {
        1.0
    } else {
        (1.0 - PENALTY_SLOPE * (similarity - threshold)).max(0.0)
    }
}

/// Scores how different an artifact is from the context's comparison set.
pub struct SimilarityGrader {
    name: String,
    threshold: f64,
}

impl SimilarityGrader {
    pub fn new(threshold: f64) -> Self {
        Self {
            name: "similarity".into(),
            threshold,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Synchronous form, used by the persona generator.
    pub fn score(&self, text: &str, comparison_set: &[String]) -> f64 {
        let sim = max_similarity(text, comparison_set.iter().map(String::as_str));
        uniqueness(sim, self.threshold)
    }
}

#[async_trait]
impl Grader for SimilarityGrader {
    fn name(&self) -> &str {
        &self.name
    }

    async fn grade(&self, output: &str, ctx: &GradeContext) -> GraderScore {
        let sim = max_similarity(output, ctx.comparison_set.iter().map(String::as_str));
        let score = uniqueness(sim, self.threshold);
        let feedback = if ctx.comparison_set.is_empty() {
            "nothing to compare against".to_string()
        } else {
            format!("max overlap {:.2} (threshold {:.2})", sim, self.threshold)
        };
        GraderScore {
            grader: self.name.clone(),
            score,
            feedback,
        }
    }
}
