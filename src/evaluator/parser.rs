// src/evaluator/parser.rs — Parse judge replies into verdicts
//
// Judges are asked for the judge_verdict contract. When a model ignores the
// schema and answers in prose, fall back to the line format:
//
//   SCORE: 0.8
//   FEEDBACK: clear and specific, misses salary expectations

use crate::core::contracts::{JudgeVerdict, JUDGE_VERDICT};

/// Parse a judge reply: the JSON contract first, then `SCORE:`/`FEEDBACK:`
/// lines. Scores on a 0-10 scale are normalized to [0, 1].
pub fn parse_verdict(response: &str) -> Option<JudgeVerdict> {
    if let Ok(v) = JUDGE_VERDICT.decode(response) {
        return normalize_score(v.score).map(|score| JudgeVerdict {
            score,
            feedback: v.feedback,
        });
    }

    let mut score = None;
    let mut feedback = String::new();
    let mut in_feedback = false;

    for line in response.lines() {
        let trimmed = line.trim();
        if let Some((label, value)) = trimmed.split_once(':') {
            let label = label.trim_start_matches(['-', '*', '#', ' ']).trim();
            if label.eq_ignore_ascii_case("score") {
                score = score.or_else(|| parse_score_value(value));
                in_feedback = false;
                continue;
            }
            if label.eq_ignore_ascii_case("feedback") {
                feedback = value.trim().to_string();
                in_feedback = true;
                continue;
            }
        }
        if in_feedback && !trimmed.is_empty() {
            feedback.push(' ');
            feedback.push_str(trimmed);
        }
    }

    score.map(|score| JudgeVerdict { score, feedback })
}

/// "0.85", "8/10", "8.5" → unit score.
pub(crate) fn parse_score_value(raw: &str) -> Option<f64> {
    let raw = raw
        .trim_matches(|c: char| c == '*' || c.is_whitespace())
        .trim_end_matches('.');
    let value = match raw.split_once('/') {
        Some((num, den)) => {
            let num: f64 = num.trim().parse().ok()?;
            let den: f64 = den.trim().parse().ok()?;
            if den <= 0.0 {
                return None;
            }
            num / den
        }
        None => raw.parse().ok()?,
    };
    normalize_score(value)
}

fn normalize_score(value: f64) -> Option<f64> {
    if !value.is_finite() || value < 0.0 {
        return None;
    }
    if value <= 1.0 {
        Some(value)
    } else if value <= 10.0 {
        Some(value / 10.0)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_score_value() {
        assert_eq!(parse_score_value("0.85"), Some(0.85));
        assert_eq!(parse_score_value(" 8/10 "), Some(0.8));
        assert_eq!(parse_score_value("7"), Some(0.7));
        assert_eq!(parse_score_value("1"), Some(1.0));
        assert_eq!(parse_score_value("0"), Some(0.0));
        assert_eq!(parse_score_value("42"), None);
        assert_eq!(parse_score_value("-1"), None);
        assert_eq!(parse_score_value("3/0"), None);
        assert_eq!(parse_score_value("high"), None);
    }

    #[test]
    fn test_parse_json_verdict() {
        let v = parse_verdict("{\"score\": 0.6, \"feedback\": \"fine\"}").unwrap();
        assert_eq!(v.score, 0.6);
        assert_eq!(v.feedback, "fine");
    }

    #[test]
    fn test_parse_json_verdict_ten_scale() {
        let v = parse_verdict("{\"score\": 9}").unwrap();
        assert!((v.score - 0.9).abs() < 1e-9);
    }

    #[test]
    fn test_parse_line_verdict() {
        let text = "Here is my review.\nSCORE: 0.7\nFEEDBACK: decent answer\nbut too long";
        let v = parse_verdict(text).unwrap();
        assert_eq!(v.score, 0.7);
        assert_eq!(v.feedback, "decent answer but too long");
    }

    #[test]
    fn test_parse_markdown_labels() {
        let v = parse_verdict("**Score:** 8/10\n- Feedback: good").unwrap();
        assert!((v.score - 0.8).abs() < 1e-9);
        assert_eq!(v.feedback, "good");
    }

    #[test]
    fn test_parse_nothing() {
        assert!(parse_verdict("I cannot grade this.").is_none());
        assert!(parse_verdict("").is_none());
    }
}
