// src/simulation/metrics.rs — Per-iteration aggregation of outcomes and feedback

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};

use super::feedback::FeedbackReport;
use super::SimulationResult;
use crate::infra::config::SatisfactionBand;
use crate::persona::Persona;

/// How many issues/suggestions the metrics keep.
pub const TOP_N: usize = 10;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Count {
    pub text: String,
    pub count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionCount {
    pub module: Option<String>,
    pub text: String,
    pub count: usize,
    /// Highest priority any persona gave it (1 = most urgent).
    pub priority: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandSatisfaction {
    pub name: String,
    pub personas: usize,
    pub mean_satisfaction: Option<f64>,
    pub target: f64,
    pub met: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IterationMetrics {
    pub iteration: u32,
    pub simulations: usize,
    pub feedback_reports: usize,
    /// Reports that fell back to the neutral default.
    pub degraded_reports: usize,
    /// 1 ..= 10; 0 when no reports exist.
    pub mean_satisfaction: f64,
    pub success_rate: f64,
    pub goal_rate: f64,
    pub abandonment_rate: f64,
    pub error_rate: f64,
    pub recommend_rate: f64,
    pub mean_grade: Option<f64>,
    pub module_ratings: BTreeMap<String, f64>,
    pub top_issues: Vec<Count>,
    pub top_suggestions: Vec<SuggestionCount>,
    pub bands: Vec<BandSatisfaction>,
}

impl IterationMetrics {
    /// Every band that saw at least one persona met its target, and at
    /// least one band saw a persona.
    pub fn targets_met(&self) -> bool {
        let observed: Vec<&BandSatisfaction> = self.bands.iter().filter(|b| b.personas > 0).collect();
        !observed.is_empty() && observed.iter().all(|b| b.met)
    }

    pub fn suggestions_for(&self, module: &str) -> Vec<&SuggestionCount> {
        self.top_suggestions
            .iter()
            .filter(|s| s.module.as_deref().map_or(true, |m| m == module))
            .collect()
    }
}

/// Lowercase, collapse whitespace, drop trailing punctuation.
pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
        .trim_end_matches(|c: char| c.is_ascii_punctuation())
        .to_string()
}

/// Frequency of normalized texts, most frequent first. The first spelling
/// seen is kept for display.
pub fn top_counts<'a>(items: impl IntoIterator<Item = &'a str>, limit: usize) -> Vec<Count> {
    let mut order: Vec<String> = Vec::new();
    let mut counts: HashMap<String, (String, usize)> = HashMap::new();
    for item in items {
        let key = normalize_text(item);
        if key.is_empty() {
            continue;
        }
        counts
            .entry(key.clone())
            .and_modify(|(_, n)| *n += 1)
            .or_insert_with(|| {
                order.push(key);
                (item.trim().to_string(), 1)
            });
    }
    let mut out: Vec<Count> = order
        .into_iter()
        .filter_map(|k| counts.remove(&k))
        .map(|(text, count)| Count { text, count })
        .collect();
    // Stable sort keeps first-seen order among ties.
    out.sort_by(|a, b| b.count.cmp(&a.count));
    out.truncate(limit);
    out
}

fn rate(n: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        n as f64 / total as f64
    }
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

pub fn aggregate(
    iteration: u32,
    personas: &[Persona],
    simulations: &[SimulationResult],
    reports: &[FeedbackReport],
    bands: &[SatisfactionBand],
) -> IterationMetrics {
    let sims = simulations.len();
    let satisfaction: Vec<f64> = reports.iter().map(|r| r.overall_satisfaction).collect();
    let grades: Vec<f64> = simulations
        .iter()
        .filter_map(|s| s.grade.as_ref().map(|g| g.overall_score))
        .collect();

    let mut ratings: BTreeMap<String, Vec<f64>> = BTreeMap::new();
    for r in reports {
        for (module, score) in &r.module_ratings {
            ratings.entry(module.clone()).or_default().push(*score);
        }
    }
    let module_ratings = ratings
        .into_iter()
        .filter_map(|(m, v)| mean(&v).map(|avg| (m, avg)))
        .collect();

    // A persona's friction point and the matching feedback issue count once.
    let mut issue_texts: Vec<&str> = Vec::new();
    for s in simulations {
        let mut seen = HashSet::new();
        let from_report = reports
            .iter()
            .filter(|r| r.simulation_id == s.id)
            .flat_map(|r| r.issues.iter());
        for text in s.friction_points.iter().chain(from_report) {
            if seen.insert(normalize_text(text)) {
                issue_texts.push(text);
            }
        }
    }
    let top_issues = top_counts(issue_texts, TOP_N);

    let top_suggestions = suggestion_counts(reports);

    let by_persona: HashMap<&str, u8> = personas.iter().map(|p| (p.id.as_str(), p.criticality)).collect();
    let band_stats = bands
        .iter()
        .map(|band| {
            let in_band: Vec<f64> = reports
                .iter()
                .filter(|r| {
                    by_persona
                        .get(r.persona_id.as_str())
                        .is_some_and(|c| band.contains(*c))
                })
                .map(|r| r.overall_satisfaction)
                .collect();
            let band_mean = mean(&in_band);
            BandSatisfaction {
                name: band.name.clone(),
                personas: in_band.len(),
                mean_satisfaction: band_mean,
                target: band.target_satisfaction,
                met: band_mean.is_some_and(|m| m >= band.target_satisfaction),
            }
        })
        .collect();

    IterationMetrics {
        iteration,
        simulations: sims,
        feedback_reports: reports.len(),
        degraded_reports: reports.iter().filter(|r| r.degraded).count(),
        mean_satisfaction: mean(&satisfaction).unwrap_or(0.0),
        success_rate: rate(simulations.iter().filter(|s| s.outcome.completed_successfully).count(), sims),
        goal_rate: rate(simulations.iter().filter(|s| s.outcome.goal_achieved).count(), sims),
        abandonment_rate: rate(simulations.iter().filter(|s| s.outcome.abandoned).count(), sims),
        error_rate: rate(simulations.iter().filter(|s| s.outcome.error_encountered).count(), sims),
        recommend_rate: rate(reports.iter().filter(|r| r.would_recommend).count(), reports.len()),
        mean_grade: mean(&grades),
        module_ratings,
        top_issues,
        top_suggestions,
        bands: band_stats,
    }
}

fn suggestion_counts(reports: &[FeedbackReport]) -> Vec<SuggestionCount> {
    let mut order: Vec<(Option<String>, String)> = Vec::new();
    let mut acc: HashMap<(Option<String>, String), SuggestionCount> = HashMap::new();
    for s in reports.iter().flat_map(|r| r.suggestions.iter()) {
        let key = (s.module.clone(), normalize_text(&s.text));
        if key.1.is_empty() {
            continue;
        }
        match acc.get_mut(&key) {
            Some(existing) => {
                existing.count += 1;
                existing.priority = existing.priority.min(s.priority);
            }
            None => {
                order.push(key.clone());
                acc.insert(
                    key,
                    SuggestionCount {
                        module: s.module.clone(),
                        text: s.text.trim().to_string(),
                        count: 1,
                        priority: s.priority,
                    },
                );
            }
        }
    }
    let mut out: Vec<SuggestionCount> = order.into_iter().filter_map(|k| acc.remove(&k)).collect();
    out.sort_by(|a, b| b.count.cmp(&a.count).then(a.priority.cmp(&b.priority)));
    out.truncate(TOP_N);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::feedback::Suggestion;
    use crate::simulation::OutcomeFlags;
    use chrono::Utc;

    fn persona(id: &str, criticality: u8) -> Persona {
        Persona {
            id: id.into(),
            iteration: 1,
            name: id.into(),
            target_role: "engineer".into(),
            industry: String::new(),
            years_of_experience: 3,
            criticality,
            trust: 5,
            goals: vec![],
            pain_points: vec![],
            scenario: "s".into(),
            created_at: Utc::now(),
        }
    }

    fn sim(id: &str, persona_id: &str, success: bool, friction: &[&str]) -> SimulationResult {
        SimulationResult {
            id: id.into(),
            run_id: "run".into(),
            iteration: 1,
            persona_id: persona_id.into(),
            persona_name: persona_id.into(),
            criticality: 5,
            transcript: String::new(),
            summary: String::new(),
            modules_used: vec![],
            friction_points: friction.iter().map(|s| s.to_string()).collect(),
            outcome: OutcomeFlags {
                completed_successfully: success,
                goal_achieved: success,
                abandoned: !success,
                error_encountered: false,
            },
            abort_reason: None,
            grade: None,
            steps: 1,
            duration_ms: 10,
            tokens: 0,
            created_at: Utc::now(),
        }
    }

    fn report(sim_id: &str, persona_id: &str, satisfaction: f64, issues: &[&str]) -> FeedbackReport {
        FeedbackReport {
            id: format!("fb-{sim_id}"),
            simulation_id: sim_id.into(),
            persona_id: persona_id.into(),
            iteration: 1,
            overall_satisfaction: satisfaction,
            would_recommend: satisfaction >= 7.0,
            module_ratings: BTreeMap::from([("resume_builder".to_string(), satisfaction)]),
            issues: issues.iter().map(|s| s.to_string()).collect(),
            suggestions: vec![],
            degraded: false,
        }
    }

    // ─── Text counting ──────────────────────────────────────────

    #[test]
    fn test_normalize_text() {
        assert_eq!(normalize_text("  Too   Slow!! "), "too slow");
        assert_eq!(normalize_text("..."), "");
    }

    #[test]
    fn test_top_counts_merges_variants() {
        let counts = top_counts(["Too slow.", "too slow", "Confusing UI", "TOO SLOW!"], 10);
        assert_eq!(counts[0], Count { text: "Too slow.".into(), count: 3 });
        assert_eq!(counts[1].count, 1);
    }

    #[test]
    fn test_top_counts_limit_and_empty() {
        let counts = top_counts(["a", "b", "c", "  "], 2);
        assert_eq!(counts.len(), 2);
        assert_eq!(counts[0].text, "a");
    }

    // ─── Aggregation ────────────────────────────────────────────

    #[test]
    fn test_aggregate_rates_and_means() {
        let personas = vec![persona("p1", 2), persona("p2", 8)];
        let sims = vec![
            sim("s1", "p1", true, &["slow export"]),
            sim("s2", "p2", false, &["Slow export"]),
        ];
        let reports = vec![
            report("s1", "p1", 8.0, &["slow export"]),
            report("s2", "p2", 4.0, &["bad formatting"]),
        ];
        let m = aggregate(1, &personas, &sims, &reports, &[]);
        assert_eq!(m.simulations, 2);
        assert!((m.mean_satisfaction - 6.0).abs() < 1e-9);
        assert!((m.success_rate - 0.5).abs() < 1e-9);
        assert!((m.abandonment_rate - 0.5).abs() < 1e-9);
        assert!((m.recommend_rate - 0.5).abs() < 1e-9);
        assert_eq!(m.module_ratings.get("resume_builder"), Some(&6.0));
        // s1's friction and report issue are the same complaint
        assert_eq!(m.top_issues[0], Count { text: "slow export".into(), count: 2 });
        assert!(m.mean_grade.is_none());
    }

    #[test]
    fn test_band_targets() {
        let bands = crate::infra::config::ProgressiveConfig::default().bands;
        let personas = vec![persona("p1", 2), persona("p2", 8)];
        let sims = vec![sim("s1", "p1", true, &[]), sim("s2", "p2", true, &[])];

        let reports = vec![report("s1", "p1", 8.5, &[]), report("s2", "p2", 6.0, &[])];
        let m = aggregate(1, &personas, &sims, &reports, &bands);
        assert!(m.targets_met());
        assert_eq!(m.bands.iter().find(|b| b.name == "moderate").unwrap().personas, 0);

        let reports = vec![report("s1", "p1", 7.9, &[]), report("s2", "p2", 6.0, &[])];
        let m = aggregate(1, &personas, &sims, &reports, &bands);
        assert!(!m.targets_met());
    }

    #[test]
    fn test_no_bands_never_meets_targets() {
        let m = aggregate(1, &[], &[], &[], &[]);
        assert!(!m.targets_met());
        assert_eq!(m.mean_satisfaction, 0.0);
        assert_eq!(m.success_rate, 0.0);
    }

    #[test]
    fn test_suggestions_grouped_by_module() {
        let mut r1 = report("s1", "p1", 5.0, &[]);
        r1.suggestions = vec![Suggestion {
            module: Some("cover_letter".into()),
            text: "Shorter letters".into(),
            priority: 3,
        }];
        let mut r2 = report("s2", "p2", 5.0, &[]);
        r2.suggestions = vec![
            Suggestion {
                module: Some("cover_letter".into()),
                text: "shorter letters.".into(),
                priority: 1,
            },
            Suggestion {
                module: None,
                text: "Faster".into(),
                priority: 4,
            },
        ];
        let m = aggregate(1, &[], &[], &[r1, r2], &[]);
        assert_eq!(m.top_suggestions[0].count, 2);
        assert_eq!(m.top_suggestions[0].priority, 1);
        assert_eq!(m.suggestions_for("cover_letter").len(), 2);
        assert_eq!(m.suggestions_for("job_matcher").len(), 1);
    }
}
