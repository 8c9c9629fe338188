// src/core/convergence.rs — When the loop may stop

use super::types::IterationRecord;
use crate::infra::config::LoopSettings;

/// Tolerance for float comparisons against thresholds.
const EPS: f64 = 1e-9;

/// Records needed before convergence may be declared.
pub const MIN_HISTORY: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergencePolicy {
    /// Mean of the last two scores at or above this converges.
    pub threshold: f64,
    /// Lower bar that converges when the last iteration changed nothing.
    pub stable_threshold: f64,
}

impl Default for ConvergencePolicy {
    fn default() -> Self {
        Self {
            threshold: 0.85,
            stable_threshold: 0.70,
        }
    }
}

impl From<&LoopSettings> for ConvergencePolicy {
    fn from(s: &LoopSettings) -> Self {
        Self {
            threshold: s.convergence_threshold,
            stable_threshold: s.stable_convergence_threshold,
        }
    }
}

/// The part of an iteration record convergence looks at.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConvergencePoint {
    pub score: f64,
    pub changes: usize,
}

impl From<&IterationRecord> for ConvergencePoint {
    fn from(r: &IterationRecord) -> Self {
        Self {
            score: r.convergence_score,
            changes: r.changes_proposed,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConvergenceVerdict {
    InsufficientHistory,
    Converged { mean: f64 },
    /// Reached the lower bar with no changes in the last iteration.
    StableConverged { mean: f64 },
    NotConverged { mean: f64 },
}

impl ConvergenceVerdict {
    pub fn is_converged(&self) -> bool {
        matches!(
            self,
            ConvergenceVerdict::Converged { .. } | ConvergenceVerdict::StableConverged { .. }
        )
    }

    pub fn mean(&self) -> Option<f64> {
        match self {
            ConvergenceVerdict::InsufficientHistory => None,
            ConvergenceVerdict::Converged { mean }
            | ConvergenceVerdict::StableConverged { mean }
            | ConvergenceVerdict::NotConverged { mean } => Some(*mean),
        }
    }
}

pub fn evaluate(points: &[ConvergencePoint], policy: &ConvergencePolicy) -> ConvergenceVerdict {
    if points.len() < MIN_HISTORY {
        return ConvergenceVerdict::InsufficientHistory;
    }
    let last_two = &points[points.len() - 2..];
    let mean = (last_two[0].score + last_two[1].score) / 2.0;
    if mean + EPS >= policy.threshold {
        ConvergenceVerdict::Converged { mean }
    } else if mean + EPS >= policy.stable_threshold && last_two[1].changes == 0 {
        ConvergenceVerdict::StableConverged { mean }
    } else {
        ConvergenceVerdict::NotConverged { mean }
    }
}

pub fn has_converged(records: &[IterationRecord], policy: &ConvergencePolicy) -> bool {
    let points: Vec<ConvergencePoint> = records.iter().map(ConvergencePoint::from).collect();
    evaluate(&points, policy).is_converged()
}
