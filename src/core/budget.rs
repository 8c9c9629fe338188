// src/core/budget.rs — Time budget management

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::infra::config::BudgetConfig;
use crate::infra::errors::EngineError;

/// Fraction of the budget after which an execution counts as near timeout.
pub const DEFAULT_WARNING_RATIO: f64 = 0.7;

/// How an execution trades depth for latency.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityMode {
    Speed,
    #[default]
    Balanced,
    Quality,
}

impl PriorityMode {
    /// Hard ceiling on reasoning steps for this mode.
    pub fn step_cap(self) -> u32 {
        match self {
            PriorityMode::Speed => 2,
            PriorityMode::Balanced => 3,
            PriorityMode::Quality => 5,
        }
    }
}

impl std::fmt::Display for PriorityMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PriorityMode::Speed => write!(f, "speed"),
            PriorityMode::Balanced => write!(f, "balanced"),
            PriorityMode::Quality => write!(f, "quality"),
        }
    }
}

/// The immutable shape of a budget. Started into a [`Budget`] clock
/// when an execution begins.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeBudget {
    pub max_duration_ms: u64,
    pub warning_threshold_ms: u64,
    pub priority_mode: PriorityMode,
}

impl TimeBudget {
    pub fn new(max_duration_ms: u64, priority_mode: PriorityMode) -> Self {
        Self {
            max_duration_ms,
            warning_threshold_ms: (max_duration_ms as f64 * DEFAULT_WARNING_RATIO) as u64,
            priority_mode,
        }
    }

    pub fn with_warning_threshold(mut self, warning_threshold_ms: u64) -> Self {
        self.warning_threshold_ms = warning_threshold_ms.min(self.max_duration_ms);
        self
    }

    /// Start the clock.
    pub fn start(self) -> Budget {
        Budget::start(self)
    }
}

impl From<&BudgetConfig> for TimeBudget {
    fn from(cfg: &BudgetConfig) -> Self {
        let budget = TimeBudget::new(cfg.max_duration_ms, cfg.priority_mode);
        match cfg.warning_threshold_ms {
            Some(ms) => budget.with_warning_threshold(ms),
            None => budget,
        }
    }
}

/// A running per-execution clock. Each execution owns exactly one.
#[derive(Debug, Clone)]
pub struct Budget {
    spec: TimeBudget,
    started: Instant,
}

impl Budget {
    pub fn start(spec: TimeBudget) -> Self {
        Self {
            spec,
            started: Instant::now(),
        }
    }

    pub fn spec(&self) -> &TimeBudget {
        &self.spec
    }

    pub fn priority_mode(&self) -> PriorityMode {
        self.spec.priority_mode
    }

    /// Milliseconds since the budget started.
    pub fn elapsed(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Milliseconds left before expiry (0 once expired).
    pub fn remaining(&self) -> u64 {
        self.spec.max_duration_ms.saturating_sub(self.elapsed())
    }

    pub fn is_expired(&self) -> bool {
        self.elapsed() >= self.spec.max_duration_ms
    }

    pub fn is_near_timeout(&self) -> bool {
        self.elapsed() >= self.spec.warning_threshold_ms
    }

    pub fn has_time_for(&self, cost_ms: u64) -> bool {
        cost_ms <= self.remaining()
    }

    /// Step ceiling for the priority mode, capped by how many average steps
    /// still fit in the remaining time. Never below 1.
    pub fn recommended_max_steps(&self, avg_step_cost_ms: u64) -> u32 {
        let cap = self.spec.priority_mode.step_cap();
        if avg_step_cost_ms == 0 {
            return cap;
        }
        let fits = (self.remaining() / avg_step_cost_ms).min(u32::MAX as u64) as u32;
        cap.min(fits).max(1)
    }

    /// Race `operation` against the remaining budget. On expiry returns the
    /// fallback, or `EngineError::Timeout` when none is given.
    pub async fn with_timeout<F, T>(&self, operation: F, fallback: Option<T>) -> Result<T, EngineError>
    where
        F: Future<Output = T>,
    {
        let window = Duration::from_millis(self.remaining());
        match tokio::time::timeout(window, operation).await {
            Ok(value) => Ok(value),
            Err(_) => {
                tracing::debug!(
                    elapsed_ms = self.elapsed(),
                    budget_ms = self.spec.max_duration_ms,
                    "Budget expired during suspension point",
                );
                match fallback {
                    Some(value) => Ok(value),
                    None => Err(EngineError::Timeout {
                        elapsed_ms: self.elapsed(),
                        budget_ms: self.spec.max_duration_ms,
                    }),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn budget(ms: u64, mode: PriorityMode) -> Budget {
        TimeBudget::new(ms, mode).start()
    }

    // ─── Arithmetic ─────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_elapsed_plus_remaining_is_max() {
        let b = budget(5000, PriorityMode::Balanced);
        for step in [0u64, 100, 900, 2500, 1499] {
            tokio::time::advance(Duration::from_millis(step)).await;
            assert_eq!(b.elapsed() + b.remaining(), 5000);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_expiry() {
        let b = budget(1000, PriorityMode::Speed);
        assert!(!b.is_expired());
        tokio::time::advance(Duration::from_millis(1000)).await;
        assert!(b.is_expired());
        assert_eq!(b.remaining(), 0);
        tokio::time::advance(Duration::from_millis(500)).await;
        assert_eq!(b.remaining(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_near_timeout_default_seventy_percent() {
        let b = budget(1000, PriorityMode::Balanced);
        tokio::time::advance(Duration::from_millis(699)).await;
        assert!(!b.is_near_timeout());
        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(b.is_near_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_custom_warning_threshold() {
        let b = TimeBudget::new(1000, PriorityMode::Balanced)
            .with_warning_threshold(200)
            .start();
        tokio::time::advance(Duration::from_millis(250)).await;
        assert!(b.is_near_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_has_time_for() {
        let b = budget(5000, PriorityMode::Speed);
        tokio::time::advance(Duration::from_millis(100)).await;
        assert!(b.has_time_for(4900));
        assert!(!b.has_time_for(4901));
        assert!(!b.has_time_for(6000));
    }

    // ─── Step recommendations ───────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_recommended_steps_by_mode() {
        assert_eq!(budget(60_000, PriorityMode::Speed).recommended_max_steps(1000), 2);
        assert_eq!(budget(60_000, PriorityMode::Balanced).recommended_max_steps(1000), 3);
        assert_eq!(budget(60_000, PriorityMode::Quality).recommended_max_steps(1000), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recommended_steps_capped_by_time() {
        let b = budget(4000, PriorityMode::Quality);
        assert_eq!(b.recommended_max_steps(1000), 4);
        tokio::time::advance(Duration::from_millis(2500)).await;
        assert_eq!(b.recommended_max_steps(1000), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recommended_steps_monotonic_across_modes() {
        for remaining in [500u64, 1500, 2500, 3500, 10_000] {
            for avg in [100u64, 700, 1000, 3000] {
                let q = budget(remaining, PriorityMode::Quality).recommended_max_steps(avg);
                let bl = budget(remaining, PriorityMode::Balanced).recommended_max_steps(avg);
                let s = budget(remaining, PriorityMode::Speed).recommended_max_steps(avg);
                assert!(q >= bl && bl >= s, "remaining={remaining} avg={avg}");
            }
        }
    }

    // ─── with_timeout ───────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_completes() {
        let b = budget(1000, PriorityMode::Balanced);
        let v = b.with_timeout(async { 7 }, None).await.unwrap();
        assert_eq!(v, 7);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_uses_fallback() {
        let b = budget(1000, PriorityMode::Balanced);
        let slow = async {
            tokio::time::sleep(Duration::from_millis(5000)).await;
            1
        };
        let v = b.with_timeout(slow, Some(-1)).await.unwrap();
        assert_eq!(v, -1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_errors_without_fallback() {
        let b = budget(1000, PriorityMode::Balanced);
        let slow = async {
            tokio::time::sleep(Duration::from_millis(5000)).await;
            1
        };
        let err = b.with_timeout(slow, None).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[test]
    fn test_priority_mode_serde() {
        let m: PriorityMode = serde_json::from_str("\"quality\"").unwrap();
        assert_eq!(m, PriorityMode::Quality);
        assert_eq!(PriorityMode::Speed.to_string(), "speed");
    }
}
