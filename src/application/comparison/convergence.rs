//! Run-level convergence decisions over the iteration history.

use tracing::debug;

use crate::config::{ConvergenceConfig, PolicyKind};
use crate::domain::iteration::IterationResult;

use super::comparator::ResultComparator;

/// Total-improvement floor below which a run is flagged as degrading,
/// independent of the configured policy.
const SEVERE_DEGRADATION: f64 = -0.20;

/// Closed set of convergence policies, fixed at construction.
#[derive(Debug, Clone, Copy)]
pub enum ConvergencePolicy {
    /// Converged when the target metric's fractional change falls under the
    /// threshold.
    ImprovementRate { threshold: f64 },
    /// Same test on the absolute change.
    AbsoluteChange { threshold: f64 },
    /// Converged after N consecutive non-improving iterations.
    ConsecutiveNoImprove { limit: usize },
}

impl ConvergencePolicy {
    pub fn from_config(config: &ConvergenceConfig) -> Self {
        match config.policy {
            PolicyKind::ImprovementRate => ConvergencePolicy::ImprovementRate {
                threshold: config.threshold,
            },
            PolicyKind::AbsoluteChange => ConvergencePolicy::AbsoluteChange {
                threshold: config.threshold,
            },
            PolicyKind::ConsecutiveNoImprove => ConvergencePolicy::ConsecutiveNoImprove {
                limit: config.no_improve_limit,
            },
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConvergencePolicy::ImprovementRate { .. } => "improvement_rate",
            ConvergencePolicy::AbsoluteChange { .. } => "absolute_change",
            ConvergencePolicy::ConsecutiveNoImprove { .. } => "consecutive_no_improve",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ConvergenceVerdict {
    pub converged: bool,
    /// False while the history is still too short to judge.
    pub evaluated: bool,
    /// Policy-independent early-stop flag: total improvement since the
    /// first iteration fell below -20%.
    pub degraded: bool,
    /// Latest fractional change of the target metric, when evaluated.
    pub target_change: Option<f64>,
    pub reason: String,
}

impl ConvergenceVerdict {
    fn pending(reason: impl Into<String>) -> Self {
        Self {
            converged: false,
            evaluated: false,
            degraded: false,
            target_change: None,
            reason: reason.into(),
        }
    }
}

/// Small state machine over an ordered iteration history. Everything is
/// derived from the history on each call except the consecutive-no-improve
/// counter, which `reset` clears.
pub struct ConvergenceChecker {
    policy: ConvergencePolicy,
    comparator: ResultComparator,
    target_metric: String,
    min_iterations: usize,
    no_improve_streak: usize,
}

impl ConvergenceChecker {
    pub fn new(config: &ConvergenceConfig, target_metric: &str) -> Self {
        Self {
            policy: ConvergencePolicy::from_config(config),
            comparator: ResultComparator::new(Some(target_metric.to_string())),
            target_metric: target_metric.to_string(),
            min_iterations: config.min_iterations,
            no_improve_streak: 0,
        }
    }

    pub fn policy(&self) -> &ConvergencePolicy {
        &self.policy
    }

    pub fn reset(&mut self) {
        self.no_improve_streak = 0;
    }

    pub fn check(&mut self, history: &[IterationResult]) -> ConvergenceVerdict {
        if history.len() < 2 || history.len() < self.min_iterations {
            return ConvergenceVerdict::pending(format!(
                "insufficient history ({} iterations)",
                history.len()
            ));
        }

        let previous = &history[history.len() - 2];
        let current = &history[history.len() - 1];
        let comparison = self.comparator.compare(previous, current);
        let target = comparison.change_for(&self.target_metric);
        let percent = target.map(|c| c.percent_change).unwrap_or(0.0);
        let absolute = target.map(|c| c.absolute_change).unwrap_or(0.0);

        let (converged, reason) = match self.policy {
            ConvergencePolicy::ImprovementRate { threshold } => {
                let converged = percent.abs() < threshold;
                (
                    converged,
                    format!(
                        "{} changed {:.2}% against a {:.2}% threshold",
                        self.target_metric,
                        percent * 100.0,
                        threshold * 100.0
                    ),
                )
            }
            ConvergencePolicy::AbsoluteChange { threshold } => {
                let converged = absolute.abs() < threshold;
                (
                    converged,
                    format!(
                        "{} moved {:.4} against a {:.4} threshold",
                        self.target_metric, absolute, threshold
                    ),
                )
            }
            ConvergencePolicy::ConsecutiveNoImprove { limit } => {
                if comparison.overall_improved {
                    self.no_improve_streak = 0;
                } else {
                    self.no_improve_streak += 1;
                }
                (
                    self.no_improve_streak >= limit,
                    format!(
                        "{} consecutive non-improving iterations (limit {})",
                        self.no_improve_streak, limit
                    ),
                )
            }
        };

        let degraded = self.total_degradation(history);
        debug!(
            policy = self.policy.name(),
            converged, degraded, percent, "convergence checked"
        );

        ConvergenceVerdict {
            converged,
            evaluated: true,
            degraded,
            target_change: Some(percent),
            reason,
        }
    }

    /// Change of the target metric from the first iteration to the latest.
    fn total_degradation(&self, history: &[IterationResult]) -> bool {
        let first = &history[0];
        let last = &history[history.len() - 1];
        let total = self.comparator.compare(first, last);
        total
            .change_for(&self.target_metric)
            .map(|c| c.percent_change < SEVERE_DEGRADATION)
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metrics::TOTAL_PROFIT;
    use chrono::Utc;
    use std::collections::HashMap;
    use std::time::Duration;

    fn iteration(index: usize, profit: f64) -> IterationResult {
        let mut metrics = HashMap::new();
        metrics.insert(TOTAL_PROFIT.to_string(), profit);
        metrics.insert("win_rate".to_string(), 0.5);
        IterationResult {
            index,
            rule: "return allow_entry".to_string(),
            accepted: Vec::new(),
            metrics,
            ledger: None,
            duration: Duration::from_millis(10),
            finished_at: Utc::now(),
        }
    }

    fn improvement_rate_config() -> ConvergenceConfig {
        ConvergenceConfig {
            policy: PolicyKind::ImprovementRate,
            threshold: 0.05,
            no_improve_limit: 3,
            min_iterations: 2,
        }
    }

    #[test]
    fn test_identical_metrics_converge_on_second_iteration() {
        let mut checker = ConvergenceChecker::new(&improvement_rate_config(), TOTAL_PROFIT);
        let history = vec![iteration(1, 500.0), iteration(2, 500.0)];
        let verdict = checker.check(&history);
        assert!(verdict.evaluated);
        assert!(verdict.converged);
        assert_eq!(verdict.target_change, Some(0.0));
    }

    #[test]
    fn test_single_iteration_is_pending() {
        let mut checker = ConvergenceChecker::new(&improvement_rate_config(), TOTAL_PROFIT);
        let verdict = checker.check(&[iteration(1, 500.0)]);
        assert!(!verdict.evaluated);
        assert!(!verdict.converged);
    }

    #[test]
    fn test_min_iterations_gate() {
        let mut config = improvement_rate_config();
        config.min_iterations = 3;
        let mut checker = ConvergenceChecker::new(&config, TOTAL_PROFIT);
        let history = vec![iteration(1, 500.0), iteration(2, 500.0)];
        assert!(!checker.check(&history).evaluated);
        let history = vec![iteration(1, 500.0), iteration(2, 500.0), iteration(3, 500.0)];
        assert!(checker.check(&history).converged);
    }

    #[test]
    fn test_large_move_does_not_converge() {
        let mut checker = ConvergenceChecker::new(&improvement_rate_config(), TOTAL_PROFIT);
        let history = vec![iteration(1, 500.0), iteration(2, 700.0)];
        let verdict = checker.check(&history);
        assert!(verdict.evaluated);
        assert!(!verdict.converged);
        assert!((verdict.target_change.unwrap() - 0.4).abs() < 1e-12);
    }

    #[test]
    fn test_absolute_change_policy() {
        let config = ConvergenceConfig {
            policy: PolicyKind::AbsoluteChange,
            threshold: 10.0,
            no_improve_limit: 3,
            min_iterations: 2,
        };
        let mut checker = ConvergenceChecker::new(&config, TOTAL_PROFIT);
        assert!(checker
            .check(&[iteration(1, 500.0), iteration(2, 504.0)])
            .converged);
        assert!(!checker
            .check(&[iteration(1, 500.0), iteration(2, 530.0)])
            .converged);
    }

    #[test]
    fn test_consecutive_no_improve_counts_and_resets() {
        let config = ConvergenceConfig {
            policy: PolicyKind::ConsecutiveNoImprove,
            threshold: 0.05,
            no_improve_limit: 2,
            min_iterations: 2,
        };
        let mut checker = ConvergenceChecker::new(&config, TOTAL_PROFIT);

        let mut history = vec![iteration(1, 500.0), iteration(2, 490.0)];
        assert!(!checker.check(&history).converged);

        history.push(iteration(3, 480.0));
        assert!(checker.check(&history).converged);

        checker.reset();
        assert!(!checker.check(&history).converged);
    }

    #[test]
    fn test_improvement_resets_streak() {
        let config = ConvergenceConfig {
            policy: PolicyKind::ConsecutiveNoImprove,
            threshold: 0.05,
            no_improve_limit: 2,
            min_iterations: 2,
        };
        let mut checker = ConvergenceChecker::new(&config, TOTAL_PROFIT);

        let mut history = vec![iteration(1, 500.0), iteration(2, 490.0)];
        assert!(!checker.check(&history).converged);
        history.push(iteration(3, 520.0));
        assert!(!checker.check(&history).converged);
        history.push(iteration(4, 510.0));
        assert!(!checker.check(&history).converged);
        history.push(iteration(5, 505.0));
        assert!(checker.check(&history).converged);
    }

    #[test]
    fn test_severe_degradation_flag() {
        let mut checker = ConvergenceChecker::new(&improvement_rate_config(), TOTAL_PROFIT);
        let history = vec![iteration(1, 500.0), iteration(2, 420.0), iteration(3, 350.0)];
        let verdict = checker.check(&history);
        assert!(verdict.degraded);
        // -16.7% against the previous iteration: the policy itself does not
        // converge, degradation is a separate signal.
        assert!(!verdict.converged);
    }

    #[test]
    fn test_verdict_is_deterministic_for_fixed_history() {
        let mut checker = ConvergenceChecker::new(&improvement_rate_config(), TOTAL_PROFIT);
        let history = vec![iteration(1, 500.0), iteration(2, 502.0)];
        let a = checker.check(&history);
        let b = checker.check(&history);
        assert_eq!(a.converged, b.converged);
        assert_eq!(a.target_change, b.target_change);
        assert_eq!(a.reason, b.reason);
    }
}
