//! Overfitting guard over the refinement history.
//!
//! Five sub-scores feed one composite: the train/validation profit gap, rule
//! complexity, profit stability across recent iterations, iteration-to-
//! iteration variance, and improvement efficiency. The guard only recommends;
//! whether a high verdict stops the loop is the orchestrator's call.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

use crate::application::analyzer::stats;
use crate::config::ValidationConfig;
use crate::domain::iteration::IterationResult;
use crate::domain::metrics::TOTAL_PROFIT;

/// Profits examined by the stability check.
const RECENT_WINDOW: usize = 5;
/// Filter count at which the count share of complexity saturates.
const FILTER_COUNT_SCALE: f64 = 10.0;
/// Condition length at which the length share of complexity saturates.
const CONDITION_LENGTH_SCALE: f64 = 500.0;

const GAP_WEIGHT: f64 = 0.35;
const COMPLEXITY_WEIGHT: f64 = 0.25;
const INSTABILITY_WEIGHT: f64 = 0.20;
const VARIANCE_WEIGHT: f64 = 0.10;
const INEFFICIENCY_WEIGHT: f64 = 0.10;

/// Warn bars for the two sub-scores without a configurable threshold.
const VARIANCE_WARN: f64 = 0.5;
const INEFFICIENCY_WARN: f64 = 0.8;

/// Severity tiers shared by the overfit guard and walk-forward validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverfitSeverity {
    None,
    Low,
    Medium,
    High,
    Critical,
}

impl OverfitSeverity {
    /// Tier for a composite overfit score in `[0, 1]`.
    pub fn from_score(score: f64) -> Self {
        if score < 0.2 {
            Self::None
        } else if score < 0.4 {
            Self::Low
        } else if score < 0.6 {
            Self::Medium
        } else if score < 0.8 {
            Self::High
        } else {
            Self::Critical
        }
    }

    pub fn is_blocking(&self) -> bool {
        matches!(self, Self::High | Self::Critical)
    }
}

impl std::fmt::Display for OverfitSeverity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        f.write_str(label)
    }
}

/// Verdict from one guard check. `warnings` and `suggestions` are aligned:
/// entry `i` of one explains entry `i` of the other.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OverfitResult {
    pub score: f64,
    pub severity: OverfitSeverity,
    pub gap_score: f64,
    pub complexity_score: f64,
    pub instability_score: f64,
    pub variance_score: f64,
    pub inefficiency_score: f64,
    /// Recommendation only; the loop decides per configuration.
    pub should_stop: bool,
    pub warnings: Vec<String>,
    pub suggestions: Vec<String>,
}

pub struct OverfitGuard {
    config: ValidationConfig,
}

impl OverfitGuard {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Scores the current iteration for overfitting. `validation` metrics are
    /// optional; without a held-out window the gap component reads zero.
    pub fn check(
        &self,
        train: &HashMap<String, f64>,
        validation: Option<&HashMap<String, f64>>,
        condition_length: usize,
        filter_count: usize,
        history: &[IterationResult],
    ) -> OverfitResult {
        let gap = gap_score(train, validation);
        let complexity = complexity_score(filter_count, condition_length);
        let profits: Vec<f64> = history.iter().map(|it| it.metric(TOTAL_PROFIT)).collect();
        let instability = instability_score(&profits);
        let variance = variance_score(&profits);
        let inefficiency = inefficiency_score(&profits, complexity);

        let score = (GAP_WEIGHT * gap
            + COMPLEXITY_WEIGHT * complexity
            + INSTABILITY_WEIGHT * instability
            + VARIANCE_WEIGHT * variance
            + INEFFICIENCY_WEIGHT * inefficiency)
            .clamp(0.0, 1.0);
        let severity = OverfitSeverity::from_score(score);

        let mut warnings = Vec::new();
        let mut suggestions = Vec::new();
        if gap > self.config.gap_threshold {
            warnings.push(format!(
                "train/validation profit gap {:.2} exceeds {:.2}",
                gap, self.config.gap_threshold
            ));
            suggestions
                .push("shrink the filter set or extend the validation window".to_string());
        }
        if complexity > self.config.complexity_threshold {
            warnings.push(format!(
                "rule complexity {:.2} exceeds {:.2}",
                complexity, self.config.complexity_threshold
            ));
            suggestions.push("remove low-impact guards or cap filters per pass".to_string());
        }
        if instability > self.config.stability_threshold {
            warnings.push(format!(
                "profit unstable across recent iterations ({:.2})",
                instability
            ));
            suggestions.push("raise min_samples so patterns rest on more trades".to_string());
        }
        if variance > VARIANCE_WARN {
            warnings.push(format!(
                "large iteration-to-iteration profit swings ({:.2})",
                variance
            ));
            suggestions.push("tighten the convergence threshold".to_string());
        }
        if inefficiency > INEFFICIENCY_WARN {
            warnings.push(format!(
                "little improvement for the complexity added ({:.2})",
                inefficiency
            ));
            suggestions
                .push("stop adding filters and revisit the remaining loss patterns".to_string());
        }

        debug!(
            score,
            severity = %severity,
            gap,
            complexity,
            instability,
            variance,
            inefficiency,
            "overfit check"
        );

        OverfitResult {
            score,
            severity,
            gap_score: gap,
            complexity_score: complexity,
            instability_score: instability,
            variance_score: variance,
            inefficiency_score: inefficiency,
            should_stop: severity.is_blocking(),
            warnings,
            suggestions,
        }
    }
}

/// Relative shortfall of validation profit against train profit, clamped to
/// `[0, 1]`. Validation beating train reads zero.
fn gap_score(train: &HashMap<String, f64>, validation: Option<&HashMap<String, f64>>) -> f64 {
    let Some(validation) = validation else {
        return 0.0;
    };
    let train_profit = train.get(TOTAL_PROFIT).copied().unwrap_or(0.0);
    let val_profit = validation.get(TOTAL_PROFIT).copied().unwrap_or(0.0);
    if train_profit.abs() < f64::EPSILON {
        return if val_profit < train_profit { 1.0 } else { 0.0 };
    }
    ((train_profit - val_profit) / train_profit.abs()).clamp(0.0, 1.0)
}

fn complexity_score(filter_count: usize, condition_length: usize) -> f64 {
    let count_share = (filter_count as f64 / FILTER_COUNT_SCALE).min(1.0);
    let length_share = (condition_length as f64 / CONDITION_LENGTH_SCALE).min(1.0);
    0.6 * count_share + 0.4 * length_share
}

/// Coefficient of variation over the most recent profits. Needs at least
/// three iterations to say anything.
fn instability_score(profits: &[f64]) -> f64 {
    if profits.len() < 3 {
        return 0.0;
    }
    let start = profits.len().saturating_sub(RECENT_WINDOW);
    stats::coefficient_of_variation(&profits[start..]).clamp(0.0, 1.0)
}

/// Mean absolute consecutive profit swing, normalized by the mean profit
/// magnitude.
fn variance_score(profits: &[f64]) -> f64 {
    if profits.len() < 2 {
        return 0.0;
    }
    let swings: Vec<f64> = profits.windows(2).map(|w| (w[1] - w[0]).abs()).collect();
    let magnitudes: Vec<f64> = profits.iter().map(|p| p.abs()).collect();
    let magnitude = stats::mean(&magnitudes);
    if magnitude < f64::EPSILON {
        return 0.0;
    }
    (stats::mean(&swings) / magnitude).clamp(0.0, 1.0)
}

/// One minus the improvement earned per unit of complexity. Flat or negative
/// improvement with a complex rule reads 1.0.
fn inefficiency_score(profits: &[f64], complexity: f64) -> f64 {
    if profits.len() < 2 {
        return 0.0;
    }
    let first = profits[0];
    let last = profits[profits.len() - 1];
    let improvement = if first.abs() < f64::EPSILON {
        if last > first { 1.0 } else { 0.0 }
    } else {
        ((last - first) / first.abs()).max(0.0)
    };
    let efficiency = improvement / complexity.max(0.1);
    (1.0 - efficiency).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::time::Duration;

    fn iteration(index: usize, profit: f64) -> IterationResult {
        let mut metrics = HashMap::new();
        metrics.insert(TOTAL_PROFIT.to_string(), profit);
        IterationResult {
            index,
            rule: String::new(),
            accepted: Vec::new(),
            metrics,
            ledger: None,
            duration: Duration::from_millis(1),
            finished_at: Utc::now(),
        }
    }

    fn metrics_with_profit(profit: f64) -> HashMap<String, f64> {
        let mut m = HashMap::new();
        m.insert(TOTAL_PROFIT.to_string(), profit);
        m
    }

    #[test]
    fn test_severity_tiers() {
        assert_eq!(OverfitSeverity::from_score(0.0), OverfitSeverity::None);
        assert_eq!(OverfitSeverity::from_score(0.19), OverfitSeverity::None);
        assert_eq!(OverfitSeverity::from_score(0.2), OverfitSeverity::Low);
        assert_eq!(OverfitSeverity::from_score(0.45), OverfitSeverity::Medium);
        assert_eq!(OverfitSeverity::from_score(0.65), OverfitSeverity::High);
        assert_eq!(OverfitSeverity::from_score(0.8), OverfitSeverity::Critical);
        assert!(!OverfitSeverity::Medium.is_blocking());
        assert!(OverfitSeverity::High.is_blocking());
        assert!(OverfitSeverity::Critical.is_blocking());
    }

    #[test]
    fn test_clean_run_scores_low() {
        let guard = OverfitGuard::new(&ValidationConfig::default());
        let history = vec![
            iteration(1, 900.0),
            iteration(2, 950.0),
            iteration(3, 1000.0),
        ];
        let result = guard.check(
            &metrics_with_profit(1000.0),
            Some(&metrics_with_profit(950.0)),
            80,
            2,
            &history,
        );
        assert!(result.score < 0.2, "composite {}", result.score);
        assert_eq!(result.severity, OverfitSeverity::None);
        assert!(!result.should_stop);
        assert!(result.warnings.is_empty());
        assert!(result.suggestions.is_empty());
    }

    #[test]
    fn test_gap_score_against_validation() {
        let guard = OverfitGuard::new(&ValidationConfig::default());
        let result = guard.check(
            &metrics_with_profit(1000.0),
            Some(&metrics_with_profit(100.0)),
            0,
            0,
            &[],
        );
        assert!((result.gap_score - 0.9).abs() < 1e-9);
        assert!((result.score - 0.315).abs() < 1e-9);
        assert_eq!(result.severity, OverfitSeverity::Low);
        assert_eq!(result.warnings.len(), 1);
        assert!(result.warnings[0].contains("profit gap"));
    }

    #[test]
    fn test_missing_validation_reads_zero_gap() {
        let guard = OverfitGuard::new(&ValidationConfig::default());
        let result = guard.check(&metrics_with_profit(1000.0), None, 0, 0, &[]);
        assert_eq!(result.gap_score, 0.0);
        assert_eq!(result.score, 0.0);
        assert_eq!(result.severity, OverfitSeverity::None);
    }

    #[test]
    fn test_complexity_formula() {
        assert_eq!(complexity_score(0, 0), 0.0);
        assert!((complexity_score(5, 250) - 0.5).abs() < 1e-12);
        assert!((complexity_score(20, 1000) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_instability_needs_three_iterations() {
        assert_eq!(instability_score(&[100.0, 200.0]), 0.0);
        assert_eq!(instability_score(&[100.0, 100.0, 100.0]), 0.0);
        let score = instability_score(&[0.0, 100.0, 200.0]);
        assert!(score > 0.5, "spread profits are unstable: {}", score);
    }

    #[test]
    fn test_instability_looks_at_recent_window_only() {
        // Wild early history, flat last five.
        let profits = [1000.0, -1000.0, 100.0, 100.0, 100.0, 100.0, 100.0];
        assert_eq!(instability_score(&profits), 0.0);
    }

    #[test]
    fn test_variance_score_swings() {
        assert_eq!(variance_score(&[100.0]), 0.0);
        assert_eq!(variance_score(&[100.0, 100.0]), 0.0);
        assert_eq!(variance_score(&[100.0, -100.0, 100.0]), 1.0);
    }

    #[test]
    fn test_inefficiency_flat_and_earned() {
        assert_eq!(inefficiency_score(&[500.0], 0.5), 0.0);
        assert_eq!(inefficiency_score(&[500.0, 500.0], 0.5), 1.0);
        assert_eq!(inefficiency_score(&[100.0, 200.0], 0.2), 0.0);
    }

    #[test]
    fn test_severe_degradation_recommends_stop() {
        let guard = OverfitGuard::new(&ValidationConfig::default());
        let history = vec![
            iteration(1, 1000.0),
            iteration(2, -500.0),
            iteration(3, 800.0),
            iteration(4, -300.0),
            iteration(5, 900.0),
        ];
        let result = guard.check(
            &metrics_with_profit(1000.0),
            Some(&metrics_with_profit(-200.0)),
            800,
            12,
            &history,
        );
        assert_eq!(result.gap_score, 1.0);
        assert_eq!(result.complexity_score, 1.0);
        assert_eq!(result.instability_score, 1.0);
        assert_eq!(result.variance_score, 1.0);
        assert_eq!(result.inefficiency_score, 1.0);
        assert_eq!(result.score, 1.0);
        assert_eq!(result.severity, OverfitSeverity::Critical);
        assert!(result.should_stop);
        assert_eq!(result.warnings.len(), 5);
        assert_eq!(result.warnings.len(), result.suggestions.len());
    }
}
