//! Metric-delta comparison between two iterations.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::domain::iteration::IterationResult;
use crate::domain::metrics::{direction_of, weight_of, MetricDirection, KEY_METRICS};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricChange {
    pub metric: String,
    pub previous: f64,
    pub current: f64,
    pub absolute_change: f64,
    /// Fractional change relative to the previous value; 0.05 means +5%.
    /// Saturates at +-1 when the previous value was zero.
    pub percent_change: f64,
    pub improved: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComparisonResult {
    /// One entry per metric present in either iteration, name-ordered.
    pub changes: Vec<MetricChange>,
    pub overall_improved: bool,
    /// Metric-weighted average of clipped fractional changes, sign-flipped
    /// for lower-is-better metrics. Always in [-1, 1].
    pub improvement_score: f64,
}

impl ComparisonResult {
    pub fn change_for(&self, metric: &str) -> Option<&MetricChange> {
        self.changes.iter().find(|c| c.metric == metric)
    }
}

/// Compares iteration metric maps under the per-metric direction table.
pub struct ResultComparator {
    target_metric: Option<String>,
}

impl ResultComparator {
    pub fn new(target_metric: Option<String>) -> Self {
        Self { target_metric }
    }

    pub fn compare(&self, previous: &IterationResult, current: &IterationResult) -> ComparisonResult {
        self.compare_maps(&previous.metrics, &current.metrics)
    }

    pub fn compare_maps(
        &self,
        previous: &HashMap<String, f64>,
        current: &HashMap<String, f64>,
    ) -> ComparisonResult {
        let keys: BTreeSet<&str> = previous
            .keys()
            .chain(current.keys())
            .map(|k| k.as_str())
            .collect();

        let mut changes = Vec::with_capacity(keys.len());
        for key in keys {
            let prev = previous.get(key).copied().unwrap_or(0.0);
            let cur = current.get(key).copied().unwrap_or(0.0);
            let absolute = cur - prev;
            let percent = if prev.abs() > f64::EPSILON {
                absolute / prev.abs()
            } else if absolute.abs() > f64::EPSILON {
                absolute.signum()
            } else {
                0.0
            };
            let improved = match direction_of(key) {
                MetricDirection::HigherIsBetter => cur > prev,
                MetricDirection::LowerIsBetter => cur < prev,
            };
            changes.push(MetricChange {
                metric: key.to_string(),
                previous: prev,
                current: cur,
                absolute_change: absolute,
                percent_change: percent,
                improved,
            });
        }

        let overall_improved = self.overall_verdict(&changes);
        let improvement_score = weighted_score(&changes);

        ComparisonResult {
            changes,
            overall_improved,
            improvement_score,
        }
    }

    /// Target metric's own verdict when configured and present, majority
    /// vote over the key metrics otherwise.
    fn overall_verdict(&self, changes: &[MetricChange]) -> bool {
        if let Some(target) = &self.target_metric {
            if let Some(change) = changes.iter().find(|c| &c.metric == target) {
                return change.improved;
            }
        }
        let mut improved = 0usize;
        let mut total = 0usize;
        for key in KEY_METRICS {
            if let Some(change) = changes.iter().find(|c| c.metric == *key) {
                total += 1;
                if change.improved {
                    improved += 1;
                }
            }
        }
        total > 0 && improved * 2 > total
    }
}

fn weighted_score(changes: &[MetricChange]) -> f64 {
    let mut weighted = 0.0;
    let mut weight_sum = 0.0;
    for change in changes {
        let weight = weight_of(&change.metric);
        let clipped = change.percent_change.clamp(-1.0, 1.0);
        let signed = match direction_of(&change.metric) {
            MetricDirection::HigherIsBetter => clipped,
            MetricDirection::LowerIsBetter => -clipped,
        };
        weighted += weight * signed;
        weight_sum += weight;
    }
    if weight_sum == 0.0 {
        return 0.0;
    }
    (weighted / weight_sum).clamp(-1.0, 1.0)
}
