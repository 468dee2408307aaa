//! Sequential model-based search.
//!
//! Delegates suggestion to a tree-structured Parzen estimator with one
//! independent axis per decision: how many filters to enable, which filter to
//! draw for each slot, and each numeric parameter. The estimator minimizes,
//! so trial scores are negated when told back and failed trials are told a
//! large finite penalty cost.

use std::collections::BTreeMap;
use std::time::Instant;

use rand::SeedableRng;
use rand::rngs::StdRng;
use tracing::info;

use crate::application::analyzer::stats;
use crate::config::SearchConfig;
use crate::domain::errors::SearchError;
use crate::domain::filters::FilterCandidate;

use super::{
    Objective, OptimizationResult, OptimizationTrial, SearchSpace, SearchStrategy, TrialLog,
    run_trial,
};

/// Cost told to the estimator for a failed trial. Finite so observations
/// stay orderable.
const FAILED_TRIAL_COST: f64 = 1e12;

pub struct SmboOptimizer {
    config: SearchConfig,
    target: String,
}

/// One tunable axis backed by its own estimator. A degenerate range carries
/// no estimator and always yields `low`.
struct Axis {
    low: f64,
    estimator: Option<tpe::TpeOptimizer>,
}

impl Axis {
    fn new(low: f64, high: f64) -> Result<Self, SearchError> {
        let estimator = if high - low > f64::EPSILON {
            let range = tpe::range(low, high).map_err(|e| SearchError::Backend {
                reason: e.to_string(),
            })?;
            Some(tpe::TpeOptimizer::new(tpe::parzen_estimator(), range))
        } else {
            None
        };
        Ok(Self { low, estimator })
    }

    fn ask(&mut self, rng: &mut StdRng) -> Result<f64, SearchError> {
        match self.estimator.as_mut() {
            Some(estimator) => estimator.ask(rng).map_err(|e| SearchError::Backend {
                reason: e.to_string(),
            }),
            None => Ok(self.low),
        }
    }

    fn tell(&mut self, value: f64, cost: f64) {
        if let Some(estimator) = self.estimator.as_mut() {
            // Out-of-range observations are dropped.
            let _ = estimator.tell(value, cost);
        }
    }
}

impl SmboOptimizer {
    pub fn new(config: SearchConfig, target: &str) -> Self {
        Self {
            config,
            target: target.to_string(),
        }
    }
}

impl SearchStrategy for SmboOptimizer {
    fn name(&self) -> &'static str {
        "smbo"
    }

    fn optimize(
        &mut self,
        candidates: &[FilterCandidate],
        space: &SearchSpace,
        baseline: Option<f64>,
        objective: &mut Objective<'_>,
    ) -> Result<OptimizationResult, SearchError> {
        space.validate(candidates.len())?;
        let started = Instant::now();
        let mut rng = StdRng::seed_from_u64(self.config.seed);

        let pool = candidates.len();
        let min = space.min_filters;
        let max = space.effective_max(pool);

        // The count axis spans min..max+1 so floor() maps evenly onto counts.
        let mut count_axis = Axis::new(min as f64, (max + 1) as f64)?;
        let mut slot_axes = (0..max)
            .map(|_| Axis::new(0.0, 1.0))
            .collect::<Result<Vec<_>, _>>()?;
        let names: Vec<String> = space.parameters.keys().cloned().collect();
        let mut param_axes = space
            .parameters
            .values()
            .map(|r| Axis::new(r.min, r.max))
            .collect::<Result<Vec<_>, _>>()?;

        info!(
            trials = self.config.smbo_trials,
            pool,
            parameters = names.len(),
            "starting sequential model-based search"
        );

        let mut log = TrialLog::new();
        for _ in 0..self.config.smbo_trials {
            let count_raw = count_axis.ask(&mut rng)?;
            let count = (count_raw.floor() as usize).clamp(min, max);

            // Draw filters one slot at a time from the shrinking pool.
            let mut remaining: Vec<usize> = (0..pool).collect();
            let mut chosen: Vec<usize> = Vec::with_capacity(count);
            let mut slot_raws: Vec<Option<f64>> = vec![None; slot_axes.len()];
            for (slot, slot_raw) in slot_raws.iter_mut().enumerate().take(count) {
                let raw = slot_axes[slot].ask(&mut rng)?;
                let pick =
                    ((raw * remaining.len() as f64).floor() as usize).min(remaining.len() - 1);
                chosen.push(remaining.remove(pick));
                *slot_raw = Some(raw);
            }
            chosen.sort_unstable();

            let mut param_raws = Vec::with_capacity(param_axes.len());
            let mut assignment = BTreeMap::new();
            for ((name, range), axis) in space.parameters.iter().zip(param_axes.iter_mut()) {
                let raw = axis.ask(&mut rng)?;
                param_raws.push(raw);
                assignment.insert(name.clone(), range.clamp(raw));
            }

            let selected: Vec<FilterCandidate> =
                chosen.iter().map(|&i| candidates[i].clone()).collect();
            let score = run_trial(&mut log, &selected, assignment, &self.target, objective);
            let cost = if score.is_finite() {
                -score
            } else {
                FAILED_TRIAL_COST
            };

            count_axis.tell(count_raw, cost);
            for (slot, raw) in slot_raws.iter().enumerate() {
                if let Some(raw) = raw {
                    slot_axes[slot].tell(*raw, cost);
                }
            }
            for (axis, raw) in param_axes.iter_mut().zip(&param_raws) {
                axis.tell(*raw, cost);
            }
        }

        let mut result = log.finish(self.name(), baseline, started);
        result.parameter_importances =
            importances(&result.trials, &names, self.config.smbo_importance_after);
        Ok(result)
    }
}

/// Absolute correlation between each parameter and the trial score, reported
/// once enough informative trials have accumulated.
fn importances(
    trials: &[OptimizationTrial],
    names: &[String],
    min_trials: usize,
) -> BTreeMap<String, f64> {
    let informative: Vec<&OptimizationTrial> =
        trials.iter().filter(|t| t.score.is_finite()).collect();
    if informative.len() < min_trials.max(2) {
        return BTreeMap::new();
    }
    let scores: Vec<f64> = informative.iter().map(|t| t.score).collect();
    let mut out = BTreeMap::new();
    for name in names {
        let values: Vec<f64> = informative
            .iter()
            .map(|t| t.parameters.get(name).copied().unwrap_or(0.0))
            .collect();
        out.insert(name.clone(), stats::pearson(&values, &scores).abs());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::filters::FilterMetadata;
    use crate::domain::patterns::PatternKind;
    use std::collections::HashMap;

    fn candidate(name: &str) -> FilterCandidate {
        FilterCandidate {
            name: name.to_string(),
            condition: "hour >= 10.0".to_string(),
            description: String::new(),
            origin: PatternKind::Hourly,
            expected_impact: 0.5,
            score: 0.5,
            priority: None,
            metadata: FilterMetadata::default(),
        }
    }

    fn pool(n: usize) -> Vec<FilterCandidate> {
        (0..n).map(|i| candidate(&format!("f{}", i))).collect()
    }

    fn config(trials: usize) -> SearchConfig {
        SearchConfig {
            seed: 42,
            smbo_trials: trials,
            smbo_importance_after: 5,
            ..SearchConfig::default()
        }
    }

    #[test]
    fn test_runs_configured_trial_count() {
        let candidates = pool(4);
        let space = SearchSpace::filter_only(1, 2).with_parameter("x", 0.0, 10.0);

        let mut optimizer = SmboOptimizer::new(config(15), "total_profit");
        let result = optimizer
            .optimize(&candidates, &space, None, &mut |selected, params| {
                let mut metrics = HashMap::new();
                metrics.insert(
                    "total_profit".to_string(),
                    selected.len() as f64 + params["x"],
                );
                Ok(metrics)
            })
            .unwrap();

        assert_eq!(result.total_trials, 15);
        assert_eq!(result.strategy, "smbo");
        assert!(result.best.is_some());
    }

    #[test]
    fn test_every_trial_respects_count_range() {
        let candidates = pool(5);
        let space = SearchSpace::filter_only(1, 3);

        let mut optimizer = SmboOptimizer::new(config(20), "total_profit");
        let result = optimizer
            .optimize(&candidates, &space, None, &mut |selected, _| {
                let mut metrics = HashMap::new();
                metrics.insert("total_profit".to_string(), selected.len() as f64);
                Ok(metrics)
            })
            .unwrap();

        for trial in &result.trials {
            assert!((1..=3).contains(&trial.filters.len()));
            // No filter drawn twice within one trial.
            let mut names = trial.filters.clone();
            names.sort();
            names.dedup();
            assert_eq!(names.len(), trial.filters.len());
        }
    }

    #[test]
    fn test_fixed_count_when_min_equals_max() {
        let candidates = pool(3);
        let space = SearchSpace::filter_only(2, 2);

        let mut optimizer = SmboOptimizer::new(config(10), "total_profit");
        let result = optimizer
            .optimize(&candidates, &space, None, &mut |_, _| {
                let mut metrics = HashMap::new();
                metrics.insert("total_profit".to_string(), 1.0);
                Ok(metrics)
            })
            .unwrap();

        for trial in &result.trials {
            assert_eq!(trial.filters.len(), 2);
        }
    }

    #[test]
    fn test_deterministic_for_fixed_seed() {
        let candidates = pool(4);
        let space = SearchSpace::filter_only(1, 2).with_parameter("x", -5.0, 5.0);

        let run = || {
            let mut optimizer = SmboOptimizer::new(config(12), "total_profit");
            optimizer
                .optimize(&candidates, &space, None, &mut |selected, params| {
                    let mut metrics = HashMap::new();
                    metrics.insert(
                        "total_profit".to_string(),
                        selected.len() as f64 * 2.0 - params["x"].abs(),
                    );
                    Ok(metrics)
                })
                .unwrap()
        };
        let first = run();
        let second = run();

        let scores_a: Vec<f64> = first.trials.iter().map(|t| t.score).collect();
        let scores_b: Vec<f64> = second.trials.iter().map(|t| t.score).collect();
        assert_eq!(scores_a, scores_b);
        assert_eq!(first.best_score, second.best_score);
    }

    #[test]
    fn test_importances_reported_after_threshold() {
        let candidates = pool(2);
        // Score depends only on "x", so its importance should dominate.
        let space = SearchSpace::filter_only(1, 1)
            .with_parameter("x", 0.0, 100.0)
            .with_parameter("noise", 0.0, 1.0);

        let mut optimizer = SmboOptimizer::new(config(12), "total_profit");
        let result = optimizer
            .optimize(&candidates, &space, None, &mut |_, params| {
                let mut metrics = HashMap::new();
                metrics.insert("total_profit".to_string(), params["x"]);
                Ok(metrics)
            })
            .unwrap();

        let x_importance = result.parameter_importances["x"];
        assert!(x_importance > 0.9, "x importance was {}", x_importance);
        assert!(result.parameter_importances.contains_key("noise"));
    }

    #[test]
    fn test_all_failures_leave_no_best_and_no_importances() {
        let candidates = pool(3);
        let space = SearchSpace::filter_only(1, 2).with_parameter("x", 0.0, 1.0);

        let mut optimizer = SmboOptimizer::new(config(8), "total_profit");
        let result = optimizer
            .optimize(&candidates, &space, None, &mut |_, _| {
                anyhow::bail!("executor unavailable")
            })
            .unwrap();

        assert_eq!(result.total_trials, 8);
        assert!(result.best.is_none());
        assert!(result.parameter_importances.is_empty());
    }
}
