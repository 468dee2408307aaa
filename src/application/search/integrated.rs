//! Strategy dispatcher.
//!
//! Estimates the exhaustive search-space size and picks the cheapest adequate
//! optimizer: grid when the whole space fits under the configured limit,
//! genetic for very large filter pools, the sequential model elsewhere. In
//! ensemble mode it runs all three and combines their winners by best score,
//! weighted vote, or majority vote.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::info;

use crate::config::{EnsembleMode, SearchConfig};
use crate::domain::errors::SearchError;
use crate::domain::filters::FilterCandidate;

use super::{
    GeneticOptimizer, GridSearchOptimizer, Objective, OptimizationResult, SearchSpace,
    SearchStrategy, SmboOptimizer, TrialLog, combinations, run_trial,
};

pub struct IntegratedOptimizer {
    config: SearchConfig,
    target: String,
}

impl IntegratedOptimizer {
    pub fn new(config: SearchConfig, target: &str) -> Self {
        Self {
            config,
            target: target.to_string(),
        }
    }

    /// Exhaustive trial count for the space: subset combinations times
    /// parameter grid points, saturating on overflow.
    fn grid_size(&self, pool: usize, space: &SearchSpace) -> usize {
        let max = space.effective_max(pool);
        let subsets = (space.min_filters..=max)
            .fold(0usize, |acc, k| acc.saturating_add(combinations(pool, k)));
        let per_subset = (0..space.parameters.len())
            .fold(1usize, |acc, _| acc.saturating_mul(self.config.grid_resolution));
        subsets.saturating_mul(per_subset)
    }

    fn run_ensemble(
        &self,
        mode: EnsembleMode,
        candidates: &[FilterCandidate],
        space: &SearchSpace,
        baseline: Option<f64>,
        objective: &mut Objective<'_>,
    ) -> Result<OptimizationResult, SearchError> {
        let started = Instant::now();
        info!(mode = ?mode, "running ensemble search across all strategies");

        let results = vec![
            GridSearchOptimizer::new(self.config.clone(), &self.target)
                .optimize(candidates, space, baseline, objective)?,
            GeneticOptimizer::new(self.config.clone(), &self.target)
                .optimize(candidates, space, baseline, objective)?,
            SmboOptimizer::new(self.config.clone(), &self.target)
                .optimize(candidates, space, baseline, objective)?,
        ];
        for r in &results {
            info!(
                strategy = %r.strategy,
                best = r.best_score,
                trials = r.total_trials,
                "ensemble member finished"
            );
        }

        let informative: Vec<&OptimizationResult> =
            results.iter().filter(|r| r.best.is_some()).collect();
        if informative.is_empty() || matches!(mode, EnsembleMode::Best) {
            let mut winner = pick_best(results)?;
            winner.strategy = format!("ensemble_best:{}", winner.strategy);
            return Ok(winner);
        }

        let (name, weights, threshold) = match mode {
            EnsembleMode::Weighted => {
                let low = informative
                    .iter()
                    .map(|r| r.best_score)
                    .fold(f64::INFINITY, f64::min);
                let mut weights: Vec<f64> = informative
                    .iter()
                    .map(|r| r.best_score - low + 1e-9)
                    .collect();
                let total: f64 = weights.iter().sum();
                for w in &mut weights {
                    *w /= total;
                }
                ("ensemble_weighted", weights, 0.5)
            }
            EnsembleMode::Majority => {
                let weights = vec![1.0; informative.len()];
                let threshold = informative.len() as f64 / 2.0 + 0.5;
                ("ensemble_majority", weights, threshold)
            }
            EnsembleMode::Best => unreachable!(),
        };

        let chosen = vote(&informative, &weights, threshold, space, candidates.len());
        let params = blended_parameters(&informative, &weights, space);
        self.finish_combined(
            name, chosen, params, candidates, space, baseline, objective, started, results,
        )
    }

    /// Evaluates the combined configuration once. Falls back to the best
    /// member when the vote produced too small a subset.
    #[allow(clippy::too_many_arguments)]
    fn finish_combined(
        &self,
        name: &str,
        chosen: Vec<String>,
        params: BTreeMap<String, f64>,
        candidates: &[FilterCandidate],
        space: &SearchSpace,
        baseline: Option<f64>,
        objective: &mut Objective<'_>,
        started: Instant,
        members: Vec<OptimizationResult>,
    ) -> Result<OptimizationResult, SearchError> {
        if chosen.len() < space.min_filters {
            info!(
                chosen = chosen.len(),
                "ensemble vote below minimum filter count, keeping best member"
            );
            let mut winner = pick_best(members)?;
            winner.strategy = format!("ensemble_best:{}", winner.strategy);
            return Ok(winner);
        }
        let selected: Vec<FilterCandidate> = candidates
            .iter()
            .filter(|c| chosen.contains(&c.name))
            .cloned()
            .collect();
        let mut log = TrialLog::new();
        run_trial(&mut log, &selected, params, &self.target, objective);
        Ok(log.finish(name, baseline, started))
    }
}

impl SearchStrategy for IntegratedOptimizer {
    fn name(&self) -> &'static str {
        "integrated"
    }

    fn optimize(
        &mut self,
        candidates: &[FilterCandidate],
        space: &SearchSpace,
        baseline: Option<f64>,
        objective: &mut Objective<'_>,
    ) -> Result<OptimizationResult, SearchError> {
        space.validate(candidates.len())?;

        if let Some(mode) = self.config.ensemble {
            return self.run_ensemble(mode, candidates, space, baseline, objective);
        }

        let pool = candidates.len();
        let size = self.grid_size(pool, space);
        if size <= self.config.grid_limit {
            info!(size, limit = self.config.grid_limit, "space fits exhaustive grid");
            GridSearchOptimizer::new(self.config.clone(), &self.target)
                .optimize(candidates, space, baseline, objective)
        } else if pool > self.config.large_pool {
            info!(
                pool,
                threshold = self.config.large_pool,
                "large candidate pool, using genetic search"
            );
            GeneticOptimizer::new(self.config.clone(), &self.target)
                .optimize(candidates, space, baseline, objective)
        } else {
            info!(size, pool, "using sequential model-based search");
            SmboOptimizer::new(self.config.clone(), &self.target)
                .optimize(candidates, space, baseline, objective)
        }
    }
}

fn pick_best(results: Vec<OptimizationResult>) -> Result<OptimizationResult, SearchError> {
    results
        .into_iter()
        .max_by(|a, b| {
            a.best_score
                .partial_cmp(&b.best_score)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .ok_or_else(|| SearchError::Backend {
            reason: "ensemble produced no results".to_string(),
        })
}

/// Names whose accumulated vote reaches `threshold`, capped at the space's
/// maximum subset size by vote strength.
fn vote(
    members: &[&OptimizationResult],
    weights: &[f64],
    threshold: f64,
    space: &SearchSpace,
    pool: usize,
) -> Vec<String> {
    let mut votes: BTreeMap<String, f64> = BTreeMap::new();
    for (member, weight) in members.iter().zip(weights) {
        for name in member.best_filters() {
            *votes.entry(name.clone()).or_insert(0.0) += *weight;
        }
    }
    let mut chosen: Vec<(String, f64)> = votes
        .into_iter()
        .filter(|(_, v)| *v >= threshold)
        .collect();
    chosen.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
    chosen.truncate(space.effective_max(pool));
    chosen.into_iter().map(|(name, _)| name).collect()
}

/// Weighted mean of each parameter across member bests, clamped to its range.
fn blended_parameters(
    members: &[&OptimizationResult],
    weights: &[f64],
    space: &SearchSpace,
) -> BTreeMap<String, f64> {
    let mut totals: BTreeMap<String, (f64, f64)> = BTreeMap::new();
    for (member, weight) in members.iter().zip(weights) {
        for (name, value) in member.best_parameters() {
            let entry = totals.entry(name).or_insert((0.0, 0.0));
            entry.0 += value * weight;
            entry.1 += weight;
        }
    }
    totals
        .into_iter()
        .filter(|(_, (_, weight))| *weight > 0.0)
        .map(|(name, (sum, weight))| {
            let value = sum / weight;
            let value = space
                .parameters
                .get(&name)
                .map(|r| r.clamp(value))
                .unwrap_or(value);
            (name, value)
        })
        .collect()
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

    fn small_config() -> SearchConfig {
        SearchConfig {
            seed: 42,
            grid_resolution: 3,
            max_trials: 0,
            early_stop_after: 0,
            population: 6,
            generations: 2,
            elite: 1,
            tournament: 2,
            stagnation_limit: 0,
            smbo_trials: 5,
            smbo_importance_after: 100,
            ..SearchConfig::default()
        }
    }

    fn profit_objective(
        selected: &[FilterCandidate],
        params: &BTreeMap<String, f64>,
    ) -> anyhow::Result<HashMap<String, f64>> {
        let mut metrics = HashMap::new();
        metrics.insert(
            "total_profit".to_string(),
            selected.len() as f64 * 10.0 + params.values().sum::<f64>(),
        );
        Ok(metrics)
    }

    #[test]
    fn test_small_space_dispatches_to_grid() {
        let candidates = pool(2);
        let space = SearchSpace::filter_only(1, 1)
            .with_parameter("a", 0.0, 1.0)
            .with_parameter("b", 0.0, 1.0);

        let mut optimizer = IntegratedOptimizer::new(small_config(), "total_profit");
        let result = optimizer
            .optimize(&candidates, &space, None, &mut profit_objective)
            .unwrap();

        assert_eq!(result.strategy, "grid");
        assert_eq!(result.total_trials, 18);
    }

    #[test]
    fn test_large_pool_dispatches_to_genetic() {
        let candidates = pool(16);
        let space = SearchSpace::filter_only(1, 1);
        let mut cfg = small_config();
        cfg.grid_limit = 10;
        cfg.large_pool = 15;

        let mut optimizer = IntegratedOptimizer::new(cfg, "total_profit");
        let result = optimizer
            .optimize(&candidates, &space, None, &mut profit_objective)
            .unwrap();

        assert_eq!(result.strategy, "genetic");
    }

    #[test]
    fn test_middle_ground_dispatches_to_smbo() {
        let candidates = pool(3);
        let space = SearchSpace::filter_only(1, 2);
        let mut cfg = small_config();
        cfg.grid_limit = 1;
        cfg.large_pool = 15;

        let mut optimizer = IntegratedOptimizer::new(cfg, "total_profit");
        let result = optimizer
            .optimize(&candidates, &space, None, &mut profit_objective)
            .unwrap();

        assert_eq!(result.strategy, "smbo");
        assert_eq!(result.total_trials, 5);
    }

    #[test]
    fn test_grid_size_estimate() {
        let optimizer = IntegratedOptimizer::new(small_config(), "total_profit");
        let space = SearchSpace::filter_only(1, 2).with_parameter("x", 0.0, 1.0);
        // C(4,1) + C(4,2) = 10 subsets, 3 grid points each.
        assert_eq!(optimizer.grid_size(4, &space), 30);
    }

    #[test]
    fn test_ensemble_best_tags_winner() {
        let candidates = pool(1);
        let space = SearchSpace::filter_only(1, 1);
        let mut cfg = small_config();
        cfg.ensemble = Some(EnsembleMode::Best);

        let mut optimizer = IntegratedOptimizer::new(cfg, "total_profit");
        let result = optimizer
            .optimize(&candidates, &space, None, &mut profit_objective)
            .unwrap();

        assert!(
            result.strategy.starts_with("ensemble_best:"),
            "strategy was {}",
            result.strategy
        );
        let best = result.best.unwrap();
        assert_eq!(best.filters, vec!["f0".to_string()]);
    }

    #[test]
    fn test_ensemble_majority_evaluates_combined_once() {
        let candidates = pool(1);
        let space = SearchSpace::filter_only(1, 1).with_parameter("x", 0.0, 10.0);
        let mut cfg = small_config();
        cfg.ensemble = Some(EnsembleMode::Majority);

        let mut optimizer = IntegratedOptimizer::new(cfg, "total_profit");
        let result = optimizer
            .optimize(&candidates, &space, None, &mut profit_objective)
            .unwrap();

        assert_eq!(result.strategy, "ensemble_majority");
        assert_eq!(result.total_trials, 1);
        let best = result.best.unwrap();
        assert_eq!(best.filters, vec!["f0".to_string()]);
        assert!((0.0..=10.0).contains(&best.parameters["x"]));
    }

    #[test]
    fn test_ensemble_weighted_evaluates_combined_once() {
        let candidates = pool(2);
        let space = SearchSpace::filter_only(1, 2);
        let mut cfg = small_config();
        cfg.ensemble = Some(EnsembleMode::Weighted);

        let mut optimizer = IntegratedOptimizer::new(cfg, "total_profit");
        let result = optimizer
            .optimize(&candidates, &space, None, &mut profit_objective)
            .unwrap();

        assert_eq!(result.strategy, "ensemble_weighted");
        assert_eq!(result.total_trials, 1);
        // Selecting both filters dominates, so every member's best includes
        // both and the vote keeps them.
        let best = result.best.unwrap();
        assert_eq!(best.filters.len(), 2);
    }

    #[test]
    fn test_ensemble_falls_back_when_everything_fails() {
        let candidates = pool(2);
        let space = SearchSpace::filter_only(1, 1);
        let mut cfg = small_config();
        cfg.ensemble = Some(EnsembleMode::Majority);

        let mut optimizer = IntegratedOptimizer::new(cfg, "total_profit");
        let result = optimizer
            .optimize(&candidates, &space, None, &mut |_, _| {
                anyhow::bail!("executor unavailable")
            })
            .unwrap();

        assert!(result.strategy.starts_with("ensemble_best:"));
        assert!(result.best.is_none());
    }
}
