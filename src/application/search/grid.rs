//! Exhaustive grid search.
//!
//! Enumerates every filter subset within the configured count range crossed
//! with evenly spaced parameter grid points. Supports a hard trial cap and an
//! early stop after a run of non-improving trials.

use std::collections::BTreeMap;
use std::time::Instant;

use tracing::{debug, info};

use crate::config::SearchConfig;
use crate::domain::errors::SearchError;
use crate::domain::filters::FilterCandidate;

use super::{Objective, OptimizationResult, SearchSpace, SearchStrategy, TrialLog, run_trial};

pub struct GridSearchOptimizer {
    config: SearchConfig,
    target: String,
}

impl GridSearchOptimizer {
    pub fn new(config: SearchConfig, target: &str) -> Self {
        Self {
            config,
            target: target.to_string(),
        }
    }
}

impl SearchStrategy for GridSearchOptimizer {
    fn name(&self) -> &'static str {
        "grid"
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

        let subsets = filter_subsets(
            candidates.len(),
            space.min_filters,
            space.effective_max(candidates.len()),
        );
        let combos = parameter_grid(space, self.config.grid_resolution);
        info!(
            subsets = subsets.len(),
            parameter_combos = combos.len(),
            trials = subsets.len() * combos.len(),
            "starting grid search"
        );

        let mut log = TrialLog::new();
        'outer: for subset in &subsets {
            let selected: Vec<FilterCandidate> =
                subset.iter().map(|&i| candidates[i].clone()).collect();
            for combo in &combos {
                if self.config.max_trials > 0 && log.len() >= self.config.max_trials {
                    debug!(cap = self.config.max_trials, "grid trial cap reached");
                    break 'outer;
                }
                run_trial(&mut log, &selected, combo.clone(), &self.target, objective);
                if self.config.early_stop_after > 0
                    && log.stagnation() >= self.config.early_stop_after
                {
                    debug!(
                        stagnant = log.stagnation(),
                        "grid early stop, no recent improvement"
                    );
                    break 'outer;
                }
            }
        }

        Ok(log.finish(self.name(), baseline, started))
    }
}

/// All index subsets of `0..pool` with size in `min..=max`, in lexicographic
/// order per size.
fn filter_subsets(pool: usize, min: usize, max: usize) -> Vec<Vec<usize>> {
    let mut out = Vec::new();
    for k in min..=max.min(pool) {
        subsets_of_size(pool, k, &mut out);
    }
    out
}

fn subsets_of_size(pool: usize, k: usize, out: &mut Vec<Vec<usize>>) {
    if k == 0 {
        out.push(Vec::new());
        return;
    }
    if k > pool {
        return;
    }
    let mut indices: Vec<usize> = (0..k).collect();
    loop {
        out.push(indices.clone());
        let mut pos = k;
        while pos > 0 && indices[pos - 1] == pool - k + pos - 1 {
            pos -= 1;
        }
        if pos == 0 {
            return;
        }
        indices[pos - 1] += 1;
        for j in pos..k {
            indices[j] = indices[j - 1] + 1;
        }
    }
}

/// Cartesian product of per-parameter grid points. A space without numeric
/// parameters yields a single empty assignment.
fn parameter_grid(space: &SearchSpace, resolution: usize) -> Vec<BTreeMap<String, f64>> {
    let mut combos: Vec<BTreeMap<String, f64>> = vec![BTreeMap::new()];
    for (name, range) in &space.parameters {
        let points = range.grid_points(resolution);
        let mut next = Vec::with_capacity(combos.len() * points.len());
        for combo in &combos {
            for &point in &points {
                let mut assignment = combo.clone();
                assignment.insert(name.clone(), point);
                next.push(assignment);
            }
        }
        combos = next;
    }
    combos
}
