//! Filter subset and parameter search.
//!
//! Every optimizer shares one contract: a caller-supplied objective evaluates
//! a (filter subset, parameter assignment) pair by running a backtest and
//! returning its metrics. Strategies differ only in how they walk the space.
//! Trial accounting lives in [`TrialLog`] so best tracking, failure handling
//! and baseline comparison behave identically everywhere.

pub mod genetic;
pub mod grid;
pub mod integrated;
pub mod smbo;

pub use genetic::GeneticOptimizer;
pub use grid::GridSearchOptimizer;
pub use integrated::IntegratedOptimizer;
pub use smbo::SmboOptimizer;

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::{SearchConfig, StrategyKind};
use crate::domain::errors::SearchError;
use crate::domain::filters::FilterCandidate;
use crate::domain::metrics::{self, MetricDirection};

/// Inclusive numeric range for one tunable parameter.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ParamRange {
    pub min: f64,
    pub max: f64,
}

impl ParamRange {
    pub fn new(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.clamp(self.min, self.max)
    }

    /// Evenly spaced points across the range, endpoints included.
    pub fn grid_points(&self, resolution: usize) -> Vec<f64> {
        if resolution < 2 || self.span() <= f64::EPSILON {
            return vec![self.min];
        }
        let step = self.span() / (resolution - 1) as f64;
        (0..resolution).map(|i| self.min + step * i as f64).collect()
    }
}

/// What an optimizer may vary: which filters to enable together and the
/// numeric parameters attached to the run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchSpace {
    pub parameters: BTreeMap<String, ParamRange>,
    /// Smallest filter subset evaluated per trial.
    pub min_filters: usize,
    /// Largest filter subset evaluated per trial.
    pub max_filters: usize,
}

impl SearchSpace {
    pub fn filter_only(min_filters: usize, max_filters: usize) -> Self {
        Self {
            parameters: BTreeMap::new(),
            min_filters,
            max_filters,
        }
    }

    pub fn with_parameter(mut self, name: &str, min: f64, max: f64) -> Self {
        self.parameters
            .insert(name.to_string(), ParamRange::new(min, max));
        self
    }

    /// Largest subset size actually reachable for a pool of `pool` candidates.
    pub fn effective_max(&self, pool: usize) -> usize {
        self.max_filters.min(pool)
    }

    pub fn validate(&self, pool: usize) -> Result<(), SearchError> {
        if pool == 0 {
            return Err(SearchError::InvalidSpace {
                reason: "candidate pool is empty".to_string(),
            });
        }
        for (name, range) in &self.parameters {
            if !range.min.is_finite() || !range.max.is_finite() || range.min > range.max {
                return Err(SearchError::InvalidSpace {
                    reason: format!(
                        "parameter '{}' has invalid range {}..{}",
                        name, range.min, range.max
                    ),
                });
            }
        }
        if self.min_filters > self.effective_max(pool) {
            return Err(SearchError::FilterRange {
                min: self.min_filters,
                max: self.max_filters,
                pool,
            });
        }
        Ok(())
    }
}

/// One objective evaluation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationTrial {
    pub index: usize,
    /// Names of the filters enabled for this trial.
    pub filters: Vec<String>,
    pub parameters: BTreeMap<String, f64>,
    pub metrics: HashMap<String, f64>,
    pub score: f64,
    /// True when this trial set a new running best at the time it finished.
    pub is_best: bool,
}

/// Outcome of one optimizer run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub strategy: String,
    pub trials: Vec<OptimizationTrial>,
    pub best: Option<OptimizationTrial>,
    pub best_score: f64,
    pub total_trials: usize,
    pub baseline_score: Option<f64>,
    pub improvement_over_baseline: Option<f64>,
    pub elapsed: Duration,
    /// Per-parameter importance estimates, when the strategy produces them.
    pub parameter_importances: BTreeMap<String, f64>,
}

impl OptimizationResult {
    pub fn best_filters(&self) -> &[String] {
        self.best.as_ref().map(|t| t.filters.as_slice()).unwrap_or(&[])
    }

    pub fn best_parameters(&self) -> BTreeMap<String, f64> {
        self.best
            .as_ref()
            .map(|t| t.parameters.clone())
            .unwrap_or_default()
    }
}

/// Caller-supplied evaluation: run a backtest with the given filter subset
/// and parameter assignment, returning the resulting metrics keyed by name.
pub type Objective<'a> = dyn FnMut(&[FilterCandidate], &BTreeMap<String, f64>) -> anyhow::Result<HashMap<String, f64>>
    + 'a;

/// Common optimizer contract. Implementations are single-threaded and
/// deterministic for a fixed seed.
pub trait SearchStrategy {
    fn name(&self) -> &'static str;

    fn optimize(
        &mut self,
        candidates: &[FilterCandidate],
        space: &SearchSpace,
        baseline: Option<f64>,
        objective: &mut Objective<'_>,
    ) -> Result<OptimizationResult, SearchError>;
}

/// Builds the optimizer selected by the configuration.
pub fn build_strategy(config: &SearchConfig, target: &str) -> Box<dyn SearchStrategy> {
    match config.strategy {
        StrategyKind::Grid => Box::new(GridSearchOptimizer::new(config.clone(), target)),
        StrategyKind::Genetic => Box::new(GeneticOptimizer::new(config.clone(), target)),
        StrategyKind::Smbo => Box::new(SmboOptimizer::new(config.clone(), target)),
        StrategyKind::Integrated => Box::new(IntegratedOptimizer::new(config.clone(), target)),
    }
}

/// Append-only trial history with monotonic best tracking.
#[derive(Debug, Default)]
pub struct TrialLog {
    trials: Vec<OptimizationTrial>,
    best_index: Option<usize>,
    best_score: f64,
    since_best: usize,
}

impl TrialLog {
    pub fn new() -> Self {
        Self {
            trials: Vec::new(),
            best_index: None,
            best_score: f64::NEG_INFINITY,
            since_best: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.trials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trials.is_empty()
    }

    pub fn best_score(&self) -> f64 {
        self.best_score
    }

    pub fn best(&self) -> Option<&OptimizationTrial> {
        self.best_index.map(|i| &self.trials[i])
    }

    /// Trials recorded since the last new best.
    pub fn stagnation(&self) -> usize {
        self.since_best
    }

    /// Records one finished trial. Only a strictly better finite score
    /// replaces the running best.
    pub fn record(
        &mut self,
        filters: Vec<String>,
        parameters: BTreeMap<String, f64>,
        metrics: HashMap<String, f64>,
        score: f64,
    ) -> f64 {
        let improved = score.is_finite() && score > self.best_score;
        self.trials.push(OptimizationTrial {
            index: self.trials.len(),
            filters,
            parameters,
            metrics,
            score,
            is_best: improved,
        });
        if improved {
            self.best_index = Some(self.trials.len() - 1);
            self.best_score = score;
            self.since_best = 0;
        } else {
            self.since_best += 1;
        }
        score
    }

    /// Packages the log into a result.
    pub fn finish(
        self,
        strategy: &str,
        baseline: Option<f64>,
        started: Instant,
    ) -> OptimizationResult {
        let best = self.best_index.map(|i| self.trials[i].clone());
        let improvement = match (baseline, &best) {
            (Some(base), Some(b)) => Some(b.score - base),
            _ => None,
        };
        OptimizationResult {
            strategy: strategy.to_string(),
            total_trials: self.trials.len(),
            best,
            best_score: self.best_score,
            baseline_score: baseline,
            improvement_over_baseline: improvement,
            elapsed: started.elapsed(),
            parameter_importances: BTreeMap::new(),
            trials: self.trials,
        }
    }
}

/// Scalar score for a metric map: the target metric's value, negated when a
/// smaller value is better so every strategy maximizes.
pub(crate) fn score_metrics(metrics: &HashMap<String, f64>, target: &str) -> f64 {
    match metrics.get(target) {
        Some(value) if value.is_finite() => match metrics::direction_of(target) {
            MetricDirection::LowerIsBetter => -value,
            MetricDirection::HigherIsBetter => *value,
        },
        _ => f64::NEG_INFINITY,
    }
}

/// Runs one objective evaluation and records it. A failed objective scores
/// negative infinity and can never become the best trial.
pub(crate) fn run_trial(
    log: &mut TrialLog,
    selected: &[FilterCandidate],
    parameters: BTreeMap<String, f64>,
    target: &str,
    objective: &mut Objective<'_>,
) -> f64 {
    let names: Vec<String> = selected.iter().map(|c| c.name.clone()).collect();
    match objective(selected, &parameters) {
        Ok(metrics) => {
            let score = score_metrics(&metrics, target);
            log.record(names, parameters, metrics, score)
        }
        Err(e) => {
            warn!(trial = log.len(), error = %e, "objective evaluation failed");
            log.record(names, parameters, HashMap::new(), f64::NEG_INFINITY)
        }
    }
}

/// Binomial coefficient with saturation, used to size subset spaces.
pub(crate) fn combinations(n: usize, k: usize) -> usize {
    if k > n {
        return 0;
    }
    let k = k.min(n - k);
    let mut result: usize = 1;
    for i in 0..k {
        result = result.saturating_mul(n - i) / (i + 1);
    }
    result
}
