//! Configuration module for the refinement engine.
//!
//! One validated, immutable bundle of run parameters, built once and passed
//! by reference into each component. Loadable from TOML for scripted runs.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Convergence policy selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    ImprovementRate,
    AbsoluteChange,
    ConsecutiveNoImprove,
}

impl FromStr for PolicyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "improvement_rate" | "improvement-rate" => Ok(PolicyKind::ImprovementRate),
            "absolute_change" | "absolute-change" => Ok(PolicyKind::AbsoluteChange),
            "consecutive_no_improve" | "consecutive-no-improve" => {
                Ok(PolicyKind::ConsecutiveNoImprove)
            }
            _ => anyhow::bail!(
                "Invalid convergence policy: {}. Must be 'improvement_rate', 'absolute_change', or 'consecutive_no_improve'",
                s
            ),
        }
    }
}

/// Optimizer selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrategyKind {
    Grid,
    Genetic,
    Smbo,
    Integrated,
}

impl FromStr for StrategyKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "grid" => Ok(StrategyKind::Grid),
            "genetic" => Ok(StrategyKind::Genetic),
            "smbo" | "bayesian" => Ok(StrategyKind::Smbo),
            "integrated" | "auto" => Ok(StrategyKind::Integrated),
            _ => anyhow::bail!(
                "Invalid search strategy: {}. Must be 'grid', 'genetic', 'smbo', or 'integrated'",
                s
            ),
        }
    }
}

/// How the integrated dispatcher combines results in ensemble mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnsembleMode {
    Best,
    Weighted,
    Majority,
}

impl FromStr for EnsembleMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "best" => Ok(EnsembleMode::Best),
            "weighted" => Ok(EnsembleMode::Weighted),
            "majority" => Ok(EnsembleMode::Majority),
            _ => anyhow::bail!(
                "Invalid ensemble mode: {}. Must be 'best', 'weighted', or 'majority'",
                s
            ),
        }
    }
}

/// Final candidate selection: by composite score or by priority tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
    Score,
    Priority,
}

impl FromStr for SelectionMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "score" => Ok(SelectionMode::Score),
            "priority" => Ok(SelectionMode::Priority),
            _ => anyhow::bail!("Invalid selection mode: {}. Must be 'score' or 'priority'", s),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// Minimum subset size before a bucket or cut is considered.
    pub min_samples: usize,
    /// Time-bucket loss ratio must exceed baseline by this factor.
    pub time_margin: f64,
    /// Threshold/range cut loss ratio must exceed baseline by this factor.
    pub threshold_margin: f64,
    /// Compound pattern loss ratio must exceed baseline by this factor.
    pub compound_margin: f64,
    /// Confidence floor for the basic hourly pass.
    pub confidence_floor: f64,
    /// Confidence floor for the advanced passes.
    pub advanced_confidence_floor: f64,
    /// Run 5-minute, weekday, session and compound mining.
    pub advanced_pass: bool,
    /// Hard cap on returned patterns.
    pub max_patterns: usize,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            min_samples: 5,
            time_margin: 1.2,
            threshold_margin: 1.1,
            compound_margin: 1.2,
            confidence_floor: 0.3,
            advanced_confidence_floor: 0.2,
            advanced_pass: true,
            max_patterns: 50,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FilterConfig {
    /// Candidates merged per iteration.
    pub max_per_iteration: usize,
    pub prune_correlated: bool,
    pub estimate_synergy: bool,
    pub selection: SelectionMode,
    /// Relative difference under which same-feature thresholds collapse.
    pub similarity_bar: f64,
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            max_per_iteration: 3,
            prune_correlated: true,
            estimate_synergy: true,
            selection: SelectionMode::Score,
            similarity_bar: 0.15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConvergenceConfig {
    pub policy: PolicyKind,
    /// Relative change threshold (0.05 = 5%) or absolute change, per policy.
    pub threshold: f64,
    /// Consecutive non-improving iterations tolerated by the counter policy.
    pub no_improve_limit: usize,
    /// History length required before any verdict.
    pub min_iterations: usize,
}

impl Default for ConvergenceConfig {
    fn default() -> Self {
        Self {
            policy: PolicyKind::ImprovementRate,
            threshold: 0.05,
            no_improve_limit: 3,
            min_iterations: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub strategy: StrategyKind,
    /// All optimizers are deterministic given this seed.
    pub seed: u64,
    /// Grid points per numeric parameter dimension.
    pub grid_resolution: usize,
    /// Trial cap for exhaustive grid runs. 0 means unlimited.
    pub max_trials: usize,
    /// Grid early stop after this many consecutive non-improving trials.
    pub early_stop_after: usize,
    pub population: usize,
    pub generations: usize,
    pub mutation_rate: f64,
    pub crossover_rate: f64,
    pub elite: usize,
    pub tournament: usize,
    /// Genetic early stop after this many generations without a new best.
    pub stagnation_limit: usize,
    pub smbo_trials: usize,
    /// Trials required before per-parameter importances are reported.
    pub smbo_importance_after: usize,
    pub ensemble: Option<EnsembleMode>,
    /// Dispatcher: exhaustive grid when the estimated space is at most this.
    pub grid_limit: usize,
    /// Dispatcher: genetic when the candidate pool is larger than this.
    pub large_pool: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            strategy: StrategyKind::Integrated,
            seed: 42,
            grid_resolution: 3,
            max_trials: 500,
            early_stop_after: 50,
            population: 20,
            generations: 30,
            mutation_rate: 0.1,
            crossover_rate: 0.7,
            elite: 2,
            tournament: 3,
            stagnation_limit: 10,
            smbo_trials: 60,
            smbo_importance_after: 20,
            ensemble: None,
            grid_limit: 200,
            large_pool: 15,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    /// Train/validation profit gap above which the guard warns.
    pub gap_threshold: f64,
    pub complexity_threshold: f64,
    pub stability_threshold: f64,
    /// Stop the loop on a high/critical overfit verdict.
    pub stop_on_overfit: bool,
    pub wf_folds: usize,
    pub wf_train_ratio: f64,
    /// Mean walk-forward overfit ratio accepted as robust.
    pub wf_max_gap: f64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            gap_threshold: 0.3,
            complexity_threshold: 0.6,
            stability_threshold: 0.5,
            stop_on_overfit: false,
            wf_folds: 5,
            wf_train_ratio: 0.75,
            wf_max_gap: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub enabled: bool,
    pub directory: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            directory: PathBuf::from("refine_runs"),
        }
    }
}

/// Main refinement configuration. Built once, read-only afterwards.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RefinementConfig {
    /// Hard iteration cap for the orchestrator loop.
    pub max_iterations: usize,
    /// Metric steering convergence and comparison verdicts.
    pub target_metric: String,
    /// Retain each iteration's ledger in memory.
    pub keep_ledgers: bool,
    /// Let the optional statistical collaborator use model-based suggestions.
    pub allow_ml: bool,
    pub analyzer: AnalyzerConfig,
    pub filtering: FilterConfig,
    pub convergence: ConvergenceConfig,
    pub search: SearchConfig,
    pub validation: ValidationConfig,
    pub persistence: PersistenceConfig,
}

impl Default for RefinementConfig {
    fn default() -> Self {
        Self {
            max_iterations: 5,
            target_metric: crate::domain::metrics::TOTAL_PROFIT.to_string(),
            keep_ledgers: false,
            allow_ml: false,
            analyzer: AnalyzerConfig::default(),
            filtering: FilterConfig::default(),
            convergence: ConvergenceConfig::default(),
            search: SearchConfig::default(),
            validation: ValidationConfig::default(),
            persistence: PersistenceConfig::default(),
        }
    }
}

impl RefinementConfig {
    pub fn from_toml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_iterations == 0 {
            anyhow::bail!("max_iterations must be at least 1");
        }
        if self.target_metric.trim().is_empty() {
            anyhow::bail!("target_metric must not be empty");
        }
        if self.convergence.threshold <= 0.0 {
            anyhow::bail!(
                "convergence threshold must be positive, got {}",
                self.convergence.threshold
            );
        }
        if self.convergence.min_iterations < 2 {
            anyhow::bail!("convergence min_iterations must be at least 2");
        }
        if self.convergence.no_improve_limit == 0 {
            anyhow::bail!("no_improve_limit must be at least 1");
        }
        if self.filtering.max_per_iteration == 0 {
            anyhow::bail!("max_per_iteration must be at least 1");
        }
        if !(0.0..1.0).contains(&self.filtering.similarity_bar) {
            anyhow::bail!(
                "similarity_bar must be in [0, 1), got {}",
                self.filtering.similarity_bar
            );
        }
        if self.analyzer.min_samples == 0 {
            anyhow::bail!("analyzer min_samples must be at least 1");
        }
        if self.analyzer.time_margin < 1.0
            || self.analyzer.threshold_margin < 1.0
            || self.analyzer.compound_margin < 1.0
        {
            anyhow::bail!("analyzer margins must be at least 1.0");
        }
        if self.search.grid_resolution < 2 {
            anyhow::bail!("grid_resolution must be at least 2");
        }
        if self.search.population < 4 {
            anyhow::bail!("population must be at least 4");
        }
        if self.search.elite >= self.search.population {
            anyhow::bail!(
                "elite ({}) must be smaller than population ({})",
                self.search.elite,
                self.search.population
            );
        }
        if self.search.tournament < 2 {
            anyhow::bail!("tournament size must be at least 2");
        }
        if !(0.0..=1.0).contains(&self.search.mutation_rate)
            || !(0.0..=1.0).contains(&self.search.crossover_rate)
        {
            anyhow::bail!("mutation_rate and crossover_rate must be in [0, 1]");
        }
        if self.search.smbo_trials == 0 {
            anyhow::bail!("smbo_trials must be at least 1");
        }
        if self.validation.wf_folds < 2 {
            anyhow::bail!("wf_folds must be at least 2");
        }
        if !(0.0..1.0).contains(&self.validation.wf_train_ratio)
            || self.validation.wf_train_ratio == 0.0
        {
            anyhow::bail!(
                "wf_train_ratio must be in (0, 1), got {}",
                self.validation.wf_train_ratio
            );
        }
        Ok(())
    }
}
