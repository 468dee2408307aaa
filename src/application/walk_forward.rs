//! Walk-forward validation over rolling time folds.
//!
//! Each fold re-optimizes on its train window and is scored on both windows,
//! so the aggregate says how much of the in-sample edge survives out of
//! sample. The validator owns only the fold geometry; optimization and
//! scoring are caller-supplied closures.

use anyhow::{Result, bail};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::application::analyzer::stats;
use crate::application::overfit::OverfitSeverity;
use crate::config::ValidationConfig;
use crate::domain::ports::DateRange;

/// Picks filters and parameters from a train window.
pub type OptimizeFn<'a> =
    dyn FnMut(&[NaiveDate]) -> Result<(Vec<String>, BTreeMap<String, f64>)> + 'a;

/// Scores a filter/parameter pick over a window.
pub type EvaluateFn<'a> =
    dyn FnMut(&[String], &BTreeMap<String, f64>, &[NaiveDate]) -> Result<f64> + 'a;

/// One rolling fold: re-optimized on its train window, scored on both.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FoldResult {
    pub fold: usize,
    pub train_range: DateRange,
    pub test_range: DateRange,
    pub filters: Vec<String>,
    pub parameters: BTreeMap<String, f64>,
    pub train_score: f64,
    pub test_score: f64,
    /// (train - test) / |train|. Positive means the pick decayed out of sample.
    pub overfit_ratio: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardResult {
    pub folds: Vec<FoldResult>,
    pub mean_train_score: f64,
    pub mean_test_score: f64,
    pub mean_overfit_ratio: f64,
    pub severity: OverfitSeverity,
    /// Mean decay ratio within the configured bound.
    pub acceptable: bool,
    /// Filters selected in more than half the folds.
    pub consistent_filters: Vec<String>,
    /// max(0, 1 - cv(test scores)).
    pub robustness: f64,
}

impl WalkForwardResult {
    /// Logs a per-fold table and the aggregate verdict.
    pub fn report(&self) {
        info!("================ Walk-Forward Validation ================");
        for fold in &self.folds {
            info!(
                "Fold {} | {} -> {} | train {:.2} | test {:.2} | ratio {:+.2}",
                fold.fold,
                fold.test_range.start,
                fold.test_range.end,
                fold.train_score,
                fold.test_score,
                fold.overfit_ratio,
            );
        }
        info!("---------------------------------------------------------");
        info!(
            "Mean train {:.2} | mean test {:.2} | mean ratio {:.2} ({})",
            self.mean_train_score, self.mean_test_score, self.mean_overfit_ratio, self.severity,
        );
        info!(
            "Robustness {:.2} | acceptable: {} | consistent filters: {}",
            self.robustness,
            if self.acceptable { "yes" } else { "no" },
            if self.consistent_filters.is_empty() {
                "-".to_string()
            } else {
                self.consistent_filters.join(", ")
            },
        );
        info!("=========================================================");
    }
}

pub struct WalkForwardValidator {
    config: ValidationConfig,
}

impl WalkForwardValidator {
    pub fn new(config: &ValidationConfig) -> Self {
        Self {
            config: config.clone(),
        }
    }

    /// Splits `dates` into rolling folds, re-optimizes each train window and
    /// scores the pick on both windows. Fold windows advance by the test
    /// span, so train windows overlap while test windows tile.
    pub fn run(
        &self,
        dates: &[NaiveDate],
        optimize: &mut OptimizeFn<'_>,
        evaluate: &mut EvaluateFn<'_>,
    ) -> Result<WalkForwardResult> {
        let fold_count = self.config.wf_folds;
        let (train_len, test_len) = fold_spans(dates.len(), fold_count, self.config.wf_train_ratio)?;
        info!(
            folds = fold_count,
            train_days = train_len,
            test_days = test_len,
            "starting walk-forward validation"
        );

        let mut folds = Vec::with_capacity(fold_count);
        for index in 0..fold_count {
            let train_start = index * test_len;
            let train_end = train_start + train_len;
            let test_end = train_end + test_len;
            let train_dates = &dates[train_start..train_end];
            let test_dates = &dates[train_end..test_end];

            let (filters, parameters) = optimize(train_dates)?;
            let train_score = evaluate(&filters, &parameters, train_dates)?;
            let test_score = evaluate(&filters, &parameters, test_dates)?;

            folds.push(FoldResult {
                fold: index + 1,
                train_range: DateRange::new(train_dates[0], train_dates[train_len - 1]),
                test_range: DateRange::new(test_dates[0], test_dates[test_len - 1]),
                filters,
                parameters,
                train_score,
                test_score,
                overfit_ratio: fold_ratio(train_score, test_score),
            });
        }

        let train_scores: Vec<f64> = folds.iter().map(|f| f.train_score).collect();
        let test_scores: Vec<f64> = folds.iter().map(|f| f.test_score).collect();
        let ratios: Vec<f64> = folds.iter().map(|f| f.overfit_ratio).collect();
        let mean_overfit_ratio = stats::mean(&ratios);
        let severity = gap_severity(mean_overfit_ratio);
        let result = WalkForwardResult {
            consistent_filters: consistent_filters(&folds),
            folds,
            mean_train_score: stats::mean(&train_scores),
            mean_test_score: stats::mean(&test_scores),
            mean_overfit_ratio,
            severity,
            acceptable: mean_overfit_ratio <= self.config.wf_max_gap,
            robustness: (1.0 - stats::coefficient_of_variation(&test_scores)).max(0.0),
        };
        info!(
            mean_ratio = result.mean_overfit_ratio,
            severity = %result.severity,
            robustness = result.robustness,
            "walk-forward validation finished"
        );
        Ok(result)
    }
}

/// Window lengths for the requested geometry. The test span tiles the
/// sequence; the train span is the ratio-scaled multiple of it.
fn fold_spans(total: usize, folds: usize, train_ratio: f64) -> Result<(usize, usize)> {
    if folds < 2 {
        bail!("walk-forward needs at least 2 folds, got {folds}");
    }
    if !(train_ratio > 0.0 && train_ratio < 1.0) {
        bail!("train ratio must sit in (0, 1), got {train_ratio}");
    }
    let stretch = train_ratio / (1.0 - train_ratio);
    let test_len = (total as f64 / (folds as f64 + stretch)).floor() as usize;
    let train_len = (stretch * test_len as f64).floor() as usize;
    if test_len == 0 || train_len == 0 {
        bail!("{total} dates cannot support {folds} walk-forward folds");
    }
    Ok((train_len, test_len))
}

fn fold_ratio(train: f64, test: f64) -> f64 {
    if train.abs() < f64::EPSILON {
        return if test < train { 1.0 } else { 0.0 };
    }
    (train - test) / train.abs()
}

/// Tier for a mean fold decay ratio. Tighter bars than the composite guard.
fn gap_severity(mean_ratio: f64) -> OverfitSeverity {
    if mean_ratio < 0.1 {
        OverfitSeverity::None
    } else if mean_ratio < 0.2 {
        OverfitSeverity::Low
    } else if mean_ratio < 0.35 {
        OverfitSeverity::Medium
    } else if mean_ratio < 0.5 {
        OverfitSeverity::High
    } else {
        OverfitSeverity::Critical
    }
}

fn consistent_filters(folds: &[FoldResult]) -> Vec<String> {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for fold in folds {
        for name in &fold.filters {
            *counts.entry(name.as_str()).or_insert(0) += 1;
        }
    }
    let bar = folds.len() / 2;
    counts
        .into_iter()
        .filter(|(_, count)| *count > bar)
        .map(|(name, _)| name.to_string())
        .collect()
}
