//! The refinement loop: backtest, analyze, generate, merge, repeat.
//!
//! Single-threaded and synchronous: each pass blocks on the executor before
//! moving on. History is append-only and stop decisions happen between
//! passes, never mid-pass. Expected failures (no trades, executor faults)
//! land in the outcome's success flag, not in a propagated error.

use anyhow::Result;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::application::analyzer::TradeLogAnalyzer;
use crate::application::comparison::{ConvergenceChecker, ResultComparator};
use crate::application::filtering::FilterGenerator;
use crate::application::overfit::{OverfitGuard, OverfitResult};
use crate::application::synthesis::ConditionSynthesizer;
use crate::config::RefinementConfig;
use crate::domain::features::FeatureCatalog;
use crate::domain::filters::FilterCandidate;
use crate::domain::iteration::IterationResult;
use crate::domain::ports::{
    BacktestExecutor, BacktestOutcome, BacktestRequest, BacktestStatus, DateRange, IterationStore,
    ProgressSink, StatAnalysisProvider, StoredFinal, StoredIteration,
};

/// Why a run stopped. Only `NoTrades` and `ExecutorFailure` are failures;
/// every other reason is a graceful stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Converged,
    IterationCap,
    NoTrades,
    NoPatterns,
    NoCandidates,
    SevereDegradation,
    OverfitRisk,
    ExecutorFailure,
}

impl StopReason {
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::NoTrades | Self::ExecutorFailure)
    }
}

impl std::fmt::Display for StopReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Converged => "converged",
            Self::IterationCap => "iteration_cap",
            Self::NoTrades => "no_trades",
            Self::NoPatterns => "no_patterns",
            Self::NoCandidates => "no_candidates",
            Self::SevereDegradation => "severe_degradation",
            Self::OverfitRisk => "overfit_risk",
            Self::ExecutorFailure => "executor_failure",
        };
        f.write_str(label)
    }
}

/// Structured result of one refinement run.
///
/// `final_rule` is the rule fed into the last completed iteration's backtest.
/// A merge performed in the stopping pass is recorded in that pass's history
/// entry but never promoted, since its output was never backtested.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefinementOutcome {
    pub run_id: Uuid,
    pub success: bool,
    pub stop_reason: StopReason,
    pub message: Option<String>,
    pub final_rule: String,
    pub iterations: Vec<IterationResult>,
    /// Filters embedded in `final_rule`, in merge order.
    pub accepted_filters: Vec<FilterCandidate>,
    pub final_metrics: HashMap<String, f64>,
    pub overfit: Option<OverfitResult>,
    pub duration: Duration,
}

/// Drives the refine loop against the external collaborators.
pub struct RefinementEngine {
    config: RefinementConfig,
    analyzer: TradeLogAnalyzer,
    generator: FilterGenerator,
    synthesizer: ConditionSynthesizer,
    executor: Box<dyn BacktestExecutor>,
    stats: Option<Box<dyn StatAnalysisProvider>>,
    store: Option<Box<dyn IterationStore>>,
    progress: Option<Box<dyn ProgressSink>>,
}

impl RefinementEngine {
    pub fn new(
        config: RefinementConfig,
        catalog: FeatureCatalog,
        executor: Box<dyn BacktestExecutor>,
    ) -> Result<Self> {
        config.validate()?;
        let analyzer = TradeLogAnalyzer::new(catalog.clone(), config.analyzer.clone());
        let generator = FilterGenerator::new(catalog.clone(), config.filtering.clone());
        let synthesizer = ConditionSynthesizer::new(catalog);
        Ok(Self {
            config,
            analyzer,
            generator,
            synthesizer,
            executor,
            stats: None,
            store: None,
            progress: None,
        })
    }

    pub fn with_stat_provider(mut self, provider: Box<dyn StatAnalysisProvider>) -> Self {
        self.stats = Some(provider);
        self
    }

    pub fn with_store(mut self, store: Box<dyn IterationStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_progress(mut self, sink: Box<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    /// Runs the loop to a stop reason, then re-backtests the final rule for
    /// the definitive metric snapshot.
    pub fn run(&mut self, initial_rule: &str, range: DateRange) -> RefinementOutcome {
        let run_id = Uuid::new_v4();
        let started = Instant::now();
        info!(
            run = %run_id,
            max_iterations = self.config.max_iterations,
            target = %self.config.target_metric,
            "starting refinement run"
        );
        self.notify(&format!("refinement run {} started", run_id));

        let comparator = ResultComparator::new(Some(self.config.target_metric.clone()));
        let mut checker =
            ConvergenceChecker::new(&self.config.convergence, &self.config.target_metric);
        let guard = OverfitGuard::new(&self.config.validation);

        let mut history: Vec<IterationResult> = Vec::new();
        let mut accepted: Vec<FilterCandidate> = Vec::new();
        let mut current_rule = initial_rule.to_string();
        let mut overfit: Option<OverfitResult> = None;
        let mut stop: Option<(StopReason, Option<String>)> = None;

        for index in 1..=self.config.max_iterations {
            let pass_started = Instant::now();
            let outcome = match self.backtest(&current_rule, range) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!(iteration = index, error = %e, "backtest executor failed");
                    stop = Some((StopReason::ExecutorFailure, Some(e.to_string())));
                    break;
                }
            };
            match outcome.status {
                BacktestStatus::Completed => {}
                BacktestStatus::NoTrades => {
                    warn!(iteration = index, "backtest produced no trades");
                    let message = outcome
                        .message
                        .or_else(|| Some("backtest produced no trades".to_string()));
                    stop = Some((StopReason::NoTrades, message));
                    break;
                }
                BacktestStatus::TimedOut | BacktestStatus::Failed => {
                    warn!(
                        iteration = index,
                        status = ?outcome.status,
                        "backtest did not complete"
                    );
                    stop = Some((StopReason::ExecutorFailure, outcome.message));
                    break;
                }
            }

            let analysis = self.analyzer.analyze_with(
                &outcome.ledger,
                self.stats.as_deref(),
                self.config.allow_ml,
            );
            let no_patterns =
                analysis.patterns.is_empty() && analysis.external_suggestions.is_empty();
            let candidates = if no_patterns {
                Vec::new()
            } else {
                self.generator
                    .generate(&analysis, self.config.filtering.max_per_iteration)
            };
            let fresh = fresh_candidates(&accepted, candidates);

            // Merge only while another backtest can still exercise the result.
            let mut pass_applied: Vec<FilterCandidate> = Vec::new();
            let mut pending: Option<(String, Vec<FilterCandidate>)> = None;
            if !fresh.is_empty() && index < self.config.max_iterations {
                let (valid, rejected) = self.synthesizer.screen(&fresh);
                if !rejected.is_empty() {
                    debug!(
                        iteration = index,
                        rejected = rejected.len(),
                        "candidates dropped at screening"
                    );
                }
                let mut merge_input = accepted.clone();
                merge_input.extend(valid);
                let cap = merge_input.len();
                let build = self.synthesizer.build(&current_rule, &merge_input, cap);
                if build.success && build.applied.len() > accepted.len() {
                    pass_applied = added_candidates(&accepted, &build.applied);
                    info!(
                        iteration = index,
                        merged = pass_applied.len(),
                        total = build.applied.len(),
                        "guards merged"
                    );
                    pending = Some((build.rule, build.applied));
                } else if !build.success {
                    warn!(
                        iteration = index,
                        error = build.error.as_deref().unwrap_or("unknown"),
                        "merge rejected, keeping current rule"
                    );
                }
            }

            let result = IterationResult {
                index,
                rule: current_rule.clone(),
                accepted: pass_applied,
                metrics: outcome.metrics,
                ledger: self.config.keep_ledgers.then(|| outcome.ledger),
                duration: pass_started.elapsed(),
                finished_at: Utc::now(),
            };
            self.persist_iteration(&result);
            self.notify(&format!(
                "iteration {}: {} {:.2}, {} filters active",
                index,
                self.config.target_metric,
                result.metric(&self.config.target_metric),
                accepted.len(),
            ));
            history.push(result);

            if no_patterns {
                info!(iteration = index, "no loss patterns mined, stopping");
                stop = Some((
                    StopReason::NoPatterns,
                    Some("no loss patterns mined from the ledger".to_string()),
                ));
                break;
            }
            if fresh.is_empty() {
                info!(iteration = index, "no new filter candidates, stopping");
                stop = Some((
                    StopReason::NoCandidates,
                    Some("no new filter candidates to merge".to_string()),
                ));
                break;
            }

            if history.len() >= 2 {
                let comparison =
                    comparator.compare(&history[history.len() - 2], &history[history.len() - 1]);
                info!(
                    iteration = index,
                    improved = comparison.overall_improved,
                    score = comparison.improvement_score,
                    "iteration compared"
                );
            }

            let check = guard.check(
                &history[history.len() - 1].metrics,
                None,
                current_rule.len(),
                accepted.len(),
                &history,
            );
            let overfit_stop = self.config.validation.stop_on_overfit && check.should_stop;
            let overfit_severity = check.severity;
            overfit = Some(check);

            let verdict = checker.check(&history);
            if verdict.degraded {
                info!(iteration = index, reason = %verdict.reason, "run degraded past the early-stop floor");
                stop = Some((StopReason::SevereDegradation, Some(verdict.reason)));
                break;
            }
            if verdict.converged {
                info!(iteration = index, reason = %verdict.reason, "converged");
                stop = Some((StopReason::Converged, Some(verdict.reason)));
                break;
            }
            if overfit_stop {
                info!(iteration = index, severity = %overfit_severity, "overfit guard stop");
                stop = Some((
                    StopReason::OverfitRisk,
                    Some(format!("overfit severity {}", overfit_severity)),
                ));
                break;
            }

            if let Some((rule, total)) = pending {
                current_rule = rule;
                accepted = total;
            }
        }

        let (stop_reason, message) = stop.unwrap_or((StopReason::IterationCap, None));

        let mut final_metrics = history
            .last()
            .map(|it| it.metrics.clone())
            .unwrap_or_default();
        if !stop_reason.is_failure() && !history.is_empty() {
            match self.backtest(&current_rule, range) {
                Ok(outcome) if outcome.status == BacktestStatus::Completed => {
                    final_metrics = outcome.metrics;
                }
                Ok(outcome) => {
                    warn!(
                        status = ?outcome.status,
                        "final backtest did not complete, keeping last iteration metrics"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "final backtest failed, keeping last iteration metrics");
                }
            }
        }

        let success = !stop_reason.is_failure();
        self.persist_final(
            run_id,
            stop_reason,
            history.len(),
            &accepted,
            &current_rule,
            &final_metrics,
        );
        info!(
            run = %run_id,
            iterations = history.len(),
            stop = %stop_reason,
            success,
            "refinement run finished"
        );
        self.notify(&format!("refinement run {} stopped: {}", run_id, stop_reason));

        RefinementOutcome {
            run_id,
            success,
            stop_reason,
            message,
            final_rule: current_rule,
            iterations: history,
            accepted_filters: accepted,
            final_metrics,
            overfit,
            duration: started.elapsed(),
        }
    }

    fn backtest(&mut self, rule: &str, range: DateRange) -> Result<BacktestOutcome> {
        let request = BacktestRequest {
            rule: rule.to_string(),
            sell_rule: None,
            range,
            parameters: BTreeMap::new(),
        };
        self.executor.run(&request)
    }

    fn notify(&self, message: &str) {
        if let Some(sink) = &self.progress {
            sink.notify(message);
        }
    }

    fn persist_iteration(&mut self, result: &IterationResult) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let record = StoredIteration {
            index: result.index,
            metrics: result.metrics.clone(),
            rule: result.rule.clone(),
            filters: result.accepted.iter().map(|c| c.name.clone()).collect(),
            duration_ms: result.duration.as_millis() as u64,
            saved_at: Utc::now(),
        };
        if let Err(e) = store.save_iteration(&record) {
            warn!(index = result.index, error = %e, "failed to persist iteration");
        }
    }

    fn persist_final(
        &mut self,
        run_id: Uuid,
        stop_reason: StopReason,
        iterations: usize,
        accepted: &[FilterCandidate],
        rule: &str,
        metrics: &HashMap<String, f64>,
    ) {
        let Some(store) = self.store.as_mut() else {
            return;
        };
        let record = StoredFinal {
            run_id: run_id.to_string(),
            iterations,
            metrics: metrics.clone(),
            rule: rule.to_string(),
            filters: accepted.iter().map(|c| c.name.clone()).collect(),
            stop_reason: stop_reason.to_string(),
            saved_at: Utc::now(),
        };
        if let Err(e) = store.save_final(&record) {
            warn!(error = %e, "failed to persist final result");
        }
    }
}

/// Candidates whose normalized condition is not already merged.
fn fresh_candidates(
    accepted: &[FilterCandidate],
    candidates: Vec<FilterCandidate>,
) -> Vec<FilterCandidate> {
    let known: HashSet<String> = accepted.iter().map(|c| c.normalized_condition()).collect();
    candidates
        .into_iter()
        .filter(|c| !known.contains(&c.normalized_condition()))
        .collect()
}

/// Entries of `merged` that were not part of `before`.
fn added_candidates(
    before: &[FilterCandidate],
    merged: &[FilterCandidate],
) -> Vec<FilterCandidate> {
    let known: HashSet<&str> = before.iter().map(|c| c.name.as_str()).collect();
    merged
        .iter()
        .filter(|c| !known.contains(c.name.as_str()))
        .cloned()
        .collect()
}
