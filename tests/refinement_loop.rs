//! End-to-end refinement runs against the simulated backtest executor.
//!
//! The simulated market hides a systematic loss regime at the market-open
//! hour. A healthy run mines it from the ledger, merges the guard clause and
//! lifts total profit.

use chrono::NaiveDate;
use ruleforge::application::orchestrator::{RefinementEngine, StopReason};
use ruleforge::config::RefinementConfig;
use ruleforge::domain::features::FeatureCatalog;
use ruleforge::domain::metrics::TOTAL_PROFIT;
use ruleforge::domain::ports::{DateRange, IterationStore};
use ruleforge::infrastructure::{JsonFileIterationStore, SimulatedBacktestExecutor};

const BASE_RULE: &str = "\
signal = rsi < 75.0
allow_entry = signal and volume > 150.0
return allow_entry
";

fn range(start: (i32, u32, u32), end: (i32, u32, u32)) -> DateRange {
    DateRange::new(
        NaiveDate::from_ymd_opt(start.0, start.1, start.2).unwrap(),
        NaiveDate::from_ymd_opt(end.0, end.1, end.2).unwrap(),
    )
}

fn engine(seed: u64, config: RefinementConfig) -> RefinementEngine {
    RefinementEngine::new(
        config,
        FeatureCatalog::standard(),
        Box::new(SimulatedBacktestExecutor::new(seed)),
    )
    .unwrap()
}

#[test]
fn test_refinement_mines_and_guards_the_loss_hour() {
    let mut engine = engine(42, RefinementConfig::default());
    let outcome = engine.run(BASE_RULE, range((2024, 3, 1), (2024, 4, 30)));

    assert!(
        outcome.success,
        "expected a graceful stop, got {}",
        outcome.stop_reason
    );
    assert!(!outcome.iterations.is_empty());
    assert!(
        outcome
            .final_rule
            .contains("if hour == 9.0: allow_entry = false"),
        "the open-hour guard should be merged:\n{}",
        outcome.final_rule,
    );
    assert!(
        outcome
            .accepted_filters
            .iter()
            .any(|f| f.name == "avoid_hour_9"),
        "avoid_hour_9 should be among the accepted filters"
    );

    let first = outcome.iterations[0].metrics[TOTAL_PROFIT];
    let last = outcome.final_metrics[TOTAL_PROFIT];
    assert!(
        last > first,
        "guarding the loss hour should lift profit: {first} -> {last}"
    );
}

#[test]
fn test_same_seed_reproduces_the_run() {
    let window = range((2024, 3, 1), (2024, 4, 30));
    let mut first_engine = engine(7, RefinementConfig::default());
    let mut second_engine = engine(7, RefinementConfig::default());

    let first = first_engine.run(BASE_RULE, window);
    let second = second_engine.run(BASE_RULE, window);

    assert_eq!(first.stop_reason, second.stop_reason);
    assert_eq!(first.iterations.len(), second.iterations.len());
    assert_eq!(first.final_rule, second.final_rule);
    assert_eq!(
        first.final_metrics[TOTAL_PROFIT],
        second.final_metrics[TOTAL_PROFIT]
    );
}

#[test]
fn test_weekend_only_window_is_a_hard_failure() {
    let mut engine = engine(42, RefinementConfig::default());
    let outcome = engine.run(BASE_RULE, range((2024, 3, 9), (2024, 3, 10)));

    assert!(!outcome.success);
    assert_eq!(outcome.stop_reason, StopReason::NoTrades);
    assert!(outcome.iterations.is_empty());
    assert_eq!(outcome.final_rule, BASE_RULE);
}

#[test]
fn test_iteration_snapshots_survive_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let store = JsonFileIterationStore::new(dir.path()).unwrap();
    let mut engine =
        engine(42, RefinementConfig::default()).with_store(Box::new(store));
    let outcome = engine.run(BASE_RULE, range((2024, 3, 1), (2024, 3, 31)));
    assert!(outcome.success);

    let reader = JsonFileIterationStore::new(dir.path()).unwrap();
    let first = reader
        .load_iteration(1)
        .unwrap()
        .expect("iteration 1 should be persisted");
    assert_eq!(first.index, 1);
    assert!(!first.rule.is_empty());
    assert!(dir.path().join("final.json").exists());
}
