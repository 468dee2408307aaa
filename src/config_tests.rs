use crate::config::{PolicyKind, RefinementConfig, SelectionMode, StrategyKind};
use std::str::FromStr;

#[test]
fn test_default_config_is_valid() {
    let config = RefinementConfig::default();
    assert!(config.validate().is_ok());
    assert_eq!(config.max_iterations, 5);
    assert_eq!(config.target_metric, "total_profit");
    assert_eq!(config.convergence.policy, PolicyKind::ImprovementRate);
    assert!((config.convergence.threshold - 0.05).abs() < 1e-12);
}

#[test]
fn test_validate_rejects_zero_iterations() {
    let mut config = RefinementConfig::default();
    config.max_iterations = 0;
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("max_iterations"));
}

#[test]
fn test_validate_rejects_bad_margins() {
    let mut config = RefinementConfig::default();
    config.analyzer.time_margin = 0.8;
    assert!(config.validate().is_err());
}

#[test]
fn test_validate_rejects_elite_ge_population() {
    let mut config = RefinementConfig::default();
    config.search.population = 4;
    config.search.elite = 4;
    let err = config.validate().unwrap_err().to_string();
    assert!(err.contains("elite"));
}

#[test]
fn test_validate_rejects_train_ratio_out_of_range() {
    let mut config = RefinementConfig::default();
    config.validation.wf_train_ratio = 1.0;
    assert!(config.validate().is_err());
}

#[test]
fn test_policy_from_str() {
    assert_eq!(
        PolicyKind::from_str("improvement_rate").unwrap(),
        PolicyKind::ImprovementRate
    );
    assert_eq!(
        PolicyKind::from_str("consecutive-no-improve").unwrap(),
        PolicyKind::ConsecutiveNoImprove
    );
    assert!(PolicyKind::from_str("magic").is_err());
}

#[test]
fn test_strategy_from_str_aliases() {
    assert_eq!(StrategyKind::from_str("bayesian").unwrap(), StrategyKind::Smbo);
    assert_eq!(StrategyKind::from_str("auto").unwrap(), StrategyKind::Integrated);
}

#[test]
fn test_toml_roundtrip_with_partial_sections() {
    let raw = r#"
        max_iterations = 8
        target_metric = "win_rate"

        [convergence]
        policy = "absolute_change"
        threshold = 2.5

        [filtering]
        max_per_iteration = 2
        selection = "priority"

        [search]
        strategy = "grid"
        seed = 7
    "#;
    let config: RefinementConfig = toml::from_str(raw).unwrap();
    assert!(config.validate().is_ok());
    assert_eq!(config.max_iterations, 8);
    assert_eq!(config.target_metric, "win_rate");
    assert_eq!(config.convergence.policy, PolicyKind::AbsoluteChange);
    assert!((config.convergence.threshold - 2.5).abs() < 1e-12);
    assert_eq!(config.filtering.max_per_iteration, 2);
    assert_eq!(config.filtering.selection, SelectionMode::Priority);
    assert_eq!(config.search.strategy, StrategyKind::Grid);
    assert_eq!(config.search.seed, 7);
    // Untouched sections keep defaults.
    assert_eq!(config.analyzer.min_samples, 5);
    assert_eq!(config.validation.wf_folds, 5);
}
