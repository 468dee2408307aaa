//! Iterative Rule Refinement CLI
//!
//! Drives the analyzer, the refinement loop, the filter subset search and
//! walk-forward validation against the simulated backtest executor.

use anyhow::{Context, Result, bail};
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use ruleforge::application::analyzer::TradeLogAnalyzer;
use ruleforge::application::filtering::FilterGenerator;
use ruleforge::application::orchestrator::RefinementEngine;
use ruleforge::application::reporting::RefineReporter;
use ruleforge::application::search::{SearchSpace, build_strategy};
use ruleforge::application::synthesis::ConditionSynthesizer;
use ruleforge::application::walk_forward::WalkForwardValidator;
use ruleforge::config::{RefinementConfig, StrategyKind};
use ruleforge::domain::features::FeatureCatalog;
use ruleforge::domain::filters::FilterCandidate;
use ruleforge::domain::metrics::{MetricDirection, direction_of};
use ruleforge::domain::ports::{BacktestExecutor, BacktestOutcome, BacktestRequest, DateRange};
use ruleforge::infrastructure::{
    JsonFileIterationStore, SimulatedBacktestExecutor, TracingProgressSink, load_ledger_csv,
};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::str::FromStr;

/// Entry rule used when no rule file is given. Wide enough that the
/// simulated market's loss regimes stay visible to the analyzer.
const DEFAULT_RULE: &str = "\
signal = rsi < 75.0
allow_entry = signal and volume > 150.0
return allow_entry
";

#[derive(Parser)]
#[command(author, version, about = "Iterative Rule Refinement Engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Mine a trade ledger CSV for loss patterns and filter candidates
    Analyze {
        /// Trade ledger CSV (entry_time, exit_time, profit plus feature columns)
        #[arg(short, long)]
        ledger: String,

        /// TOML file with refinement configuration
        #[arg(short, long)]
        config: Option<String>,

        /// Number of filter candidates to propose
        #[arg(long, default_value = "5")]
        candidates: usize,

        /// Output JSON file for the analysis
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Run the refinement loop: backtest, analyze, merge guards, repeat
    Run {
        /// File containing the initial entry rule
        #[arg(short, long)]
        rule: Option<String>,

        /// TOML file with refinement configuration
        #[arg(short, long)]
        config: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long, default_value = "2024-01-01")]
        start: String,

        /// End date (YYYY-MM-DD)
        #[arg(long, default_value = "2024-03-31")]
        end: String,

        /// Iteration cap override
        #[arg(short, long)]
        iterations: Option<usize>,

        /// Seed for the simulated market
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Persist per-iteration snapshots under the configured directory
        #[arg(long)]
        persist: bool,

        /// Output JSON file for the run outcome
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Optimize filter subsets for the base rule with a search strategy
    Search {
        /// File containing the base entry rule
        #[arg(short, long)]
        rule: Option<String>,

        /// TOML file with refinement configuration
        #[arg(short, long)]
        config: Option<String>,

        /// Search strategy (grid, genetic, smbo, integrated)
        #[arg(long, default_value = "integrated")]
        strategy: String,

        /// Start date (YYYY-MM-DD)
        #[arg(long, default_value = "2024-01-01")]
        start: String,

        /// End date (YYYY-MM-DD)
        #[arg(long, default_value = "2024-03-31")]
        end: String,

        /// Candidate pool size offered to the optimizer
        #[arg(long, default_value = "8")]
        pool: usize,

        /// Seed for the simulated market
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Number of top trials to display
        #[arg(short, long, default_value = "10")]
        top_n: usize,

        /// Output JSON file for the search result
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Validate the filter pick over rolling walk-forward folds
    Walkforward {
        /// File containing the base entry rule
        #[arg(short, long)]
        rule: Option<String>,

        /// TOML file with refinement configuration
        #[arg(short, long)]
        config: Option<String>,

        /// Start date (YYYY-MM-DD)
        #[arg(long, default_value = "2024-01-01")]
        start: String,

        /// End date (YYYY-MM-DD)
        #[arg(long, default_value = "2024-06-30")]
        end: String,

        /// Number of rolling folds
        #[arg(long)]
        folds: Option<usize>,

        /// Train window share of each fold
        #[arg(long)]
        train_ratio: Option<f64>,

        /// Seed for the simulated market
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Output JSON file for the validation result
        #[arg(short, long)]
        output: Option<String>,
    },
}

fn main() -> Result<()> {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber).ok();

    let cli = Cli::parse();
    let reporter = RefineReporter::default();

    match cli.command {
        Commands::Analyze {
            ledger,
            config,
            candidates,
            output,
        } => {
            let config = load_config(config.as_deref())?;
            let catalog = FeatureCatalog::standard();
            let trades = load_ledger_csv(Path::new(&ledger))?;

            reporter.print_header(
                "TRADE LEDGER ANALYSIS",
                &[
                    ("Ledger", ledger.clone()),
                    ("Trades", trades.len().to_string()),
                ],
            );

            let analyzer = TradeLogAnalyzer::new(catalog.clone(), config.analyzer.clone());
            let analysis = analyzer.analyze(&trades);
            reporter.print_analysis(&analysis);

            let generator = FilterGenerator::new(catalog, config.filtering.clone());
            let picks = generator.generate(&analysis, candidates);
            if picks.is_empty() {
                println!("\nNo filter candidates cleared the scoring bar.");
            } else {
                println!("\nProposed filters:");
                for (index, candidate) in picks.iter().enumerate() {
                    println!(
                        "  {}. {:<28} if {}  (score {:.2})",
                        index + 1,
                        candidate.name,
                        candidate.condition,
                        candidate.score,
                    );
                    println!("     {}", candidate.description);
                }
            }

            if let Some(path) = output {
                reporter.export_json(&analysis, &path)?;
            }
        }
        Commands::Run {
            rule,
            config,
            start,
            end,
            iterations,
            seed,
            persist,
            output,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(cap) = iterations {
                config.max_iterations = cap;
            }
            let initial_rule = read_rule(rule.as_deref())?;
            let range = parse_range(&start, &end)?;

            reporter.print_header(
                "ITERATIVE RULE REFINEMENT",
                &[
                    ("Window", format!("{} -> {}", range.start, range.end)),
                    ("Iterations", config.max_iterations.to_string()),
                    ("Target", config.target_metric.clone()),
                    ("Seed", seed.to_string()),
                ],
            );

            let executor = SimulatedBacktestExecutor::new(seed);
            let mut engine = RefinementEngine::new(
                config.clone(),
                FeatureCatalog::standard(),
                Box::new(executor),
            )?
            .with_progress(Box::new(TracingProgressSink));

            if persist || config.persistence.enabled {
                let run_dir = config
                    .persistence
                    .directory
                    .join(format!("run_{}", Utc::now().format("%Y%m%d_%H%M%S")));
                let store = JsonFileIterationStore::new(run_dir)?;
                engine = engine.with_store(Box::new(store));
            }

            let outcome = engine.run(&initial_rule, range);
            reporter.print_refinement(&outcome, &config.target_metric);

            if let Some(path) = output {
                reporter.export_json(&outcome, &path)?;
            }
            if !outcome.success {
                bail!("refinement stopped on failure: {}", outcome.stop_reason);
            }
        }
        Commands::Search {
            rule,
            config,
            strategy,
            start,
            end,
            pool,
            seed,
            top_n,
            output,
        } => {
            let mut config = load_config(config.as_deref())?;
            config.search.strategy = StrategyKind::from_str(&strategy)?;
            let base_rule = read_rule(rule.as_deref())?;
            let range = parse_range(&start, &end)?;
            let catalog = FeatureCatalog::standard();

            let mut executor = SimulatedBacktestExecutor::new(seed);
            let baseline = run_backtest(&mut executor, &base_rule, range, &BTreeMap::new())?;

            let analyzer = TradeLogAnalyzer::new(catalog.clone(), config.analyzer.clone());
            let analysis = analyzer.analyze(&baseline.ledger);
            let generator = FilterGenerator::new(catalog.clone(), config.filtering.clone());
            let candidates = generator.generate(&analysis, pool);
            if candidates.is_empty() {
                bail!("the baseline ledger yielded no filter candidates to search over");
            }

            reporter.print_header(
                "FILTER SUBSET SEARCH",
                &[
                    ("Strategy", strategy.clone()),
                    ("Window", format!("{} -> {}", range.start, range.end)),
                    ("Pool", candidates.len().to_string()),
                    ("Target", config.target_metric.clone()),
                ],
            );

            let baseline_score = directed(&baseline.metrics, &config.target_metric);
            let synthesizer = ConditionSynthesizer::new(catalog);
            let space = SearchSpace::filter_only(0, candidates.len());
            let mut objective = |selected: &[FilterCandidate],
                                 parameters: &BTreeMap<String, f64>|
             -> Result<HashMap<String, f64>> {
                let build = synthesizer.build(&base_rule, selected, selected.len());
                if !build.success {
                    bail!(
                        "guard merge failed: {}",
                        build.error.unwrap_or_else(|| "unknown".to_string())
                    );
                }
                let outcome = run_backtest(&mut executor, &build.rule, range, parameters)?;
                Ok(outcome.metrics)
            };

            let mut optimizer = build_strategy(&config.search, &config.target_metric);
            let result = optimizer.optimize(&candidates, &space, baseline_score, &mut objective)?;

            reporter.print_search(&result, top_n);

            if let Some(best) = &result.best {
                let chosen: Vec<FilterCandidate> = candidates
                    .iter()
                    .filter(|c| best.filters.contains(&c.name))
                    .cloned()
                    .collect();
                let build = synthesizer.build(&base_rule, &chosen, chosen.len());
                if build.success {
                    println!("\nMerged rule with the winning filters:\n");
                    println!("{}", build.rule);
                }
            }

            if let Some(path) = output {
                reporter.export_json(&result, &path)?;
            }
        }
        Commands::Walkforward {
            rule,
            config,
            start,
            end,
            folds,
            train_ratio,
            seed,
            output,
        } => {
            let mut config = load_config(config.as_deref())?;
            if let Some(n) = folds {
                config.validation.wf_folds = n;
            }
            if let Some(ratio) = train_ratio {
                config.validation.wf_train_ratio = ratio;
            }
            let base_rule = read_rule(rule.as_deref())?;
            let range = parse_range(&start, &end)?;
            let dates = range.dates();

            reporter.print_header(
                "WALK-FORWARD VALIDATION",
                &[
                    ("Window", format!("{} -> {}", range.start, range.end)),
                    ("Folds", config.validation.wf_folds.to_string()),
                    (
                        "Train ratio",
                        format!("{:.2}", config.validation.wf_train_ratio),
                    ),
                    ("Target", config.target_metric.clone()),
                ],
            );

            let catalog = FeatureCatalog::standard();
            let analyzer = TradeLogAnalyzer::new(catalog.clone(), config.analyzer.clone());
            let generator = FilterGenerator::new(catalog.clone(), config.filtering.clone());
            let synthesizer = ConditionSynthesizer::new(catalog);
            let executor = RefCell::new(SimulatedBacktestExecutor::new(seed));
            // Candidates picked per fold, so evaluate can rebuild them by name.
            let picks: RefCell<HashMap<String, FilterCandidate>> = RefCell::new(HashMap::new());
            let target = config.target_metric.clone();
            let per_fold = config.filtering.max_per_iteration;

            let mut optimize =
                |window: &[NaiveDate]| -> Result<(Vec<String>, BTreeMap<String, f64>)> {
                    let window_range = DateRange::new(window[0], window[window.len() - 1]);
                    let outcome = run_backtest(
                        &mut executor.borrow_mut(),
                        &base_rule,
                        window_range,
                        &BTreeMap::new(),
                    )?;
                    let analysis = analyzer.analyze(&outcome.ledger);
                    let candidates = generator.generate(&analysis, per_fold);
                    let names = candidates.iter().map(|c| c.name.clone()).collect();
                    let mut registry = picks.borrow_mut();
                    for candidate in candidates {
                        registry.insert(candidate.name.clone(), candidate);
                    }
                    Ok((names, BTreeMap::new()))
                };
            let mut evaluate = |filters: &[String],
                                parameters: &BTreeMap<String, f64>,
                                window: &[NaiveDate]|
             -> Result<f64> {
                let window_range = DateRange::new(window[0], window[window.len() - 1]);
                let selected: Vec<FilterCandidate> = {
                    let registry = picks.borrow();
                    filters
                        .iter()
                        .filter_map(|name| registry.get(name).cloned())
                        .collect()
                };
                let build = synthesizer.build(&base_rule, &selected, selected.len());
                if !build.success {
                    bail!(
                        "guard merge failed: {}",
                        build.error.unwrap_or_else(|| "unknown".to_string())
                    );
                }
                let outcome = run_backtest(
                    &mut executor.borrow_mut(),
                    &build.rule,
                    window_range,
                    parameters,
                )?;
                outcome
                    .metrics
                    .get(&target)
                    .copied()
                    .with_context(|| format!("backtest metrics are missing '{}'", target))
            };

            let validator = WalkForwardValidator::new(&config.validation);
            let result = validator.run(&dates, &mut optimize, &mut evaluate)?;
            result.report();

            if !result.acceptable {
                println!(
                    "\n⚠️  Mean decay ratio {:.2} exceeds the accepted bound {:.2}.",
                    result.mean_overfit_ratio, config.validation.wf_max_gap,
                );
            }
            if let Some(path) = output {
                reporter.export_json(&result, &path)?;
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&str>) -> Result<RefinementConfig> {
    match path {
        Some(path) => RefinementConfig::from_toml_file(Path::new(path)),
        None => Ok(RefinementConfig::default()),
    }
}

fn read_rule(path: Option<&str>) -> Result<String> {
    match path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read rule file {}", path)),
        None => Ok(DEFAULT_RULE.to_string()),
    }
}

fn parse_range(start: &str, end: &str) -> Result<DateRange> {
    let start = parse_date(start)?;
    let end = parse_date(end)?;
    if end < start {
        bail!("end date {} precedes start date {}", end, start);
    }
    Ok(DateRange::new(start, end))
}

fn parse_date(value: &str) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .with_context(|| format!("Invalid date '{}', expected YYYY-MM-DD", value))
}

/// Runs one backtest and insists on a completed outcome.
fn run_backtest(
    executor: &mut SimulatedBacktestExecutor,
    rule: &str,
    range: DateRange,
    parameters: &BTreeMap<String, f64>,
) -> Result<BacktestOutcome> {
    let request = BacktestRequest {
        rule: rule.to_string(),
        sell_rule: None,
        range,
        parameters: parameters.clone(),
    };
    let outcome = executor.run(&request)?;
    if !outcome.is_completed() {
        bail!(
            "backtest did not complete: {}",
            outcome.message.as_deref().unwrap_or("no detail")
        );
    }
    Ok(outcome)
}

/// Target metric value with lower-is-better metrics negated, so bigger is
/// always better for baseline comparison.
fn directed(metrics: &HashMap<String, f64>, target: &str) -> Option<f64> {
    let value = metrics.get(target).copied()?;
    Some(match direction_of(target) {
        MetricDirection::LowerIsBetter => -value,
        MetricDirection::HigherIsBetter => value,
    })
}
