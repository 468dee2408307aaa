//! Formatted console output and JSON export for run results.

use anyhow::{Context, Result};
use serde::Serialize;
use std::path::Path;

use crate::application::analyzer::LedgerAnalysis;
use crate::application::orchestrator::RefinementOutcome;
use crate::application::search::OptimizationResult;

const BAR: usize = 80;

/// Reporter for refinement and search results output.
pub struct RefineReporter {
    output_dir: String,
}

impl RefineReporter {
    pub fn new(output_dir: &str) -> Self {
        Self {
            output_dir: output_dir.to_string(),
        }
    }

    /// Prints the header banner for a run.
    pub fn print_header(&self, title: &str, details: &[(&str, String)]) {
        println!("{}", "=".repeat(BAR));
        println!("🔍 {}", title);
        println!("{}", "=".repeat(BAR));
        for (label, value) in details {
            println!("{:<14}{}", format!("{}:", label), value);
        }
        println!("{}", "=".repeat(BAR));
    }

    /// Prints the mined patterns and feature importances for one ledger.
    pub fn print_analysis(&self, analysis: &LedgerAnalysis) {
        println!("\n📊 Ledger Analysis:");
        println!("  Trades:        {}", analysis.total_trades);
        println!(
            "  Wins/Losses:   {} / {}",
            analysis.profit_count, analysis.loss_count
        );
        println!("  Win Rate:      {:.1}%", analysis.win_rate * 100.0);
        println!("  Total Profit:  {}", analysis.total_profit);
        println!("  Loss Amount:   {}", analysis.loss_amount);

        if analysis.patterns.is_empty() {
            println!("\n  No loss patterns found.");
        } else {
            println!("\n{}", "-".repeat(BAR));
            println!(
                "{:<4} | {:<10} | {:<14} | {:>6} | {:>6} | {:>6} | {:>5} | Description",
                "#", "Kind", "Feature", "Trades", "Losses", "Ratio", "Conf"
            );
            println!("{}", "-".repeat(BAR));
            for (i, pattern) in analysis.patterns.iter().enumerate() {
                println!(
                    "{:<4} | {:<10} | {:<14} | {:>6} | {:>6} | {:>6.2} | {:>5.2} | {}",
                    i + 1,
                    pattern.kind.label(),
                    pattern.feature,
                    pattern.trade_count,
                    pattern.loss_count,
                    pattern.loss_ratio,
                    pattern.confidence,
                    pattern.description
                );
            }
            println!("{}", "-".repeat(BAR));
        }

        if !analysis.importances.is_empty() {
            println!("\n  Feature importances:");
            for imp in analysis.importances.iter().take(5) {
                println!(
                    "    {:<16} {:>5.2}  (loss mean {:.2}, profit mean {:.2})",
                    imp.feature, imp.importance, imp.loss_mean, imp.profit_mean
                );
            }
        }

        if !analysis.external_suggestions.is_empty() {
            println!("\n  External suggestions:");
            for s in &analysis.external_suggestions {
                println!(
                    "    {:<24} {}  (improvement {:.2}, p={:.3})",
                    s.name, s.condition, s.improvement, s.p_value
                );
            }
        }
        println!();
    }

    /// Prints the iteration history and the final state of a refinement run.
    pub fn print_refinement(&self, outcome: &RefinementOutcome, target: &str) {
        println!("\n{}", "=".repeat(BAR));
        if outcome.success {
            println!("✅ REFINEMENT COMPLETE - {}", outcome.stop_reason);
        } else {
            println!("❌ REFINEMENT FAILED - {}", outcome.stop_reason);
        }
        println!("{}", "=".repeat(BAR));
        if let Some(message) = &outcome.message {
            println!("  {}", message);
        }

        if !outcome.iterations.is_empty() {
            println!(
                "\n{:<4} | {:>12} | {:>8} | {:>9} | Merged Filters",
                "#", target, "Trades", "Time(ms)"
            );
            println!("{}", "-".repeat(BAR));
            for it in &outcome.iterations {
                let merged = if it.accepted.is_empty() {
                    "-".to_string()
                } else {
                    it.accepted
                        .iter()
                        .map(|c| c.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                };
                println!(
                    "{:<4} | {:>12.2} | {:>8} | {:>9} | {}",
                    it.index,
                    it.metric(target),
                    it.ledger.as_ref().map(|l| l.len()).unwrap_or(0),
                    it.duration.as_millis(),
                    merged
                );
            }
            println!("{}", "-".repeat(BAR));
        }

        println!("\n🏆 FINAL RULE ({} filters):", outcome.accepted_filters.len());
        for candidate in &outcome.accepted_filters {
            println!("  {:<24} {}", candidate.name, candidate.condition);
        }
        let mut metrics: Vec<_> = outcome.final_metrics.iter().collect();
        metrics.sort_by(|a, b| a.0.cmp(b.0));
        println!();
        for (name, value) in metrics {
            println!("  {:<20} {:>12.4}", name, value);
        }
        if let Some(overfit) = &outcome.overfit {
            println!(
                "\n  Overfit:  score {:.2}, severity {}",
                overfit.score, overfit.severity
            );
            for warning in &overfit.warnings {
                println!("  ⚠️  {}", warning);
            }
        }
        println!("{}\n", "=".repeat(BAR));
    }

    /// Prints a formatted table of the best search trials.
    pub fn print_search(&self, result: &OptimizationResult, top_n: usize) {
        println!("\n{}", "=".repeat(BAR));
        println!(
            "✅ SEARCH COMPLETE ({}) - Top {} of {} Trials",
            result.strategy, top_n, result.total_trials
        );
        println!("{}", "=".repeat(BAR));

        let mut ranked: Vec<_> = result.trials.iter().filter(|t| t.score.is_finite()).collect();
        ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        println!(
            "{:<4} | {:>8} | {:>8} | Filters",
            "#", "Score", "Trial"
        );
        println!("{}", "-".repeat(BAR));
        for (rank, trial) in ranked.iter().take(top_n).enumerate() {
            println!(
                "{:<4} | {:>8.2} | {:>8} | {}",
                rank + 1,
                trial.score,
                trial.index,
                trial.filters.join(", ")
            );
        }
        println!("{}", "-".repeat(BAR));

        if let Some(best) = &result.best {
            println!("\n🏆 BEST TRIAL:");
            println!("  Score:     {:.4}", best.score);
            println!("  Filters:   {}", best.filters.join(", "));
            for (name, value) in &best.parameters {
                println!("  {:<10} {:.4}", format!("{}:", name), value);
            }
        } else {
            println!("\n  No successful trial.");
        }
        if let (Some(baseline), Some(gain)) =
            (result.baseline_score, result.improvement_over_baseline)
        {
            println!(
                "\n  Baseline:  {:.4}  ({}{:.4})",
                baseline,
                if gain >= 0.0 { "+" } else { "" },
                gain
            );
        }
        if !result.parameter_importances.is_empty() {
            println!("\n  Parameter importances:");
            for (name, importance) in &result.parameter_importances {
                println!("    {:<16} {:.3}", name, importance);
            }
        }
        println!("{}\n", "=".repeat(BAR));
    }

    /// Exports any serializable result to a JSON file.
    pub fn export_json<T: Serialize>(&self, value: &T, filename: &str) -> Result<()> {
        let output_path = if filename.contains('/') || filename.contains('\\') {
            filename.to_string()
        } else {
            format!("{}/{}", self.output_dir, filename)
        };

        if let Some(parent) = Path::new(&output_path).parent() {
            std::fs::create_dir_all(parent)
                .context(format!("Failed to create directory: {:?}", parent))?;
        }

        let json_output =
            serde_json::to_string_pretty(value).context("Failed to serialize results to JSON")?;

        std::fs::write(&output_path, json_output)
            .context(format!("Failed to write results to {}", output_path))?;

        println!("💾 Results saved to: {}", output_path);
        Ok(())
    }
}

impl Default for RefineReporter {
    fn default() -> Self {
        Self::new(".")
    }
}
