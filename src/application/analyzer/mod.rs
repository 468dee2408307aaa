//! Trade-log analysis.
//!
//! One ledger in, one `LedgerAnalysis` out: aggregate counts and amounts,
//! ranked loss patterns from the bucket/threshold/compound miners, feature
//! importances, and pass-through suggestions from the optional external
//! statistics collaborator.

mod buckets;
mod compound;
mod confidence;
mod importance;
pub(crate) mod stats;
mod thresholds;

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::AnalyzerConfig;
use crate::domain::features::FeatureCatalog;
use crate::domain::ledger::{TradeLedger, TradeRecord};
use crate::domain::patterns::{FeatureImportance, LossPattern, PatternKind};
use crate::domain::ports::{ExternalSuggestion, StatAnalysisProvider};

pub use confidence::{chi_square_p, confidence};
pub(crate) use thresholds::{DIRECTION_ABOVE, DIRECTION_BELOW};

/// Everything the rest of the loop needs to know about one ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerAnalysis {
    pub total_trades: usize,
    pub loss_count: usize,
    pub profit_count: usize,
    pub total_profit: Decimal,
    pub loss_amount: Decimal,
    pub profit_amount: Decimal,
    pub win_rate: f64,
    pub loss_ratio: f64,
    pub patterns: Vec<LossPattern>,
    pub importances: Vec<FeatureImportance>,
    pub external_suggestions: Vec<ExternalSuggestion>,
}

impl LedgerAnalysis {
    /// All-zero analysis for an empty ledger.
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Mines one ledger into loss patterns and feature importances.
pub struct TradeLogAnalyzer {
    catalog: FeatureCatalog,
    config: AnalyzerConfig,
}

impl TradeLogAnalyzer {
    pub fn new(catalog: FeatureCatalog, config: AnalyzerConfig) -> Self {
        Self { catalog, config }
    }

    pub fn catalog(&self) -> &FeatureCatalog {
        &self.catalog
    }

    pub fn analyze(&self, ledger: &TradeLedger) -> LedgerAnalysis {
        self.analyze_with(ledger, None, false)
    }

    /// Full analysis, optionally consulting the external statistics
    /// collaborator. Collaborator failures degrade to an empty suggestion
    /// list; they never abort the analysis.
    pub fn analyze_with(
        &self,
        ledger: &TradeLedger,
        provider: Option<&dyn StatAnalysisProvider>,
        allow_ml: bool,
    ) -> LedgerAnalysis {
        if ledger.is_empty() {
            debug!("empty ledger, returning zeroed analysis");
            return LedgerAnalysis::empty();
        }

        let global_loss_ratio = ledger.loss_ratio();
        let total_losses = ledger.loss_count();
        let cfg = &self.config;

        let basic_gate = PatternGate {
            min_samples: cfg.min_samples,
            margin: cfg.time_margin,
            confidence_floor: cfg.confidence_floor,
        };
        let mut patterns =
            buckets::hourly_patterns(ledger, global_loss_ratio, total_losses, &basic_gate);

        if cfg.advanced_pass {
            let time_gate = PatternGate {
                confidence_floor: cfg.advanced_confidence_floor,
                ..basic_gate
            };
            patterns.extend(buckets::five_minute_patterns(
                ledger,
                global_loss_ratio,
                total_losses,
                &time_gate,
            ));
            patterns.extend(buckets::weekday_patterns(
                ledger,
                global_loss_ratio,
                total_losses,
                &time_gate,
            ));
            patterns.extend(buckets::session_patterns(
                ledger,
                global_loss_ratio,
                total_losses,
                &time_gate,
            ));

            let threshold_gate = PatternGate {
                min_samples: cfg.min_samples,
                margin: cfg.threshold_margin,
                confidence_floor: cfg.advanced_confidence_floor,
            };
            patterns.extend(thresholds::threshold_patterns(
                ledger,
                &self.catalog,
                global_loss_ratio,
                total_losses,
                &threshold_gate,
            ));
            patterns.extend(thresholds::size_tier_patterns(
                ledger,
                global_loss_ratio,
                total_losses,
                &threshold_gate,
            ));

            let compound_gate = PatternGate {
                min_samples: cfg.min_samples,
                margin: cfg.compound_margin,
                confidence_floor: cfg.advanced_confidence_floor,
            };
            patterns.extend(compound::compound_patterns(
                ledger,
                &self.catalog,
                global_loss_ratio,
                total_losses,
                &compound_gate,
            ));
        }

        patterns.sort_by(|a, b| b.loss_amount.cmp(&a.loss_amount));
        patterns.truncate(cfg.max_patterns);

        let importances =
            importance::feature_importances(ledger, &self.catalog, cfg.min_samples);

        let external_suggestions = match provider {
            Some(p) if p.available() => match p.analyze(ledger, allow_ml) {
                Ok(suggestions) => suggestions,
                Err(e) => {
                    warn!(error = %e, "external analysis failed, continuing without it");
                    Vec::new()
                }
            },
            Some(_) => {
                debug!("external analysis provider unavailable");
                Vec::new()
            }
            None => Vec::new(),
        };

        info!(
            trades = ledger.len(),
            losses = total_losses,
            patterns = patterns.len(),
            importances = importances.len(),
            "ledger analyzed"
        );

        LedgerAnalysis {
            total_trades: ledger.len(),
            loss_count: total_losses,
            profit_count: ledger.win_count(),
            total_profit: ledger.total_profit(),
            loss_amount: ledger.loss_amount(),
            profit_amount: ledger.profit_amount(),
            win_rate: ledger.win_rate(),
            loss_ratio: global_loss_ratio,
            patterns,
            importances,
            external_suggestions,
        }
    }
}

/// Acceptance thresholds applied to every candidate subset.
pub(crate) struct PatternGate {
    pub min_samples: usize,
    /// Required multiple of the global loss ratio.
    pub margin: f64,
    pub confidence_floor: f64,
}

/// Builds a `LossPattern` from a trade subset, or `None` when the subset
/// fails the sample, lift or confidence gates. The lift check keeps the
/// baseline invariant: every returned pattern's ratio strictly exceeds the
/// global one.
#[allow(clippy::too_many_arguments)]
pub(crate) fn pattern_from_subset(
    kind: PatternKind,
    feature: &str,
    condition: String,
    description: String,
    subset: &[&TradeRecord],
    global_loss_ratio: f64,
    total_losses: usize,
    gate: &PatternGate,
    metadata: HashMap<String, f64>,
) -> Option<LossPattern> {
    let trade_count = subset.len();
    if trade_count < gate.min_samples {
        return None;
    }
    let loss_count = subset.iter().filter(|t| t.is_loss()).count();
    if loss_count == 0 || total_losses == 0 {
        return None;
    }
    let loss_ratio = loss_count as f64 / trade_count as f64;
    if loss_ratio <= global_loss_ratio || loss_ratio < global_loss_ratio * gate.margin {
        return None;
    }

    let mut loss_amount = Decimal::ZERO;
    for t in subset.iter().filter(|t| t.is_loss()) {
        loss_amount += t.profit.abs();
    }
    let coverage = loss_count as f64 / total_losses as f64;
    let p_value = confidence::chi_square_p(loss_count, trade_count, global_loss_ratio);
    let conf = confidence::confidence(loss_ratio, global_loss_ratio, trade_count, coverage, p_value);
    if conf < gate.confidence_floor {
        return None;
    }

    Some(LossPattern {
        kind,
        feature: feature.to_string(),
        condition,
        description,
        trade_count,
        loss_count,
        loss_amount,
        loss_ratio,
        coverage,
        confidence: conf,
        p_value,
        metadata,
    })
}

/// Renders a numeric literal so it reparses in condition text.
pub(crate) fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e12 {
        format!("{:.1}", v)
    } else {
        format!("{}", v)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn hour_trade(hour: u32, minute: u32, profit: Decimal, rsi: f64) -> TradeRecord {
        let entry = Utc.with_ymd_and_hms(2024, 3, 4, hour, minute, 0).unwrap();
        let mut features = HashMap::new();
        features.insert("rsi".to_string(), rsi);
        TradeRecord {
            entry_time: entry,
            exit_time: entry + chrono::Duration::minutes(30),
            profit,
            features,
        }
    }

    fn analyzer() -> TradeLogAnalyzer {
        TradeLogAnalyzer::new(FeatureCatalog::standard(), AnalyzerConfig::default())
    }

    /// 100 trades, 60 losses all at hour 9.
    fn concentrated_ledger() -> TradeLedger {
        let mut trades = Vec::new();
        for i in 0..60u32 {
            trades.push(hour_trade(9, (i % 12) * 5, dec!(-10), 25.0 + (i % 10) as f64));
        }
        for i in 0..40u32 {
            trades.push(hour_trade(11 + (i % 6), (i % 12) * 5, dec!(15), 55.0 + (i % 15) as f64));
        }
        TradeLedger { trades }
    }

    #[test]
    fn test_hour_nine_scenario() {
        let analysis = analyzer().analyze(&concentrated_ledger());

        assert_eq!(analysis.total_trades, 100);
        assert_eq!(analysis.loss_count, 60);
        assert!((analysis.loss_ratio - 0.6).abs() < 1e-12);

        let hour_nine = analysis
            .patterns
            .iter()
            .find(|p| p.kind == PatternKind::Hourly && p.condition == "hour == 9.0")
            .expect("hour 9 pattern");
        assert!(hour_nine.loss_ratio > 0.95);
        assert!(hour_nine.confidence >= 0.3);
    }

    #[test]
    fn test_empty_ledger_zeroed() {
        let analysis = analyzer().analyze(&TradeLedger::default());
        assert_eq!(analysis.total_trades, 0);
        assert_eq!(analysis.loss_count, 0);
        assert_eq!(analysis.total_profit, Decimal::ZERO);
        assert!(analysis.patterns.is_empty());
        assert!(analysis.importances.is_empty());
        assert!(analysis.external_suggestions.is_empty());
    }

    #[test]
    fn test_all_win_ledger_has_no_patterns() {
        let trades = (0..20u32)
            .map(|i| hour_trade(9 + (i % 4), 0, dec!(5), 50.0))
            .collect();
        let analysis = analyzer().analyze(&TradeLedger { trades });
        assert_eq!(analysis.loss_count, 0);
        assert!(analysis.patterns.is_empty());
        assert!(analysis.importances.is_empty());
        assert_eq!(analysis.win_rate, 1.0);
    }

    #[test]
    fn test_pattern_baseline_invariant() {
        let analysis = analyzer().analyze(&concentrated_ledger());
        assert!(!analysis.patterns.is_empty());
        for p in &analysis.patterns {
            assert!(
                p.loss_ratio > analysis.loss_ratio,
                "{} ratio {} <= global {}",
                p.condition,
                p.loss_ratio,
                analysis.loss_ratio
            );
        }
    }

    #[test]
    fn test_patterns_sorted_by_loss_amount() {
        let analysis = analyzer().analyze(&concentrated_ledger());
        for pair in analysis.patterns.windows(2) {
            assert!(pair[0].loss_amount >= pair[1].loss_amount);
        }
    }

    #[test]
    fn test_max_patterns_cap() {
        let mut config = AnalyzerConfig::default();
        config.max_patterns = 2;
        let analyzer = TradeLogAnalyzer::new(FeatureCatalog::standard(), config);
        let analysis = analyzer.analyze(&concentrated_ledger());
        assert!(analysis.patterns.len() <= 2);
    }

    struct CannedProvider {
        fail: bool,
    }

    impl StatAnalysisProvider for CannedProvider {
        fn analyze(&self, _ledger: &TradeLedger, _allow_ml: bool) -> Result<Vec<ExternalSuggestion>> {
            if self.fail {
                anyhow::bail!("collaborator offline");
            }
            Ok(vec![ExternalSuggestion {
                name: "ext_spread".to_string(),
                condition: "spread <= 0.1".to_string(),
                category: "spread".to_string(),
                improvement: 120.0,
                exclusion_ratio: 0.08,
                p_value: 0.01,
                significant: true,
            }])
        }
    }

    #[test]
    fn test_external_suggestions_passthrough_and_degrade() {
        let ledger = concentrated_ledger();
        let ok = analyzer().analyze_with(&ledger, Some(&CannedProvider { fail: false }), false);
        assert_eq!(ok.external_suggestions.len(), 1);
        assert_eq!(ok.external_suggestions[0].name, "ext_spread");

        let failed = analyzer().analyze_with(&ledger, Some(&CannedProvider { fail: true }), false);
        assert!(failed.external_suggestions.is_empty());
        // The rest of the analysis is unaffected.
        assert_eq!(failed.total_trades, 100);
    }

    #[test]
    fn test_fmt_num() {
        assert_eq!(fmt_num(9.0), "9.0");
        assert_eq!(fmt_num(-3.0), "-3.0");
        assert_eq!(fmt_num(28.53), "28.53");
    }
}
