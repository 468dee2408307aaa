//! Threshold and fixed-range pattern mining over numeric features.

use std::collections::HashMap;

use crate::domain::features::FeatureCatalog;
use crate::domain::ledger::{TradeLedger, TradeRecord};
use crate::domain::patterns::{LossPattern, PatternKind};

use super::stats;
use super::{fmt_num, pattern_from_subset, PatternGate};

/// Percentiles probed for "value at or below" cuts.
const BELOW_PERCENTILES: [f64; 3] = [10.0, 20.0, 30.0];
/// Percentiles probed for "value at or above" cuts.
const ABOVE_PERCENTILES: [f64; 3] = [70.0, 80.0, 90.0];
/// Minimum standardized loss/win separation before a feature is probed.
const SEPARATION_GATE: f64 = 0.3;

/// Direction is carried in pattern metadata for the generator.
pub(crate) const DIRECTION_BELOW: f64 = 0.0;
pub(crate) const DIRECTION_ABOVE: f64 = 1.0;

/// Fixed position-size tiers, upper bound exclusive.
const SIZE_TIERS: [(f64, f64, &str); 5] = [
    (0.0, 1.0, "micro"),
    (1.0, 2.0, "small"),
    (2.0, 5.0, "medium"),
    (5.0, 20.0, "large"),
    (20.0, f64::INFINITY, "jumbo"),
];

/// At most one below-cut and one above-cut pattern per analyzable feature,
/// keeping the best-ratio threshold among the probed percentiles.
pub(crate) fn threshold_patterns(
    ledger: &TradeLedger,
    catalog: &FeatureCatalog,
    global_loss_ratio: f64,
    total_losses: usize,
    gate: &PatternGate,
) -> Vec<LossPattern> {
    let mut out = Vec::new();
    for spec in catalog.analyzable() {
        let pairs: Vec<(&TradeRecord, f64)> = ledger
            .trades
            .iter()
            .filter_map(|t| t.feature(&spec.name).map(|v| (t, v)))
            .collect();
        if pairs.is_empty() {
            continue;
        }

        let loss_values: Vec<f64> = pairs.iter().filter(|(t, _)| t.is_loss()).map(|(_, v)| *v).collect();
        let win_values: Vec<f64> = pairs.iter().filter(|(t, _)| t.is_win()).map(|(_, v)| *v).collect();
        if loss_values.len() < gate.min_samples || win_values.len() < gate.min_samples {
            continue;
        }
        let Some(sep) = stats::separation(&loss_values, &win_values) else {
            continue;
        };
        if sep.abs() <= SEPARATION_GATE {
            continue;
        }

        let mut sorted: Vec<f64> = pairs.iter().map(|(_, v)| *v).collect();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

        if let Some(p) = best_cut(&pairs, &sorted, &spec.name, sep, false, global_loss_ratio, total_losses, gate) {
            out.push(p);
        }
        if let Some(p) = best_cut(&pairs, &sorted, &spec.name, sep, true, global_loss_ratio, total_losses, gate) {
            out.push(p);
        }
    }
    out
}

#[allow(clippy::too_many_arguments)]
fn best_cut(
    pairs: &[(&TradeRecord, f64)],
    sorted: &[f64],
    feature: &str,
    separation: f64,
    above: bool,
    global_loss_ratio: f64,
    total_losses: usize,
    gate: &PatternGate,
) -> Option<LossPattern> {
    let percentiles = if above { ABOVE_PERCENTILES } else { BELOW_PERCENTILES };
    let mut best: Option<LossPattern> = None;

    for pct in percentiles {
        let threshold = stats::percentile(sorted, pct);
        let subset: Vec<&TradeRecord> = pairs
            .iter()
            .filter(|(_, v)| if above { *v >= threshold } else { *v <= threshold })
            .map(|(t, _)| *t)
            .collect();

        let op = if above { ">=" } else { "<=" };
        let condition = format!("{} {} {}", feature, op, fmt_num(threshold));
        let losses = subset.iter().filter(|t| t.is_loss()).count();
        let description = format!(
            "{} {} {} (p{:.0}) loses {} of {} trades",
            feature,
            op,
            fmt_num(threshold),
            pct,
            losses,
            subset.len()
        );
        let mut metadata = HashMap::new();
        metadata.insert("threshold".to_string(), threshold);
        metadata.insert("separation".to_string(), separation);
        metadata.insert("percentile".to_string(), pct);
        metadata.insert(
            "direction".to_string(),
            if above { DIRECTION_ABOVE } else { DIRECTION_BELOW },
        );

        let candidate = pattern_from_subset(
            PatternKind::Threshold,
            feature,
            condition,
            description,
            &subset,
            global_loss_ratio,
            total_losses,
            gate,
            metadata,
        );
        if let Some(p) = candidate {
            let better = match &best {
                None => true,
                Some(b) => {
                    p.loss_ratio > b.loss_ratio
                        || (p.loss_ratio == b.loss_ratio && p.loss_count > b.loss_count)
                }
            };
            if better {
                best = Some(p);
            }
        }
    }
    best
}

/// Fixed position-size tier patterns.
pub(crate) fn size_tier_patterns(
    ledger: &TradeLedger,
    global_loss_ratio: f64,
    total_losses: usize,
    gate: &PatternGate,
) -> Vec<LossPattern> {
    let mut out = Vec::new();
    for (low, high, label) in SIZE_TIERS {
        let subset: Vec<&TradeRecord> = ledger
            .trades
            .iter()
            .filter(|t| {
                t.feature("position_size")
                    .map(|v| v >= low && v < high)
                    .unwrap_or(false)
            })
            .collect();
        if subset.is_empty() {
            continue;
        }

        let condition = if high.is_finite() {
            format!(
                "position_size >= {} and position_size < {}",
                fmt_num(low),
                fmt_num(high)
            )
        } else {
            format!("position_size >= {}", fmt_num(low))
        };
        let description = format!("{} position tier concentrates losses", label);
        let mut metadata = HashMap::new();
        metadata.insert("tier_low".to_string(), low);
        if high.is_finite() {
            metadata.insert("tier_high".to_string(), high);
        }

        if let Some(pattern) = pattern_from_subset(
            PatternKind::Range,
            "position_size",
            condition,
            description,
            &subset,
            global_loss_ratio,
            total_losses,
            gate,
            metadata,
        ) {
            out.push(pattern);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn trade_with(feature: &str, value: f64, profit: Decimal) -> TradeRecord {
        let entry = Utc.with_ymd_and_hms(2024, 3, 4, 10, 0, 0).unwrap();
        let mut features = HashMap::new();
        features.insert(feature.to_string(), value);
        TradeRecord {
            entry_time: entry,
            exit_time: entry + chrono::Duration::minutes(15),
            profit,
            features,
        }
    }

    fn gate() -> PatternGate {
        PatternGate {
            min_samples: 5,
            margin: 1.1,
            confidence_floor: 0.2,
        }
    }

    #[test]
    fn test_low_rsi_losses_produce_below_cut() {
        let mut trades = Vec::new();
        for i in 0..30 {
            trades.push(trade_with("rsi", 18.0 + (i % 10) as f64, dec!(-10)));
        }
        for i in 0..30 {
            trades.push(trade_with("rsi", 55.0 + (i % 20) as f64, dec!(12)));
        }
        let ledger = TradeLedger { trades };
        let catalog = FeatureCatalog::standard();
        let patterns = threshold_patterns(
            &ledger,
            &catalog,
            ledger.loss_ratio(),
            ledger.loss_count(),
            &gate(),
        );

        let below = patterns
            .iter()
            .find(|p| p.metadata.get("direction") == Some(&DIRECTION_BELOW))
            .expect("below-cut rsi pattern");
        assert_eq!(below.feature, "rsi");
        assert!(below.condition.starts_with("rsi <= "));
        assert!(below.loss_ratio > 0.9);
        let thr = below.metadata["threshold"];
        assert!(thr < 50.0, "threshold {} should sit in the loss mass", thr);
    }

    #[test]
    fn test_inseparable_feature_is_skipped() {
        // Same rsi distribution for losses and wins: separation gate fails.
        let mut trades = Vec::new();
        for i in 0..20 {
            let v = 40.0 + (i % 10) as f64;
            trades.push(trade_with("rsi", v, dec!(-5)));
            trades.push(trade_with("rsi", v, dec!(5)));
        }
        let ledger = TradeLedger { trades };
        let catalog = FeatureCatalog::standard();
        let patterns = threshold_patterns(
            &ledger,
            &catalog,
            ledger.loss_ratio(),
            ledger.loss_count(),
            &gate(),
        );
        assert!(patterns.is_empty());
    }

    #[test]
    fn test_missing_feature_columns_are_silent() {
        let trades: Vec<TradeRecord> = (0..10)
            .map(|i| trade_with("volume", 900.0 + i as f64, if i < 5 { dec!(-3) } else { dec!(3) }))
            .collect();
        let ledger = TradeLedger { trades };
        let catalog = FeatureCatalog::standard();
        // rsi, atr etc. are absent from every snapshot; must not panic.
        let _ = threshold_patterns(
            &ledger,
            &catalog,
            ledger.loss_ratio(),
            ledger.loss_count(),
            &gate(),
        );
    }

    #[test]
    fn test_large_size_tier_pattern() {
        let mut trades = Vec::new();
        for i in 0..12 {
            trades.push(trade_with("position_size", 6.0 + (i % 5) as f64, dec!(-20)));
        }
        for i in 0..24 {
            trades.push(trade_with("position_size", 1.0 + (i % 1) as f64, dec!(8)));
        }
        let ledger = TradeLedger { trades };
        let patterns =
            size_tier_patterns(&ledger, ledger.loss_ratio(), ledger.loss_count(), &gate());
        let large = patterns
            .iter()
            .find(|p| p.condition == "position_size >= 5.0 and position_size < 20.0")
            .expect("large tier pattern");
        assert_eq!(large.kind, PatternKind::Range);
        assert_eq!(large.loss_count, 12);
    }
}
