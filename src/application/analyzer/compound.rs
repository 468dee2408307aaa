//! Compound pattern mining: median-split quadrants across feature-family
//! pairs, held to a stricter excess-loss bar than single-feature cuts.

use std::collections::HashMap;

use chrono::Timelike;

use crate::domain::features::{FeatureCatalog, FeatureFamily};
use crate::domain::ledger::{TradeLedger, TradeRecord};
use crate::domain::patterns::{LossPattern, PatternKind};

use super::stats;
use super::{fmt_num, pattern_from_subset, PatternGate};

/// Family pairings probed for joint loss concentration.
const FAMILY_PAIRS: [(FeatureFamily, FeatureFamily); 3] = [
    (FeatureFamily::Time, FeatureFamily::Price),
    (FeatureFamily::Volume, FeatureFamily::Strength),
    (FeatureFamily::Size, FeatureFamily::Volume),
];

fn family_features(catalog: &FeatureCatalog, family: FeatureFamily) -> Vec<String> {
    if family == FeatureFamily::Time {
        // Time structure enters compounds through the derived hour.
        return vec!["hour".to_string()];
    }
    catalog
        .analyzable()
        .filter(|s| s.family == family)
        .map(|s| s.name.clone())
        .collect()
}

fn value_of(trade: &TradeRecord, feature: &str) -> Option<f64> {
    if feature == "hour" {
        return Some(trade.entry_time.hour() as f64);
    }
    trade.feature(feature)
}

/// Best quadrant per feature pair, or nothing when no quadrant clears the
/// gate.
pub(crate) fn compound_patterns(
    ledger: &TradeLedger,
    catalog: &FeatureCatalog,
    global_loss_ratio: f64,
    total_losses: usize,
    gate: &PatternGate,
) -> Vec<LossPattern> {
    let mut out = Vec::new();
    for (family_a, family_b) in FAMILY_PAIRS {
        for a in family_features(catalog, family_a) {
            for b in family_features(catalog, family_b) {
                if a == b {
                    continue;
                }
                if let Some(pattern) = best_quadrant(
                    ledger,
                    &a,
                    &b,
                    global_loss_ratio,
                    total_losses,
                    gate,
                ) {
                    out.push(pattern);
                }
            }
        }
    }
    out
}

fn best_quadrant(
    ledger: &TradeLedger,
    a: &str,
    b: &str,
    global_loss_ratio: f64,
    total_losses: usize,
    gate: &PatternGate,
) -> Option<LossPattern> {
    let rows: Vec<(&TradeRecord, f64, f64)> = ledger
        .trades
        .iter()
        .filter_map(|t| match (value_of(t, a), value_of(t, b)) {
            (Some(va), Some(vb)) => Some((t, va, vb)),
            _ => None,
        })
        .collect();
    if rows.len() < gate.min_samples * 2 {
        return None;
    }

    let col_a: Vec<f64> = rows.iter().map(|(_, va, _)| *va).collect();
    let col_b: Vec<f64> = rows.iter().map(|(_, _, vb)| *vb).collect();
    let split_a = stats::median(&col_a)?;
    let split_b = stats::median(&col_b)?;

    let mut best: Option<LossPattern> = None;
    for a_high in [false, true] {
        for b_high in [false, true] {
            let subset: Vec<&TradeRecord> = rows
                .iter()
                .filter(|(_, va, vb)| {
                    side_holds(*va, split_a, a_high) && side_holds(*vb, split_b, b_high)
                })
                .map(|(t, _, _)| *t)
                .collect();

            let condition = format!(
                "{} and {}",
                side_text(a, split_a, a_high),
                side_text(b, split_b, b_high)
            );
            let losses = subset.iter().filter(|t| t.is_loss()).count();
            let description = format!(
                "{} with {} loses {} of {} trades",
                side_text(a, split_a, a_high),
                side_text(b, split_b, b_high),
                losses,
                subset.len()
            );
            let mut metadata = HashMap::new();
            metadata.insert("split_a".to_string(), split_a);
            metadata.insert("split_b".to_string(), split_b);
            metadata.insert("a_high".to_string(), if a_high { 1.0 } else { 0.0 });
            metadata.insert("b_high".to_string(), if b_high { 1.0 } else { 0.0 });

            let candidate = pattern_from_subset(
                PatternKind::Compound,
                &format!("{}+{}", a, b),
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
                    Some(cur) => {
                        p.loss_ratio > cur.loss_ratio
                            || (p.loss_ratio == cur.loss_ratio && p.loss_count > cur.loss_count)
                    }
                };
                if better {
                    best = Some(p);
                }
            }
        }
    }
    best
}

fn side_holds(value: f64, split: f64, high: bool) -> bool {
    if high {
        value >= split
    } else {
        value < split
    }
}

fn side_text(feature: &str, split: f64, high: bool) -> String {
    let op = if high { ">=" } else { "<" };
    format!("{} {} {}", feature, op, fmt_num(split))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn trade(hour: u32, features: &[(&str, f64)], profit: Decimal) -> TradeRecord {
        let entry = Utc.with_ymd_and_hms(2024, 3, 5, hour, 15, 0).unwrap();
        TradeRecord {
            entry_time: entry,
            exit_time: entry + chrono::Duration::minutes(20),
            profit,
            features: features
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }

    fn gate() -> PatternGate {
        PatternGate {
            min_samples: 5,
            margin: 1.2,
            confidence_floor: 0.2,
        }
    }

    #[test]
    fn test_high_volume_low_rsi_quadrant() {
        let mut trades = Vec::new();
        for _ in 0..20 {
            trades.push(trade(10, &[("volume", 2000.0), ("rsi", 20.0)], dec!(-10)));
        }
        for _ in 0..20 {
            trades.push(trade(11, &[("volume", 500.0), ("rsi", 60.0)], dec!(10)));
        }
        let ledger = TradeLedger { trades };
        let catalog = FeatureCatalog::standard();
        let patterns = compound_patterns(
            &ledger,
            &catalog,
            ledger.loss_ratio(),
            ledger.loss_count(),
            &gate(),
        );

        let joint = patterns
            .iter()
            .find(|p| p.feature == "volume+rsi")
            .expect("volume+rsi quadrant");
        assert_eq!(joint.kind, PatternKind::Compound);
        assert!(joint.condition.contains("volume >= "));
        assert!(joint.condition.contains("rsi < "));
        assert_eq!(joint.loss_count, 20);
        assert!(joint.loss_ratio > 0.99);
    }

    #[test]
    fn test_uniform_ledger_yields_no_compounds() {
        // rsi cycles over 8 values so each median half holds losses and wins
        // in equal measure; every quadrant sits exactly at the global ratio.
        let mut trades = Vec::new();
        for i in 0..40 {
            let profit = if i % 2 == 0 { dec!(-5) } else { dec!(5) };
            trades.push(trade(
                9 + (i % 6),
                &[("volume", 1000.0 + i as f64), ("rsi", 45.0 + (i % 8) as f64)],
                profit,
            ));
        }
        let ledger = TradeLedger { trades };
        let catalog = FeatureCatalog::standard();
        let patterns = compound_patterns(
            &ledger,
            &catalog,
            ledger.loss_ratio(),
            ledger.loss_count(),
            &gate(),
        );
        assert!(patterns.is_empty());
    }
}
