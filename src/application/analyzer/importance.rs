//! Per-feature loss/profit separation ranking.

use crate::domain::features::FeatureCatalog;
use crate::domain::ledger::TradeLedger;
use crate::domain::patterns::{FeatureImportance, LossDirection};

use super::stats;

/// Separation magnitudes at or beyond this map to importance 1.0.
const SATURATION: f64 = 2.0;
/// Separations inside this band are treated as directionless.
const DIRECTION_BAND: f64 = 0.2;

/// Ranks analyzable features by standardized loss/win separation,
/// descending. Features with too few samples in either class are skipped.
pub(crate) fn feature_importances(
    ledger: &TradeLedger,
    catalog: &FeatureCatalog,
    min_samples: usize,
) -> Vec<FeatureImportance> {
    let mut out = Vec::new();
    for spec in catalog.analyzable() {
        let loss_values: Vec<f64> = ledger
            .losses()
            .filter_map(|t| t.feature(&spec.name))
            .collect();
        let win_values: Vec<f64> = ledger
            .wins()
            .filter_map(|t| t.feature(&spec.name))
            .collect();
        if loss_values.len() < min_samples || win_values.len() < min_samples {
            continue;
        }
        let Some(separation) = stats::separation(&loss_values, &win_values) else {
            continue;
        };

        let direction = if separation > DIRECTION_BAND {
            LossDirection::HigherIsWorse
        } else if separation < -DIRECTION_BAND {
            LossDirection::LowerIsWorse
        } else {
            LossDirection::Nonlinear
        };

        out.push(FeatureImportance {
            feature: spec.name.clone(),
            importance: (separation.abs() / SATURATION).min(1.0),
            direction,
            loss_mean: stats::mean(&loss_values),
            profit_mean: stats::mean(&win_values),
            separation,
        });
    }
    out.sort_by(|a, b| {
        b.importance
            .partial_cmp(&a.importance)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ledger::TradeRecord;
    use chrono::{TimeZone, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn trade(features: &[(&str, f64)], profit: Decimal) -> TradeRecord {
        let entry = Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap();
        TradeRecord {
            entry_time: entry,
            exit_time: entry + chrono::Duration::minutes(10),
            profit,
            features: features
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
        }
    }

    #[test]
    fn test_separating_feature_ranks_first() {
        let mut trades = Vec::new();
        for i in 0..15 {
            // Losses carry low rsi; spread is pure noise.
            trades.push(trade(
                &[("rsi", 20.0 + (i % 5) as f64), ("spread", 0.04 + (i % 3) as f64 * 0.01)],
                dec!(-5),
            ));
        }
        for i in 0..15 {
            trades.push(trade(
                &[("rsi", 60.0 + (i % 5) as f64), ("spread", 0.04 + (i % 3) as f64 * 0.01)],
                dec!(5),
            ));
        }
        let ledger = TradeLedger { trades };
        let importances =
            feature_importances(&ledger, &FeatureCatalog::standard(), 5);

        assert_eq!(importances[0].feature, "rsi");
        assert_eq!(importances[0].direction, LossDirection::LowerIsWorse);
        assert!((importances[0].importance - 1.0).abs() < 1e-9);
        assert!(importances[0].loss_mean < importances[0].profit_mean);

        let spread = importances.iter().find(|i| i.feature == "spread").unwrap();
        assert_eq!(spread.direction, LossDirection::Nonlinear);
        assert!(spread.importance < 0.2);
    }

    #[test]
    fn test_insufficient_class_samples_skipped() {
        let trades = vec![
            trade(&[("rsi", 30.0)], dec!(-5)),
            trade(&[("rsi", 55.0)], dec!(5)),
        ];
        let ledger = TradeLedger { trades };
        let importances =
            feature_importances(&ledger, &FeatureCatalog::standard(), 5);
        assert!(importances.is_empty());
    }
}
