use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One closed trade as reported by the backtest engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeRecord {
    pub entry_time: DateTime<Utc>,
    pub exit_time: DateTime<Utc>,
    /// Realized profit after fees. Negative for losses.
    pub profit: Decimal,
    /// Feature snapshot captured at entry.
    #[serde(default)]
    pub features: HashMap<String, f64>,
}

impl TradeRecord {
    pub fn is_loss(&self) -> bool {
        self.profit < Decimal::ZERO
    }

    pub fn is_win(&self) -> bool {
        self.profit > Decimal::ZERO
    }

    /// Feature lookup. Non-finite values are treated as missing.
    pub fn feature(&self, name: &str) -> Option<f64> {
        self.features.get(name).copied().filter(|v| v.is_finite())
    }

    pub fn profit_f64(&self) -> f64 {
        self.profit.to_f64().unwrap_or(0.0)
    }
}

/// Row-per-trade output of one backtest run. Read-only to the refinement engine.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TradeLedger {
    pub trades: Vec<TradeRecord>,
}

impl TradeLedger {
    pub fn new(trades: Vec<TradeRecord>) -> Self {
        Self { trades }
    }

    pub fn len(&self) -> usize {
        self.trades.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trades.is_empty()
    }

    pub fn losses(&self) -> impl Iterator<Item = &TradeRecord> {
        self.trades.iter().filter(|t| t.is_loss())
    }

    pub fn wins(&self) -> impl Iterator<Item = &TradeRecord> {
        self.trades.iter().filter(|t| t.is_win())
    }

    pub fn loss_count(&self) -> usize {
        self.losses().count()
    }

    pub fn win_count(&self) -> usize {
        self.wins().count()
    }

    /// Fraction of trades that closed at a loss. 0.0 for an empty ledger.
    pub fn loss_ratio(&self) -> f64 {
        if self.trades.is_empty() {
            return 0.0;
        }
        self.loss_count() as f64 / self.trades.len() as f64
    }

    pub fn win_rate(&self) -> f64 {
        if self.trades.is_empty() {
            return 0.0;
        }
        self.win_count() as f64 / self.trades.len() as f64
    }

    pub fn total_profit(&self) -> Decimal {
        self.trades.iter().map(|t| t.profit).sum()
    }

    /// Absolute sum of losing trades' profits.
    pub fn loss_amount(&self) -> Decimal {
        self.losses().map(|t| t.profit.abs()).sum()
    }

    pub fn profit_amount(&self) -> Decimal {
        self.wins().map(|t| t.profit).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn trade(profit: Decimal) -> TradeRecord {
        let entry = Utc.with_ymd_and_hms(2024, 3, 1, 9, 30, 0).unwrap();
        TradeRecord {
            entry_time: entry,
            exit_time: entry + chrono::Duration::hours(1),
            profit,
            features: HashMap::new(),
        }
    }

    #[test]
    fn test_loss_ratio_and_amounts() {
        let ledger = TradeLedger::new(vec![
            trade(dec!(10.50)),
            trade(dec!(-4.25)),
            trade(dec!(-5.75)),
            trade(dec!(2.00)),
        ]);

        assert_eq!(ledger.len(), 4);
        assert_eq!(ledger.loss_count(), 2);
        assert!((ledger.loss_ratio() - 0.5).abs() < 1e-12);
        assert_eq!(ledger.total_profit(), dec!(2.50));
        assert_eq!(ledger.loss_amount(), dec!(10.00));
        assert_eq!(ledger.profit_amount(), dec!(12.50));
    }

    #[test]
    fn test_empty_ledger_is_safe() {
        let ledger = TradeLedger::default();
        assert!(ledger.is_empty());
        assert_eq!(ledger.loss_ratio(), 0.0);
        assert_eq!(ledger.win_rate(), 0.0);
        assert_eq!(ledger.total_profit(), Decimal::ZERO);
    }

    #[test]
    fn test_breakeven_trade_is_neither_win_nor_loss() {
        let t = trade(dec!(0));
        assert!(!t.is_loss());
        assert!(!t.is_win());
    }

    #[test]
    fn test_non_finite_feature_is_missing() {
        let mut t = trade(dec!(1));
        t.features.insert("rsi".to_string(), f64::NAN);
        assert_eq!(t.feature("rsi"), None);
        assert_eq!(t.feature("absent"), None);
    }
}
