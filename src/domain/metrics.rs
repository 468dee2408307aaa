//! Canonical metric names, improvement directions and comparison weights.
//!
//! Every component exchanges metrics as a plain string-keyed map; this module
//! owns the vocabulary so comparator, optimizers and reporting agree on which
//! direction counts as an improvement.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::ledger::TradeLedger;

pub const TOTAL_PROFIT: &str = "total_profit";
pub const TOTAL_TRADES: &str = "total_trades";
pub const WIN_RATE: &str = "win_rate";
pub const PROFIT_FACTOR: &str = "profit_factor";
pub const MAX_DRAWDOWN: &str = "max_drawdown";
pub const LOSS_AMOUNT: &str = "loss_amount";
pub const AVG_PROFIT: &str = "avg_profit";

/// Metrics voting on the overall-improved verdict when no target is configured.
pub const KEY_METRICS: &[&str] = &[TOTAL_PROFIT, WIN_RATE, PROFIT_FACTOR, MAX_DRAWDOWN];

/// Profit factor reported when the ledger has no losing trades.
const PROFIT_FACTOR_CAP: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricDirection {
    HigherIsBetter,
    LowerIsBetter,
}

/// Improvement direction per metric. Unknown metrics default to higher-is-better.
pub fn direction_of(metric: &str) -> MetricDirection {
    match metric {
        MAX_DRAWDOWN | LOSS_AMOUNT => MetricDirection::LowerIsBetter,
        _ => MetricDirection::HigherIsBetter,
    }
}

/// Relative weight of a metric inside the bounded improvement score.
pub fn weight_of(metric: &str) -> f64 {
    match metric {
        TOTAL_PROFIT => 0.4,
        WIN_RATE => 0.2,
        PROFIT_FACTOR => 0.2,
        MAX_DRAWDOWN => 0.2,
        _ => 0.1,
    }
}

/// Standard metric map for one ledger.
pub fn metrics_from_ledger(ledger: &TradeLedger) -> HashMap<String, f64> {
    let mut metrics = HashMap::new();
    metrics.insert(TOTAL_TRADES.to_string(), ledger.len() as f64);

    let total_profit: f64 = ledger.trades.iter().map(|t| t.profit_f64()).sum();
    metrics.insert(TOTAL_PROFIT.to_string(), total_profit);
    metrics.insert(WIN_RATE.to_string(), ledger.win_rate());

    let loss_amount: f64 = ledger.losses().map(|t| t.profit_f64().abs()).sum();
    let profit_amount: f64 = ledger.wins().map(|t| t.profit_f64()).sum();
    metrics.insert(LOSS_AMOUNT.to_string(), loss_amount);

    let profit_factor = if loss_amount > 0.0 {
        profit_amount / loss_amount
    } else if profit_amount > 0.0 {
        PROFIT_FACTOR_CAP
    } else {
        0.0
    };
    metrics.insert(PROFIT_FACTOR.to_string(), profit_factor);
    metrics.insert(MAX_DRAWDOWN.to_string(), max_drawdown(ledger));

    let avg = if ledger.is_empty() {
        0.0
    } else {
        total_profit / ledger.len() as f64
    };
    metrics.insert(AVG_PROFIT.to_string(), avg);

    metrics
}

/// Peak-to-trough decline of cumulative profit, in currency units (positive).
fn max_drawdown(ledger: &TradeLedger) -> f64 {
    let mut ordered: Vec<f64> = {
        let mut trades: Vec<_> = ledger.trades.iter().collect();
        trades.sort_by_key(|t| t.exit_time);
        trades.iter().map(|t| t.profit_f64()).collect()
    };

    let mut equity = 0.0;
    let mut peak = 0.0;
    let mut worst = 0.0;
    for pnl in ordered.drain(..) {
        equity += pnl;
        if equity > peak {
            peak = equity;
        }
        let dd = peak - equity;
        if dd > worst {
            worst = dd;
        }
    }
    worst
}
