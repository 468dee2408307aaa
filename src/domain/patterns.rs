use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Hourly,
    FiveMinute,
    Weekday,
    Session,
    Threshold,
    Range,
    Compound,
    External,
}

impl PatternKind {
    pub fn label(&self) -> &'static str {
        match self {
            PatternKind::Hourly => "hourly",
            PatternKind::FiveMinute => "five_minute",
            PatternKind::Weekday => "weekday",
            PatternKind::Session => "session",
            PatternKind::Threshold => "threshold",
            PatternKind::Range => "range",
            PatternKind::Compound => "compound",
            PatternKind::External => "external",
        }
    }
}

/// A statistically distinctive subset of trades with above-baseline loss
/// concentration. Immutable once mined; `loss_ratio` always exceeds the
/// ledger's overall loss ratio or the pattern was never created.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LossPattern {
    pub kind: PatternKind,
    /// Primary feature the pattern is expressed on.
    pub feature: String,
    /// Membership condition of the lossy subset, in rule-expression form.
    pub condition: String,
    pub description: String,
    /// Trades falling inside the subset.
    pub trade_count: usize,
    pub loss_count: usize,
    /// Absolute loss amount inside the subset.
    pub loss_amount: Decimal,
    pub loss_ratio: f64,
    /// Share of the ledger's total losses explained by the subset.
    pub coverage: f64,
    pub confidence: f64,
    pub p_value: Option<f64>,
    #[serde(default)]
    pub metadata: HashMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossDirection {
    HigherIsWorse,
    LowerIsWorse,
    Nonlinear,
}

/// Per-feature separation between losing and winning trades.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureImportance {
    pub feature: String,
    /// min(1, |separation| / 2), so 0..1.
    pub importance: f64,
    pub direction: LossDirection,
    pub loss_mean: f64,
    pub profit_mean: f64,
    /// Pooled-sigma standardized mean difference, loss minus profit.
    pub separation: f64,
}
