//! Port interfaces to the engine's external collaborators.
//!
//! The refinement core is single-threaded and synchronous; every port is a
//! plain blocking trait. Expected failures (no trades, timeout) travel as
//! sentinel statuses, not errors, so the orchestrator can distinguish a
//! failed collaborator from an empty result.

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::domain::ledger::TradeLedger;

/// Closed date interval, end inclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    pub fn dates(&self) -> Vec<NaiveDate> {
        self.start
            .iter_days()
            .take_while(|d| *d <= self.end)
            .collect()
    }

    pub fn num_days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestRequest {
    pub rule: String,
    pub sell_rule: Option<String>,
    pub range: DateRange,
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacktestStatus {
    Completed,
    NoTrades,
    TimedOut,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestOutcome {
    pub status: BacktestStatus,
    pub ledger: TradeLedger,
    pub metrics: HashMap<String, f64>,
    pub execution_time: Duration,
    pub message: Option<String>,
}

impl BacktestOutcome {
    pub fn completed(ledger: TradeLedger, metrics: HashMap<String, f64>, took: Duration) -> Self {
        Self {
            status: BacktestStatus::Completed,
            ledger,
            metrics,
            execution_time: took,
            message: None,
        }
    }

    pub fn sentinel(status: BacktestStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            ledger: TradeLedger::default(),
            metrics: HashMap::new(),
            execution_time: Duration::ZERO,
            message: Some(message.into()),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == BacktestStatus::Completed
    }
}

/// The external engine that runs a rule against market data.
/// One blocking call per backtest; the implementation owns its timeout.
pub trait BacktestExecutor {
    fn run(&mut self, request: &BacktestRequest) -> Result<BacktestOutcome>;
}

/// One suggestion from the optional statistical-analysis collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalSuggestion {
    pub name: String,
    /// Entry condition in rule-expression form.
    pub condition: String,
    pub category: String,
    /// Projected profit improvement if applied, in currency units.
    pub improvement: f64,
    /// Share of trades the suggestion would exclude.
    pub exclusion_ratio: f64,
    pub p_value: f64,
    pub significant: bool,
}

/// Optional deeper-statistics collaborator. Absence degrades gracefully.
pub trait StatAnalysisProvider {
    fn analyze(&self, ledger: &TradeLedger, allow_ml: bool) -> Result<Vec<ExternalSuggestion>>;

    fn available(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredIteration {
    pub index: usize,
    pub metrics: HashMap<String, f64>,
    pub rule: String,
    pub filters: Vec<String>,
    pub duration_ms: u64,
    pub saved_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredFinal {
    pub run_id: String,
    pub iterations: usize,
    pub metrics: HashMap<String, f64>,
    pub rule: String,
    pub filters: Vec<String>,
    pub stop_reason: String,
    pub saved_at: DateTime<Utc>,
}

/// Key-addressed persistence, last-write-wins per key. "Write now, resume
/// later" is the whole contract.
pub trait IterationStore {
    fn save_iteration(&mut self, record: &StoredIteration) -> Result<()>;
    fn save_final(&mut self, record: &StoredFinal) -> Result<()>;
    fn load_iteration(&self, index: usize) -> Result<Option<StoredIteration>>;
}

/// Fire-and-forget progress sink. Never awaited, never affects control flow.
pub trait ProgressSink {
    fn notify(&self, message: &str);
}
