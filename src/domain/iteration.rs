use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

use crate::domain::filters::FilterCandidate;
use crate::domain::ledger::TradeLedger;

/// One completed refinement pass. Appended to the run history, never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IterationResult {
    /// Strictly increasing and unique within a run, starting at 1.
    pub index: usize,
    /// Rule source fed into this iteration's backtest.
    pub rule: String,
    /// Filters merged at the end of this pass to form the next rule.
    pub accepted: Vec<FilterCandidate>,
    pub metrics: HashMap<String, f64>,
    /// Retained only when configured; costs memory on long runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ledger: Option<TradeLedger>,
    pub duration: Duration,
    pub finished_at: DateTime<Utc>,
}

impl IterationResult {
    /// Metric lookup with a zero default for absent keys.
    pub fn metric(&self, name: &str) -> f64 {
        self.metrics.get(name).copied().unwrap_or(0.0)
    }
}

/// Outcome of one guard-merge attempt. On failure the original rule text is
/// returned untouched; a partially merged rule is never produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BuildResult {
    pub success: bool,
    pub rule: String,
    pub applied: Vec<FilterCandidate>,
    pub error: Option<String>,
    /// Variables referenced by the applied guard conditions.
    pub referenced_vars: Vec<String>,
    /// Preamble assignments generated for derived features.
    pub preamble: Vec<String>,
}

impl BuildResult {
    pub fn rejected(original: &str, error: impl Into<String>) -> Self {
        Self {
            success: false,
            rule: original.to_string(),
            applied: Vec::new(),
            error: Some(error.into()),
            referenced_vars: Vec::new(),
            preamble: Vec::new(),
        }
    }
}
