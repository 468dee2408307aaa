//! Simulated collaborators for demos and tests.
//!
//! The executor generates one deterministic candidate stream per seed and
//! replays it for every request, so two rules differ only in which entries
//! they admit. Losses are concentrated in a hidden regime (the 09:00 UTC
//! hour, oversold entries, wide spreads) for the analyzer to find.

use anyhow::Result;
use chrono::{DateTime, Datelike, NaiveDate, Utc, Weekday};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

use crate::application::synthesis::parse_rule;
use crate::domain::features::FeatureCatalog;
use crate::domain::ledger::{TradeLedger, TradeRecord};
use crate::domain::metrics::metrics_from_ledger;
use crate::domain::ports::{
    BacktestExecutor, BacktestOutcome, BacktestRequest, BacktestStatus, DateRange, ProgressSink,
};

const MARKET_OPEN_HOUR: u32 = 9;
const MARKET_HOURS: u32 = 7;
const HOLD_MINUTES: i64 = 45;
/// Half-width of the uniform profit jitter, in currency units.
const NOISE_SPAN: f64 = 12.0;

struct CandidateEntry {
    entry_time: DateTime<Utc>,
    features: HashMap<String, f64>,
    profit: f64,
}

impl CandidateEntry {
    fn to_record(&self) -> TradeRecord {
        TradeRecord {
            entry_time: self.entry_time,
            exit_time: self.entry_time + chrono::Duration::minutes(HOLD_MINUTES),
            profit: money(self.profit),
            features: self.features.clone(),
        }
    }
}

fn money(value: f64) -> Decimal {
    Decimal::try_from((value * 100.0).round() / 100.0).unwrap_or_default()
}

/// Deterministic market stand-in implementing the executor port.
pub struct SimulatedBacktestExecutor {
    catalog: FeatureCatalog,
    seed: u64,
    entries_per_day: usize,
}

impl SimulatedBacktestExecutor {
    pub fn new(seed: u64) -> Self {
        Self {
            catalog: FeatureCatalog::standard(),
            seed,
            entries_per_day: 6,
        }
    }

    pub fn with_entries_per_day(mut self, entries: usize) -> Self {
        self.entries_per_day = entries;
        self
    }

    fn trading_days(range: &DateRange) -> Vec<NaiveDate> {
        range
            .dates()
            .into_iter()
            .filter(|d| !matches!(d.weekday(), Weekday::Sat | Weekday::Sun))
            .collect()
    }

    /// The candidate stream is a pure function of the seed and the day list;
    /// the rule under test never touches the generator state.
    fn candidates(&self, days: &[NaiveDate]) -> Vec<CandidateEntry> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let mut price = 100.0;
        let mut out = Vec::with_capacity(days.len() * self.entries_per_day);

        for date in days {
            for _ in 0..self.entries_per_day {
                let hour = MARKET_OPEN_HOUR + rng.gen_range(0..MARKET_HOURS);
                let minute = rng.gen_range(0..60u32);
                let rsi = rng.gen_range(15.0..85.0);
                let volume = rng.gen_range(100.0..1000.0);
                let spread = rng.gen_range(0.5..3.0);
                let atr = rng.gen_range(0.5..5.0);
                let trend_strength = rng.gen_range(-1.0..1.0);
                price *= 1.0 + rng.gen_range(-0.004..0.004);

                let mut edge = 4.0;
                if hour == 9 {
                    edge -= 13.0;
                }
                if rsi < 25.0 {
                    edge -= 7.0;
                }
                if spread > 2.5 {
                    edge -= 3.0;
                }
                let profit = edge + rng.gen_range(-NOISE_SPAN..NOISE_SPAN);

                let Some(naive) = date.and_hms_opt(hour, minute, 0) else {
                    continue;
                };
                let entry_time = naive.and_utc();
                let seconds_of_day = f64::from(hour * 3600 + minute * 60);

                let mut features = HashMap::new();
                features.insert("timestamp".to_string(), entry_time.timestamp() as f64);
                features.insert("entry_price".to_string(), price);
                features.insert("spread".to_string(), spread);
                features.insert("atr".to_string(), atr);
                features.insert("volume".to_string(), volume);
                features.insert("rsi".to_string(), rsi);
                features.insert("trend_strength".to_string(), trend_strength);
                features.insert("position_size".to_string(), 1.0);
                features.insert("hour".to_string(), f64::from(hour));
                features.insert("minute_slot".to_string(), (seconds_of_day / 300.0).floor());

                out.push(CandidateEntry {
                    entry_time,
                    features,
                    profit,
                });
            }
        }
        out
    }
}

impl BacktestExecutor for SimulatedBacktestExecutor {
    fn run(&mut self, request: &BacktestRequest) -> Result<BacktestOutcome> {
        let started = Instant::now();
        let rule = match parse_rule(&request.rule) {
            Ok(rule) => rule,
            Err(e) => {
                return Ok(BacktestOutcome::sentinel(
                    BacktestStatus::Failed,
                    format!("entry rule rejected: {}", e),
                ));
            }
        };

        let days = Self::trading_days(&request.range);
        if days.is_empty() {
            return Ok(BacktestOutcome::sentinel(
                BacktestStatus::NoTrades,
                format!(
                    "no trading days between {} and {}",
                    request.range.start, request.range.end
                ),
            ));
        }

        let params: Vec<f64> = request.parameters.values().copied().collect();
        let candidates = self.candidates(&days);
        let mut taken = Vec::new();
        for candidate in &candidates {
            match rule.evaluate(&candidate.features, &params, &self.catalog) {
                Ok(true) => taken.push(candidate.to_record()),
                Ok(false) => {}
                Err(e) => {
                    return Ok(BacktestOutcome::sentinel(
                        BacktestStatus::Failed,
                        format!("entry rule failed to evaluate: {}", e),
                    ));
                }
            }
        }

        if taken.is_empty() {
            return Ok(BacktestOutcome::sentinel(
                BacktestStatus::NoTrades,
                "entry rule admitted no trades".to_string(),
            ));
        }

        let ledger = TradeLedger::new(taken);
        let metrics = metrics_from_ledger(&ledger);
        debug!(
            days = days.len(),
            candidates = candidates.len(),
            taken = ledger.len(),
            "simulated backtest finished"
        );
        Ok(BacktestOutcome::completed(ledger, metrics, started.elapsed()))
    }
}

/// Progress sink that forwards run updates to the log.
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn notify(&self, message: &str) {
        info!("{}", message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::metrics::{TOTAL_PROFIT, TOTAL_TRADES};
    use std::collections::BTreeMap;

    const OPEN_RULE: &str = "allow_entry = volume > 0.0\nreturn allow_entry\n";

    fn request(rule: &str) -> BacktestRequest {
        BacktestRequest {
            rule: rule.to_string(),
            sell_rule: None,
            range: DateRange::new(
                NaiveDate::from_ymd_opt(2024, 3, 4).unwrap(),
                NaiveDate::from_ymd_opt(2024, 3, 29).unwrap(),
            ),
            parameters: BTreeMap::new(),
        }
    }

    #[test]
    fn test_same_seed_same_outcome() {
        let mut a = SimulatedBacktestExecutor::new(7);
        let mut b = SimulatedBacktestExecutor::new(7);

        let first = a.run(&request(OPEN_RULE)).unwrap();
        let second = b.run(&request(OPEN_RULE)).unwrap();

        assert!(first.is_completed());
        assert_eq!(first.metrics[TOTAL_TRADES], second.metrics[TOTAL_TRADES]);
        assert_eq!(first.metrics[TOTAL_PROFIT], second.metrics[TOTAL_PROFIT]);
    }

    #[test]
    fn test_guard_excludes_hidden_loss_hour() {
        let guarded = "\
allow_entry = volume > 0.0
if hour == 9.0: allow_entry = false
return allow_entry
";
        let mut executor = SimulatedBacktestExecutor::new(7);
        let open = executor.run(&request(OPEN_RULE)).unwrap();
        let filtered = executor.run(&request(guarded)).unwrap();

        assert!(open.is_completed() && filtered.is_completed());
        assert!(filtered.metrics[TOTAL_TRADES] < open.metrics[TOTAL_TRADES]);
        assert!(filtered.metrics[TOTAL_PROFIT] > open.metrics[TOTAL_PROFIT]);
        assert!(filtered
            .ledger
            .trades
            .iter()
            .all(|t| t.feature("hour") != Some(9.0)));
    }

    #[test]
    fn test_unparseable_rule_reports_failed_status() {
        let mut executor = SimulatedBacktestExecutor::new(7);
        let outcome = executor.run(&request("allow_entry = @@\n")).unwrap();
        assert_eq!(outcome.status, BacktestStatus::Failed);
        assert!(outcome.message.unwrap().contains("rejected"));
    }

    #[test]
    fn test_unsatisfiable_rule_reports_no_trades() {
        let mut executor = SimulatedBacktestExecutor::new(7);
        let outcome = executor
            .run(&request("allow_entry = volume > 100000.0\nreturn allow_entry\n"))
            .unwrap();
        assert_eq!(outcome.status, BacktestStatus::NoTrades);
        assert!(outcome.ledger.is_empty());
    }

    #[test]
    fn test_weekend_only_range_has_no_trading_days() {
        let mut executor = SimulatedBacktestExecutor::new(7);
        let mut req = request(OPEN_RULE);
        // 2024-03-09 and 2024-03-10 are Saturday and Sunday.
        req.range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 3, 9).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 10).unwrap(),
        );
        let outcome = executor.run(&req).unwrap();
        assert_eq!(outcome.status, BacktestStatus::NoTrades);
        assert!(outcome.message.unwrap().contains("no trading days"));
    }

    #[test]
    fn test_snapshot_carries_catalog_features() {
        let mut executor = SimulatedBacktestExecutor::new(7);
        let outcome = executor.run(&request(OPEN_RULE)).unwrap();
        let trade = &outcome.ledger.trades[0];
        for name in [
            "timestamp",
            "entry_price",
            "spread",
            "atr",
            "volume",
            "rsi",
            "trend_strength",
            "position_size",
            "hour",
            "minute_slot",
        ] {
            assert!(trade.feature(name).is_some(), "missing feature {}", name);
        }
        let hour = trade.feature("hour").unwrap();
        assert!((9.0..16.0).contains(&hour));
    }
}
