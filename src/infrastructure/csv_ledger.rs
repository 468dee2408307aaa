//! CSV trade-ledger loading and saving.
//!
//! Three columns are fixed: `entry_time` and `exit_time` as RFC 3339
//! timestamps and `profit` as a decimal amount. Every other column is read
//! as a numeric feature keyed by its header, so ledgers from different
//! backtest engines can carry whatever snapshot fields they have.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use crate::domain::ledger::{TradeLedger, TradeRecord};

fn column_index(headers: &csv::StringRecord, name: &str) -> Result<usize> {
    headers
        .iter()
        .position(|h| h == name)
        .with_context(|| format!("ledger CSV is missing the '{}' column", name))
}

fn parse_time(raw: &str, column: &str, row: usize) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .with_context(|| format!("row {}: '{}' is not an RFC 3339 {}", row, raw, column))
}

pub fn load_ledger_csv(path: &Path) -> Result<TradeLedger> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)
        .with_context(|| format!("Failed to open ledger CSV {:?}", path))?;

    let headers = reader
        .headers()
        .context("Failed to read CSV header")?
        .clone();
    let entry_idx = column_index(&headers, "entry_time")?;
    let exit_idx = column_index(&headers, "exit_time")?;
    let profit_idx = column_index(&headers, "profit")?;

    let mut trades = Vec::new();
    for (i, record) in reader.records().enumerate() {
        // Header occupies line 1.
        let row = i + 2;
        let record = record.with_context(|| format!("Failed to read CSV row {}", row))?;

        let raw_entry = record
            .get(entry_idx)
            .with_context(|| format!("row {}: missing entry_time", row))?;
        let raw_exit = record
            .get(exit_idx)
            .with_context(|| format!("row {}: missing exit_time", row))?;
        let raw_profit = record
            .get(profit_idx)
            .with_context(|| format!("row {}: missing profit", row))?;

        let entry_time = parse_time(raw_entry, "entry_time", row)?;
        let exit_time = parse_time(raw_exit, "exit_time", row)?;
        if exit_time < entry_time {
            bail!("row {}: exit_time precedes entry_time", row);
        }
        let profit = Decimal::from_str(raw_profit)
            .with_context(|| format!("row {}: profit '{}' is not a decimal", row, raw_profit))?;

        let mut features = HashMap::new();
        for (idx, header) in headers.iter().enumerate() {
            if idx == entry_idx || idx == exit_idx || idx == profit_idx {
                continue;
            }
            let Some(raw) = record.get(idx) else {
                continue;
            };
            if raw.is_empty() {
                continue;
            }
            let value: f64 = raw.parse().with_context(|| {
                format!("row {}: feature '{}' is not numeric: '{}'", row, header, raw)
            })?;
            if value.is_finite() {
                features.insert(header.to_string(), value);
            }
        }

        trades.push(TradeRecord {
            entry_time,
            exit_time,
            profit,
            features,
        });
    }

    info!(path = %path.display(), trades = trades.len(), "ledger loaded");
    Ok(TradeLedger::new(trades))
}

pub fn save_ledger_csv(ledger: &TradeLedger, path: &Path) -> Result<()> {
    let mut columns: BTreeSet<&str> = BTreeSet::new();
    for trade in &ledger.trades {
        columns.extend(trade.features.keys().map(String::as_str));
    }

    let mut writer = csv::WriterBuilder::new()
        .from_path(path)
        .with_context(|| format!("Failed to create ledger CSV {:?}", path))?;

    let mut header = vec!["entry_time", "exit_time", "profit"];
    header.extend(columns.iter().copied());
    writer.write_record(&header).context("Failed to write CSV header")?;

    for trade in &ledger.trades {
        let mut row = vec![
            trade.entry_time.to_rfc3339(),
            trade.exit_time.to_rfc3339(),
            trade.profit.to_string(),
        ];
        for column in &columns {
            row.push(
                trade
                    .features
                    .get(*column)
                    .map(|v| v.to_string())
                    .unwrap_or_default(),
            );
        }
        writer.write_record(&row).context("Failed to write CSV row")?;
    }
    writer.flush().context("Failed to flush ledger CSV")?;

    info!(path = %path.display(), trades = ledger.len(), "ledger saved");
    Ok(())
}
