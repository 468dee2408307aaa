//! Time-bucket pattern mining: hours, five-minute slots, weekdays and
//! fixed market sessions.

use std::collections::{BTreeMap, HashMap};

use chrono::{Datelike, Timelike};

use crate::domain::ledger::{TradeLedger, TradeRecord};
use crate::domain::patterns::{LossPattern, PatternKind};

use super::{pattern_from_subset, PatternGate};
use crate::domain::features::SESSIONS;

const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

fn group_by<K: Ord, F: Fn(&TradeRecord) -> K>(
    ledger: &TradeLedger,
    key: F,
) -> BTreeMap<K, Vec<&TradeRecord>> {
    let mut groups: BTreeMap<K, Vec<&TradeRecord>> = BTreeMap::new();
    for trade in &ledger.trades {
        groups.entry(key(trade)).or_default().push(trade);
    }
    groups
}

/// One pattern per entry hour whose loss ratio clears the gate.
pub(crate) fn hourly_patterns(
    ledger: &TradeLedger,
    global_loss_ratio: f64,
    total_losses: usize,
    gate: &PatternGate,
) -> Vec<LossPattern> {
    let mut out = Vec::new();
    for (hour, subset) in group_by(ledger, |t| t.entry_time.hour()) {
        let losses = subset.iter().filter(|t| t.is_loss()).count();
        let condition = format!("hour == {}.0", hour);
        let description = format!(
            "entries between {:02}:00 and {:02}:00 UTC lose {} of {} trades",
            hour,
            (hour + 1) % 24,
            losses,
            subset.len()
        );
        let mut metadata = HashMap::new();
        metadata.insert("hour".to_string(), hour as f64);
        if let Some(pattern) = pattern_from_subset(
            PatternKind::Hourly,
            "hour",
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

/// Five-minute slot patterns over the trading day (288 slots).
pub(crate) fn five_minute_patterns(
    ledger: &TradeLedger,
    global_loss_ratio: f64,
    total_losses: usize,
    gate: &PatternGate,
) -> Vec<LossPattern> {
    let mut out = Vec::new();
    for (slot, subset) in group_by(ledger, |t| t.entry_time.hour() * 12 + t.entry_time.minute() / 5)
    {
        let condition = format!("minute_slot == {}.0", slot);
        let description = format!(
            "the {:02}:{:02} five-minute slot concentrates losses",
            slot / 12,
            (slot % 12) * 5
        );
        let mut metadata = HashMap::new();
        metadata.insert("slot".to_string(), slot as f64);
        if let Some(pattern) = pattern_from_subset(
            PatternKind::FiveMinute,
            "minute_slot",
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

/// Weekday patterns. These rely on calendar state the guard language cannot
/// reach, so the generator drops them; they still surface in reports.
pub(crate) fn weekday_patterns(
    ledger: &TradeLedger,
    global_loss_ratio: f64,
    total_losses: usize,
    gate: &PatternGate,
) -> Vec<LossPattern> {
    let mut out = Vec::new();
    for (day, subset) in group_by(ledger, |t| t.entry_time.weekday().num_days_from_monday()) {
        let condition = format!("weekday == {}.0", day);
        let description = format!("{} entries lose disproportionately", DAY_NAMES[day as usize]);
        let mut metadata = HashMap::new();
        metadata.insert("weekday".to_string(), day as f64);
        if let Some(pattern) = pattern_from_subset(
            PatternKind::Weekday,
            "weekday",
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

/// Fixed market-session window patterns.
pub(crate) fn session_patterns(
    ledger: &TradeLedger,
    global_loss_ratio: f64,
    total_losses: usize,
    gate: &PatternGate,
) -> Vec<LossPattern> {
    let mut out = Vec::new();
    for window in SESSIONS {
        let subset: Vec<&TradeRecord> = ledger
            .trades
            .iter()
            .filter(|t| window.contains(t.entry_time.hour()))
            .collect();
        if subset.is_empty() {
            continue;
        }
        let condition = format!(
            "hour >= {}.0 and hour < {}.0",
            window.start_hour, window.end_hour
        );
        let description = format!(
            "the {} session ({:02}:00-{:02}:00 UTC) concentrates losses",
            window.name, window.start_hour, window.end_hour
        );
        let mut metadata = HashMap::new();
        metadata.insert("session_start".to_string(), window.start_hour as f64);
        metadata.insert("session_end".to_string(), window.end_hour as f64);
        if let Some(pattern) = pattern_from_subset(
            PatternKind::Session,
            "hour",
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
