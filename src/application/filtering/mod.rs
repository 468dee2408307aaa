//! Filter candidate generation.
//!
//! Turns mined loss patterns (and normalized external suggestions) into
//! scored, deduplicated, ranked guard-clause candidates.

mod scoring;
mod synergy;
mod templates;

use std::collections::{HashMap, HashSet};

use tracing::{debug, info};

pub(crate) use crate::application::analyzer::fmt_num;
use crate::application::analyzer::LedgerAnalysis;
use crate::application::synthesis::ConditionValidator;
use crate::config::{FilterConfig, SelectionMode};
use crate::domain::features::FeatureCatalog;
use crate::domain::filters::{CutDirection, FilterCandidate};

pub use templates::expected_impact;

pub struct FilterGenerator {
    catalog: FeatureCatalog,
    config: FilterConfig,
    validator: ConditionValidator,
}

impl FilterGenerator {
    pub fn new(catalog: FeatureCatalog, config: FilterConfig) -> Self {
        let validator = ConditionValidator::new(&catalog);
        Self {
            catalog,
            config,
            validator,
        }
    }

    /// Never fails: empty analysis yields an empty list. Every returned
    /// condition references only catalog vocabulary and numeric literals.
    pub fn generate(&self, analysis: &LedgerAnalysis, max_filters: usize) -> Vec<FilterCandidate> {
        let mut candidates: Vec<FilterCandidate> = analysis
            .patterns
            .iter()
            .filter_map(templates::candidate_from_pattern)
            .collect();
        candidates.extend(
            analysis
                .external_suggestions
                .iter()
                .filter_map(templates::candidate_from_suggestion),
        );

        candidates.retain(|c| match self.validator.validate_condition(&c.condition) {
            Ok(_) => true,
            Err(e) => {
                debug!(candidate = %c.name, error = %e, "dropping unsynthesizable candidate");
                false
            }
        });

        let total = candidates.len();
        let mut candidates = dedup(candidates);
        if self.config.prune_correlated {
            candidates = prune_correlated(candidates, self.config.similarity_bar);
        }

        scoring::apply(&mut candidates);
        if self.config.estimate_synergy {
            synergy::annotate(&mut candidates, &self.catalog);
        }

        match self.config.selection {
            SelectionMode::Score => candidates.sort_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            }),
            SelectionMode::Priority => candidates.sort_by(|a, b| {
                let ra = a.priority.map_or(u8::MAX, |p| p.rank());
                let rb = b.priority.map_or(u8::MAX, |p| p.rank());
                ra.cmp(&rb).then_with(|| {
                    b.score
                        .partial_cmp(&a.score)
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
            }),
        }
        candidates.truncate(max_filters);

        info!(
            mined = total,
            selected = candidates.len(),
            "filter candidates generated"
        );
        candidates
    }
}

/// Drops exact duplicates after whitespace/case normalization, keeping the
/// first (highest-loss pattern) occurrence.
fn dedup(candidates: Vec<FilterCandidate>) -> Vec<FilterCandidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.normalized_condition()))
        .collect()
}

fn direction_tag(direction: Option<CutDirection>) -> u8 {
    match direction {
        None => 0,
        Some(CutDirection::Below) => 1,
        Some(CutDirection::Above) => 2,
    }
}

/// Two-stage correlated-filter pruning: best impact per
/// (feature, direction, origin) bucket, then near-duplicate threshold
/// collapse on the same feature/direction across buckets.
fn prune_correlated(candidates: Vec<FilterCandidate>, similarity_bar: f64) -> Vec<FilterCandidate> {
    let mut kept: Vec<FilterCandidate> = Vec::new();
    let mut index: HashMap<(String, u8, &'static str), usize> = HashMap::new();
    for c in candidates {
        let key = (
            c.metadata.feature.clone(),
            direction_tag(c.metadata.direction),
            c.origin.label(),
        );
        match index.get(&key) {
            Some(&i) => {
                if c.expected_impact > kept[i].expected_impact {
                    kept[i] = c;
                }
            }
            None => {
                index.insert(key, kept.len());
                kept.push(c);
            }
        }
    }

    let mut out: Vec<FilterCandidate> = Vec::new();
    for mut c in kept {
        let mut merged = false;
        if let (Some(t), Some(_)) = (c.metadata.threshold, c.metadata.direction) {
            for existing in out.iter_mut() {
                if existing.metadata.feature != c.metadata.feature
                    || existing.metadata.direction != c.metadata.direction
                {
                    continue;
                }
                let Some(et) = existing.metadata.threshold else {
                    continue;
                };
                let denom = t.abs().max(et.abs()).max(1e-9);
                if (t - et).abs() / denom < similarity_bar {
                    if c.expected_impact > existing.expected_impact {
                        std::mem::swap(existing, &mut c);
                    }
                    merged = true;
                    break;
                }
            }
        }
        if !merged {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyzerConfig;
    use crate::application::analyzer::TradeLogAnalyzer;
    use crate::domain::filters::FilterMetadata;
    use crate::domain::ledger::{TradeLedger, TradeRecord};
    use crate::domain::patterns::PatternKind;
    use crate::domain::ports::ExternalSuggestion;
    use chrono::{TimeZone, Utc};
    use rust_decimal_macros::dec;

    fn generator() -> FilterGenerator {
        FilterGenerator::new(FeatureCatalog::standard(), FilterConfig::default())
    }

    fn concentrated_ledger() -> TradeLedger {
        let mut trades = Vec::new();
        for i in 0..60u32 {
            let entry = Utc
                .with_ymd_and_hms(2024, 3, 4, 9, (i % 12) * 5, 0)
                .unwrap();
            trades.push(TradeRecord {
                entry_time: entry,
                exit_time: entry + chrono::Duration::minutes(30),
                profit: dec!(-10),
                features: [("rsi".to_string(), 25.0 + (i % 10) as f64)].into(),
            });
        }
        for i in 0..40u32 {
            let entry = Utc
                .with_ymd_and_hms(2024, 3, 4, 11 + (i % 6), 0, 0)
                .unwrap();
            trades.push(TradeRecord {
                entry_time: entry,
                exit_time: entry + chrono::Duration::minutes(30),
                profit: dec!(15),
                features: [("rsi".to_string(), 55.0 + (i % 15) as f64)].into(),
            });
        }
        TradeLedger { trades }
    }

    #[test]
    fn test_generate_from_concentrated_ledger() {
        let analyzer = TradeLogAnalyzer::new(FeatureCatalog::standard(), AnalyzerConfig::default());
        let analysis = analyzer.analyze(&concentrated_ledger());
        let candidates = generator().generate(&analysis, 3);

        assert!(!candidates.is_empty());
        assert!(candidates.len() <= 3);
        let hour_guard = candidates
            .iter()
            .find(|c| c.name == "avoid_hour_9")
            .expect("hour 9 guard selected");
        assert_eq!(hour_guard.condition, "not (hour == 9.0)");
        for c in &candidates {
            assert!((0.0..=1.0).contains(&c.expected_impact), "{}", c.name);
            assert!(c.priority.is_some());
        }
    }

    #[test]
    fn test_empty_analysis_yields_empty_list() {
        let candidates = generator().generate(&LedgerAnalysis::empty(), 5);
        assert!(candidates.is_empty());
    }

    fn threshold_candidate(name: &str, threshold: f64, impact: f64, origin: PatternKind) -> FilterCandidate {
        FilterCandidate {
            name: name.to_string(),
            condition: format!("rsi > {:.1}", threshold),
            description: String::new(),
            origin,
            expected_impact: impact,
            score: 0.0,
            priority: None,
            metadata: FilterMetadata {
                feature: "rsi".to_string(),
                threshold: Some(threshold),
                direction: Some(CutDirection::Below),
                confidence: 0.6,
                p_value: Some(0.03),
                coverage: 0.3,
                synergy_with: Vec::new(),
            },
        }
    }

    #[test]
    fn test_dedup_identical_conditions() {
        let a = threshold_candidate("a", 26.0, 0.6, PatternKind::Threshold);
        let mut b = threshold_candidate("b", 26.0, 0.4, PatternKind::Threshold);
        b.condition = "RSI  >  26.0".to_string();
        let out = dedup(vec![a, b]);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "a");
    }

    #[test]
    fn test_prune_same_bucket_keeps_best_impact() {
        let weak = threshold_candidate("weak", 24.0, 0.3, PatternKind::Threshold);
        let strong = threshold_candidate("strong", 40.0, 0.7, PatternKind::Threshold);
        let out = prune_correlated(vec![weak, strong], 0.15);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "strong");
    }

    #[test]
    fn test_prune_collapses_near_thresholds_across_origins() {
        // Same feature and direction from two origins: survives stage one,
        // collapses in stage two because 28.0 vs 28.5 sits under the bar.
        let mined = threshold_candidate("mined", 28.0, 0.5, PatternKind::Threshold);
        let external = threshold_candidate("external", 28.5, 0.8, PatternKind::External);
        let out = prune_correlated(vec![mined, external], 0.15);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].name, "external");

        // Far-apart thresholds both survive.
        let low = threshold_candidate("low", 20.0, 0.5, PatternKind::Threshold);
        let high = threshold_candidate("high", 45.0, 0.8, PatternKind::External);
        let out = prune_correlated(vec![low, high], 0.15);
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_external_suggestions_flow_through() {
        let mut analysis = LedgerAnalysis::empty();
        analysis.external_suggestions = vec![
            ExternalSuggestion {
                name: "tight_spread".to_string(),
                condition: "spread <= 0.1".to_string(),
                category: "spread".to_string(),
                improvement: 50.0,
                exclusion_ratio: 0.1,
                p_value: 0.02,
                significant: true,
            },
            ExternalSuggestion {
                name: "weak".to_string(),
                condition: "volume >= 100.0".to_string(),
                category: "volume".to_string(),
                improvement: 5.0,
                exclusion_ratio: 0.01,
                p_value: 0.4,
                significant: false,
            },
        ];
        let candidates = generator().generate(&analysis, 5);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].name, "ext_tight_spread");
    }

    #[test]
    fn test_off_vocabulary_suggestion_dropped() {
        let mut analysis = LedgerAnalysis::empty();
        analysis.external_suggestions = vec![ExternalSuggestion {
            name: "bad".to_string(),
            condition: "leverage < 2.0".to_string(),
            category: "risk".to_string(),
            improvement: 10.0,
            exclusion_ratio: 0.05,
            p_value: 0.01,
            significant: true,
        }];
        let candidates = generator().generate(&analysis, 5);
        assert!(candidates.is_empty());
    }

    #[test]
    fn test_priority_selection_orders_by_tier() {
        let mut config = FilterConfig::default();
        config.selection = SelectionMode::Priority;
        config.prune_correlated = false;
        config.estimate_synergy = false;
        let generator = FilterGenerator::new(FeatureCatalog::standard(), config);

        let mut analysis = LedgerAnalysis::empty();
        analysis.external_suggestions = vec![
            ExternalSuggestion {
                name: "weak_but_broad".to_string(),
                condition: "volume >= 500.0".to_string(),
                category: "volume".to_string(),
                improvement: 10.0,
                exclusion_ratio: 0.9,
                p_value: 0.3,
                significant: true,
            },
            ExternalSuggestion {
                name: "sharp".to_string(),
                condition: "spread <= 0.1".to_string(),
                category: "spread".to_string(),
                improvement: 100.0,
                exclusion_ratio: 0.3,
                p_value: 0.001,
                significant: true,
            },
        ];
        let candidates = generator.generate(&analysis, 2);
        assert_eq!(candidates.len(), 2);
        // "sharp" carries impact >= 0.7 with p < 0.01: critical tier first.
        assert_eq!(candidates[0].name, "ext_sharp");
    }
}
