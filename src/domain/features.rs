//! Allow-listed feature vocabulary shared by the analyzer, the filter
//! generator and the condition synthesizer.
//!
//! The catalog is an explicit immutable object passed into each component
//! rather than a process-wide table. Base features arrive in the trade
//! snapshot; derived features are recomputed by a generated preamble line and
//! fall back to a neutral default when their inputs are missing at runtime.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    /// Present in the entry snapshot of every trade.
    Base,
    /// Recomputed from base features by a preamble assignment.
    Derived,
}

/// Coarse grouping used when pairing features for compound patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureFamily {
    Time,
    Price,
    Volume,
    Strength,
    Size,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureSpec {
    pub name: String,
    pub kind: FeatureKind,
    pub family: FeatureFamily,
    /// Value substituted when the runtime snapshot lacks this feature.
    pub neutral_default: f64,
    /// Assignment line deriving this feature inside a guard preamble.
    pub preamble: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureCatalog {
    specs: Vec<FeatureSpec>,
}

impl FeatureCatalog {
    pub fn new(specs: Vec<FeatureSpec>) -> Self {
        Self { specs }
    }

    /// The stock vocabulary used by the refinement loop.
    pub fn standard() -> Self {
        fn base(name: &str, family: FeatureFamily, neutral: f64) -> FeatureSpec {
            FeatureSpec {
                name: name.to_string(),
                kind: FeatureKind::Base,
                family,
                neutral_default: neutral,
                preamble: None,
            }
        }

        Self::new(vec![
            // Entry timestamp in epoch seconds; anchor for derived time features.
            base("timestamp", FeatureFamily::Time, 43_200.0),
            base("entry_price", FeatureFamily::Price, 100.0),
            base("spread", FeatureFamily::Price, 0.05),
            base("atr", FeatureFamily::Price, 1.0),
            base("volume", FeatureFamily::Volume, 1_000.0),
            base("rsi", FeatureFamily::Strength, 50.0),
            base("trend_strength", FeatureFamily::Strength, 0.0),
            base("position_size", FeatureFamily::Size, 1.0),
            FeatureSpec {
                name: "hour".to_string(),
                kind: FeatureKind::Derived,
                family: FeatureFamily::Time,
                neutral_default: 12.0,
                preamble: Some("hour = floor((timestamp % 86400.0) / 3600.0)".to_string()),
            },
            FeatureSpec {
                name: "minute_slot".to_string(),
                kind: FeatureKind::Derived,
                family: FeatureFamily::Time,
                neutral_default: 144.0,
                preamble: Some(
                    "minute_slot = floor((timestamp % 86400.0) / 300.0)".to_string(),
                ),
            },
        ])
    }

    pub fn get(&self, name: &str) -> Option<&FeatureSpec> {
        self.specs.iter().find(|s| s.name == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    pub fn neutral_default(&self, name: &str) -> Option<f64> {
        self.get(name).map(|s| s.neutral_default)
    }

    pub fn preamble_for(&self, name: &str) -> Option<&str> {
        self.get(name).and_then(|s| s.preamble.as_deref())
    }

    pub fn family_of(&self, name: &str) -> Option<FeatureFamily> {
        self.get(name).map(|s| s.family)
    }

    /// Base features eligible for threshold and importance mining.
    /// Time anchors are excluded; time structure is mined via buckets instead.
    pub fn analyzable(&self) -> impl Iterator<Item = &FeatureSpec> {
        self.specs
            .iter()
            .filter(|s| s.kind == FeatureKind::Base && s.family != FeatureFamily::Time)
    }

    /// Every identifier a rule condition may legally reference.
    pub fn allowed_identifiers(&self) -> BTreeSet<String> {
        self.specs.iter().map(|s| s.name.clone()).collect()
    }
}

/// One fixed UTC market-session window, end hour exclusive.
#[derive(Debug, Clone, Copy)]
pub struct SessionWindow {
    pub name: &'static str,
    pub start_hour: u32,
    pub end_hour: u32,
}

impl SessionWindow {
    pub fn contains(&self, hour: u32) -> bool {
        hour >= self.start_hour && hour < self.end_hour
    }
}

/// The five fixed session windows mined by the advanced time pass.
pub const SESSIONS: [SessionWindow; 5] = [
    SessionWindow { name: "tokyo", start_hour: 0, end_hour: 6 },
    SessionWindow { name: "london_open", start_hour: 7, end_hour: 9 },
    SessionWindow { name: "london", start_hour: 9, end_hour: 13 },
    SessionWindow { name: "newyork_open", start_hour: 13, end_hour: 16 },
    SessionWindow { name: "newyork", start_hour: 16, end_hour: 21 },
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_catalog_lookups() {
        let catalog = FeatureCatalog::standard();
        assert!(catalog.contains("rsi"));
        assert!(catalog.contains("hour"));
        assert!(!catalog.contains("leverage"));
        assert_eq!(catalog.neutral_default("rsi"), Some(50.0));
        assert!(catalog.preamble_for("hour").unwrap().contains("timestamp"));
        assert!(catalog.preamble_for("rsi").is_none());
    }

    #[test]
    fn test_analyzable_excludes_time_anchor() {
        let catalog = FeatureCatalog::standard();
        let names: Vec<&str> = catalog.analyzable().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"rsi"));
        assert!(names.contains(&"position_size"));
        assert!(!names.contains(&"timestamp"));
        assert!(!names.contains(&"hour"));
    }

    #[test]
    fn test_session_window_bounds() {
        let london = SESSIONS.iter().find(|s| s.name == "london").unwrap();
        assert!(london.contains(9));
        assert!(london.contains(12));
        assert!(!london.contains(13));
    }
}
