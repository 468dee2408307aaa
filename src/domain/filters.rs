use serde::{Deserialize, Serialize};

use crate::domain::patterns::PatternKind;

/// Selection tier derived from impact and statistical significance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterPriority {
    Critical,
    High,
    Medium,
    Low,
    Experimental,
}

impl FilterPriority {
    /// Lower rank selects first.
    pub fn rank(&self) -> u8 {
        match self {
            FilterPriority::Critical => 0,
            FilterPriority::High => 1,
            FilterPriority::Medium => 2,
            FilterPriority::Low => 3,
            FilterPriority::Experimental => 4,
        }
    }
}

/// Which side of a threshold the lossy region sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CutDirection {
    Below,
    Above,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FilterMetadata {
    pub feature: String,
    pub threshold: Option<f64>,
    pub direction: Option<CutDirection>,
    pub confidence: f64,
    pub p_value: Option<f64>,
    pub coverage: f64,
    /// Names of candidates this one is estimated to combine well with.
    #[serde(default)]
    pub synergy_with: Vec<String>,
}

/// A synthesizable guard clause intended to exclude a loss pattern's trades.
///
/// `condition` is the entry condition that must hold for a trade to be
/// allowed; the synthesizer blocks entry when its negation holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterCandidate {
    pub name: String,
    pub condition: String,
    pub description: String,
    pub origin: PatternKind,
    /// Estimated share of currently-lost value this guard could save, 0..1.
    pub expected_impact: f64,
    /// Composite ranking score assigned by the generator.
    pub score: f64,
    pub priority: Option<FilterPriority>,
    pub metadata: FilterMetadata,
}

impl FilterCandidate {
    /// Case- and whitespace-insensitive key used for exact deduplication.
    pub fn normalized_condition(&self) -> String {
        self.condition
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_condition_collapses_whitespace_and_case() {
        let candidate = FilterCandidate {
            name: "t".to_string(),
            condition: "NOT  (hour   == 9.0)".to_string(),
            description: String::new(),
            origin: PatternKind::Hourly,
            expected_impact: 0.5,
            score: 0.0,
            priority: None,
            metadata: FilterMetadata::default(),
        };
        assert_eq!(candidate.normalized_condition(), "not (hour == 9.0)");
    }

    #[test]
    fn test_priority_rank_ordering() {
        assert!(FilterPriority::Critical.rank() < FilterPriority::High.rank());
        assert!(FilterPriority::Low.rank() < FilterPriority::Experimental.rank());
    }
}
