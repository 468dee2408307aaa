//! Composite candidate scoring and priority tiers.

use crate::domain::filters::{FilterCandidate, FilterPriority};

const IMPACT_WEIGHT: f64 = 0.4;
const CONFIDENCE_WEIGHT: f64 = 0.3;
const STABILITY_WEIGHT: f64 = 0.2;
const COVERAGE_WEIGHT: f64 = 0.1;

/// Significance flows into the score as a stability proxy; an untested
/// candidate sits in the middle.
fn stability_from_p(p_value: Option<f64>) -> f64 {
    p_value.map_or(0.5, |p| (1.0 - p).clamp(0.0, 1.0))
}

pub(crate) fn composite_score(candidate: &FilterCandidate) -> f64 {
    IMPACT_WEIGHT * candidate.expected_impact
        + CONFIDENCE_WEIGHT * candidate.metadata.confidence
        + STABILITY_WEIGHT * stability_from_p(candidate.metadata.p_value)
        + COVERAGE_WEIGHT * candidate.metadata.coverage.clamp(0.0, 1.0)
}

/// Impact and significance thresholds for the selection tiers.
pub(crate) fn priority_for(impact: f64, p_value: Option<f64>) -> FilterPriority {
    let p = p_value.unwrap_or(1.0);
    if impact >= 0.7 && p < 0.01 {
        FilterPriority::Critical
    } else if impact >= 0.5 && p < 0.05 {
        FilterPriority::High
    } else if impact >= 0.3 {
        FilterPriority::Medium
    } else if impact >= 0.15 {
        FilterPriority::Low
    } else {
        FilterPriority::Experimental
    }
}

/// Scores and tiers every candidate in place.
pub(crate) fn apply(candidates: &mut [FilterCandidate]) {
    for candidate in candidates.iter_mut() {
        candidate.score = composite_score(candidate);
        candidate.priority = Some(priority_for(
            candidate.expected_impact,
            candidate.metadata.p_value,
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::filters::FilterMetadata;
    use crate::domain::patterns::PatternKind;

    fn candidate(impact: f64, confidence: f64, p: Option<f64>, coverage: f64) -> FilterCandidate {
        FilterCandidate {
            name: "c".to_string(),
            condition: "rsi > 30.0".to_string(),
            description: String::new(),
            origin: PatternKind::Threshold,
            expected_impact: impact,
            score: 0.0,
            priority: None,
            metadata: FilterMetadata {
                feature: "rsi".to_string(),
                threshold: Some(30.0),
                direction: None,
                confidence,
                p_value: p,
                coverage,
                synergy_with: Vec::new(),
            },
        }
    }

    #[test]
    fn test_composite_score_weights() {
        let c = candidate(1.0, 1.0, Some(0.0), 1.0);
        assert!((composite_score(&c) - 1.0).abs() < 1e-12);

        let c = candidate(0.5, 0.8, Some(0.1), 0.25);
        let expected = 0.4 * 0.5 + 0.3 * 0.8 + 0.2 * 0.9 + 0.1 * 0.25;
        assert!((composite_score(&c) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_missing_p_value_is_neutral() {
        let with = candidate(0.5, 0.5, Some(0.5), 0.5);
        let without = candidate(0.5, 0.5, None, 0.5);
        assert!((composite_score(&with) - composite_score(&without)).abs() < 1e-12);
    }

    #[test]
    fn test_priority_tiers() {
        assert_eq!(priority_for(0.8, Some(0.001)), FilterPriority::Critical);
        assert_eq!(priority_for(0.8, Some(0.02)), FilterPriority::High);
        assert_eq!(priority_for(0.55, Some(0.2)), FilterPriority::Medium);
        assert_eq!(priority_for(0.35, None), FilterPriority::Medium);
        assert_eq!(priority_for(0.2, Some(0.001)), FilterPriority::Low);
        assert_eq!(priority_for(0.05, Some(0.001)), FilterPriority::Experimental);
    }

    #[test]
    fn test_apply_sets_score_and_priority() {
        let mut candidates = vec![candidate(0.75, 0.9, Some(0.005), 0.4)];
        apply(&mut candidates);
        assert!(candidates[0].score > 0.0);
        assert_eq!(candidates[0].priority, Some(FilterPriority::Critical));
    }
}
