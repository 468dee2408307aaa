//! Pattern-to-candidate templates.
//!
//! Each loss pattern maps to at most one guard-clause candidate. Patterns
//! that would need runtime state the rule language cannot reach (weekday
//! calendars) are dropped here rather than guessed at.

use tracing::debug;

use crate::application::analyzer::{DIRECTION_ABOVE, DIRECTION_BELOW};
use crate::domain::filters::{CutDirection, FilterCandidate, FilterMetadata};
use crate::domain::patterns::{LossPattern, PatternKind};
use crate::domain::ports::ExternalSuggestion;

/// Blend of confidence and loss coverage, saturating once a fifth of all
/// losses is covered. Always lands in [0, 1].
pub fn expected_impact(confidence: f64, coverage: f64) -> f64 {
    (0.6 * confidence + 0.4 * (coverage / 0.2).min(1.0)).clamp(0.0, 1.0)
}

fn slug(v: f64) -> String {
    let text = if v.fract() == 0.0 && v.abs() < 1e12 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    };
    text.replace('.', "p").replace('-', "m")
}

fn base_metadata(pattern: &LossPattern) -> FilterMetadata {
    FilterMetadata {
        feature: pattern.feature.clone(),
        threshold: pattern.metadata.get("threshold").copied(),
        direction: None,
        confidence: pattern.confidence,
        p_value: pattern.p_value,
        coverage: pattern.coverage,
        synergy_with: Vec::new(),
    }
}

/// One candidate per pattern, or `None` for kinds that cannot be expressed
/// as a static guard.
pub(crate) fn candidate_from_pattern(pattern: &LossPattern) -> Option<FilterCandidate> {
    let mut metadata = base_metadata(pattern);

    let (name, condition) = match pattern.kind {
        PatternKind::Hourly => {
            let hour = pattern.metadata.get("hour").copied()?;
            (
                format!("avoid_hour_{}", slug(hour)),
                format!("not ({})", pattern.condition),
            )
        }
        PatternKind::FiveMinute => {
            let minute_slot = pattern.metadata.get("slot").copied()?;
            (
                format!("avoid_slot_{}", slug(minute_slot)),
                format!("not ({})", pattern.condition),
            )
        }
        PatternKind::Weekday => {
            debug!(condition = %pattern.condition, "weekday pattern has no static guard form");
            return None;
        }
        PatternKind::Session => {
            let start = pattern.metadata.get("session_start").copied()?;
            let end = pattern.metadata.get("session_end").copied()?;
            (
                format!("avoid_hours_{}_to_{}", slug(start), slug(end)),
                format!("not ({})", pattern.condition),
            )
        }
        PatternKind::Threshold => {
            let threshold = pattern.metadata.get("threshold").copied()?;
            let direction = pattern.metadata.get("direction").copied()?;
            if direction == DIRECTION_BELOW {
                metadata.direction = Some(CutDirection::Below);
                (
                    format!("require_{}_above_{}", pattern.feature, slug(threshold)),
                    format!("{} > {}", pattern.feature, super::fmt_num(threshold)),
                )
            } else if direction == DIRECTION_ABOVE {
                metadata.direction = Some(CutDirection::Above);
                (
                    format!("require_{}_below_{}", pattern.feature, slug(threshold)),
                    format!("{} < {}", pattern.feature, super::fmt_num(threshold)),
                )
            } else {
                return None;
            }
        }
        PatternKind::Range => {
            let low = pattern.metadata.get("tier_low").copied()?;
            let name = match pattern.metadata.get("tier_high") {
                Some(high) => format!("avoid_size_{}_to_{}", slug(low), slug(*high)),
                None => format!("avoid_size_over_{}", slug(low)),
            };
            (name, format!("not ({})", pattern.condition))
        }
        PatternKind::Compound => (
            format!("avoid_joint_{}", pattern.feature.replace('+', "_")),
            format!("not ({})", pattern.condition),
        ),
        // External suggestions arrive through their own constructor.
        PatternKind::External => return None,
    };

    Some(FilterCandidate {
        name,
        condition,
        description: pattern.description.clone(),
        origin: pattern.kind,
        expected_impact: expected_impact(pattern.confidence, pattern.coverage),
        score: 0.0,
        priority: None,
        metadata,
    })
}

/// Normalizes an external suggestion into candidate shape. Insignificant
/// suggestions are dropped.
pub(crate) fn candidate_from_suggestion(suggestion: &ExternalSuggestion) -> Option<FilterCandidate> {
    if !suggestion.significant || suggestion.condition.trim().is_empty() {
        return None;
    }
    let confidence = (1.0 - suggestion.p_value).clamp(0.0, 1.0);
    Some(FilterCandidate {
        name: format!("ext_{}", suggestion.name),
        condition: suggestion.condition.clone(),
        description: format!(
            "{} suggestion, projected improvement {:.2}",
            suggestion.category, suggestion.improvement
        ),
        origin: PatternKind::External,
        expected_impact: expected_impact(confidence, suggestion.exclusion_ratio),
        score: 0.0,
        priority: None,
        metadata: FilterMetadata {
            feature: suggestion.category.clone(),
            threshold: None,
            direction: None,
            confidence,
            p_value: Some(suggestion.p_value),
            coverage: suggestion.exclusion_ratio,
            synergy_with: Vec::new(),
        },
    })
}
