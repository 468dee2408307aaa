//! Confidence scoring for mined loss patterns.
//!
//! A pattern's confidence blends four normalized terms: effect size of the
//! loss-ratio lift, sample adequacy, loss coverage, and a chi-square
//! significance proxy.

use statrs::distribution::{ChiSquared, ContinuousCDF};

const EFFECT_WEIGHT: f64 = 0.30;
const ADEQUACY_WEIGHT: f64 = 0.25;
const COVERAGE_WEIGHT: f64 = 0.20;
const SIGNIFICANCE_WEIGHT: f64 = 0.25;

/// Cohen's h saturates at 0.8 ("large" effect).
const LARGE_EFFECT: f64 = 0.8;
/// Sample term saturates at this many subset trades.
const ADEQUATE_SAMPLES: f64 = 100.0;
/// Coverage term saturates once a tenth of all losses is explained.
const ADEQUATE_COVERAGE: f64 = 0.1;

/// One-degree-of-freedom chi-square p-value for the subset's loss count
/// against the expectation under the global loss ratio. `None` when the
/// expectation is degenerate (empty subset, global ratio at 0 or 1).
pub fn chi_square_p(subset_losses: usize, subset_total: usize, global_loss_ratio: f64) -> Option<f64> {
    if subset_total == 0 || global_loss_ratio <= 0.0 || global_loss_ratio >= 1.0 {
        return None;
    }
    let n = subset_total as f64;
    let expected_losses = n * global_loss_ratio;
    let expected_wins = n * (1.0 - global_loss_ratio);
    let observed_losses = subset_losses as f64;
    let observed_wins = n - observed_losses;

    let chi2 = (observed_losses - expected_losses).powi(2) / expected_losses
        + (observed_wins - expected_wins).powi(2) / expected_wins;

    let dist = ChiSquared::new(1.0).ok()?;
    Some((1.0 - dist.cdf(chi2)).clamp(0.0, 1.0))
}

/// Arcsine-transformed difference between two proportions (Cohen's h).
fn effect_size(subset_ratio: f64, global_ratio: f64) -> f64 {
    let a = 2.0 * subset_ratio.clamp(0.0, 1.0).sqrt().asin();
    let b = 2.0 * global_ratio.clamp(0.0, 1.0).sqrt().asin();
    (a - b).abs()
}

/// Blended confidence in [0, 1].
pub fn confidence(
    subset_loss_ratio: f64,
    global_loss_ratio: f64,
    subset_total: usize,
    coverage: f64,
    p_value: Option<f64>,
) -> f64 {
    let effect = (effect_size(subset_loss_ratio, global_loss_ratio) / LARGE_EFFECT).min(1.0);
    let adequacy = (subset_total as f64 / ADEQUATE_SAMPLES).min(1.0);
    let cover = (coverage / ADEQUATE_COVERAGE).min(1.0);
    // Without a usable test the significance term stays neutral.
    let significance = p_value.map_or(0.5, |p| 1.0 - p);

    let score = EFFECT_WEIGHT * effect
        + ADEQUACY_WEIGHT * adequacy
        + COVERAGE_WEIGHT * cover
        + SIGNIFICANCE_WEIGHT * significance;
    score.clamp(0.0, 1.0)
}
