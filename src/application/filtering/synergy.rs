//! Pairwise and triple synergy estimation between selected candidates.
//!
//! Guards on the same feature mostly overlap, so they are penalized;
//! guards across known complementary families reinforce each other.

use crate::domain::features::{FeatureCatalog, FeatureFamily};
use crate::domain::filters::FilterCandidate;

const SAME_FEATURE_PENALTY: f64 = -0.10;
const COMPLEMENTARY_BONUS: f64 = 0.15;
const CROSS_KIND_BONUS: f64 = 0.05;
/// Weight of the average pair synergy folded into the score.
const SCORE_WEIGHT: f64 = 0.1;
/// Extra for a fully synergistic top-three triple.
const TRIPLE_BONUS: f64 = 0.05;

const COMPLEMENTARY: [(FeatureFamily, FeatureFamily); 3] = [
    (FeatureFamily::Time, FeatureFamily::Price),
    (FeatureFamily::Volume, FeatureFamily::Strength),
    (FeatureFamily::Size, FeatureFamily::Volume),
];

fn primary_feature(candidate: &FilterCandidate) -> &str {
    candidate
        .metadata
        .feature
        .split('+')
        .next()
        .unwrap_or(candidate.metadata.feature.as_str())
}

fn complementary(a: FeatureFamily, b: FeatureFamily) -> bool {
    COMPLEMENTARY
        .iter()
        .any(|(x, y)| (a == *x && b == *y) || (a == *y && b == *x))
}

fn pair_synergy(a: &FilterCandidate, b: &FilterCandidate, catalog: &FeatureCatalog) -> f64 {
    let fa = primary_feature(a);
    let fb = primary_feature(b);
    if fa == fb {
        return SAME_FEATURE_PENALTY;
    }
    if let (Some(fam_a), Some(fam_b)) = (catalog.family_of(fa), catalog.family_of(fb)) {
        if complementary(fam_a, fam_b) {
            return COMPLEMENTARY_BONUS;
        }
    }
    if a.origin != b.origin {
        return CROSS_KIND_BONUS;
    }
    0.0
}

/// Annotates `synergy_with` links and folds synergy into each score.
pub(crate) fn annotate(candidates: &mut [FilterCandidate], catalog: &FeatureCatalog) {
    let n = candidates.len();
    if n < 2 {
        return;
    }

    let mut totals = vec![0.0; n];
    let mut partners: Vec<Vec<String>> = vec![Vec::new(); n];
    for i in 0..n {
        for j in (i + 1)..n {
            let s = pair_synergy(&candidates[i], &candidates[j], catalog);
            totals[i] += s;
            totals[j] += s;
            if s > 0.0 {
                partners[i].push(candidates[j].name.clone());
                partners[j].push(candidates[i].name.clone());
            }
        }
    }

    for (i, candidate) in candidates.iter_mut().enumerate() {
        candidate.metadata.synergy_with = std::mem::take(&mut partners[i]);
        candidate.score += SCORE_WEIGHT * totals[i] / (n - 1) as f64;
    }

    if n >= 3 {
        // Top three by score get a bonus when every pair reinforces.
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by(|&a, &b| {
            candidates[b]
                .score
                .partial_cmp(&candidates[a].score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        let (a, b, c) = (order[0], order[1], order[2]);
        let all_positive = pair_synergy(&candidates[a], &candidates[b], catalog) > 0.0
            && pair_synergy(&candidates[a], &candidates[c], catalog) > 0.0
            && pair_synergy(&candidates[b], &candidates[c], catalog) > 0.0;
        if all_positive {
            for idx in [a, b, c] {
                candidates[idx].score += TRIPLE_BONUS;
            }
        }
    }
}
