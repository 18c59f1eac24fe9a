//! Population weighting of sampled per-star sentiment.
//!
//! Reviews are a sample, and the sample's star mix rarely matches the
//! catalog's. Each aspect's positive rate is measured per star bucket and
//! then re-weighted by the share that bucket has in the real distribution.

use crate::types::RatingDistribution;

/// Tag counts of one aspect within one star bucket.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StarCount {
    pub positive: u64,
    /// Positive, negative and neutral tags.
    pub total: u64,
}

impl StarCount {
    pub fn positive_rate(&self) -> Option<f64> {
        (self.total > 0).then(|| self.positive as f64 / self.total as f64)
    }
}

/// Per-star weights summing to 1.0, indexed by `star - 1`.
///
/// `None` when the distribution is unusable; callers must not substitute one.
pub fn normalized_weights(distribution: &RatingDistribution, tolerance: f64) -> Option<[f64; 5]> {
    if !distribution.is_usable(tolerance) {
        return None;
    }

    let total = distribution.total();
    if total <= 0.0 {
        return None;
    }

    let mut weights = [0.0; 5];
    for (i, weight) in weights.iter_mut().enumerate() {
        *weight = distribution.pct(i as u8 + 1).unwrap_or(0.0) / total;
    }
    Some(weights)
}

/// Weighted positive rate in `[0, 1]`.
///
/// Buckets without tags carry no rate; their weight is dropped and the
/// remaining weights are renormalized. Returns `None` when every observed
/// bucket has zero weight.
pub fn weighted_score(weights: &[f64; 5], buckets: &[StarCount; 5]) -> Option<f64> {
    let mut score = 0.0;
    let mut covered = 0.0;

    for (weight, bucket) in weights.iter().zip(buckets) {
        if let Some(rate) = bucket.positive_rate() {
            score += rate * weight;
            covered += weight;
        }
    }

    (covered > 0.0).then(|| (score / covered).clamp(0.0, 1.0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bucket(positive: u64, total: u64) -> StarCount {
        StarCount { positive, total }
    }

    fn sample_distribution() -> RatingDistribution {
        RatingDistribution::from_pairs([(5, 70.0), (4, 10.0), (3, 5.0), (2, 5.0), (1, 10.0)])
    }

    #[test]
    fn test_weights_follow_distribution() {
        let weights = normalized_weights(&sample_distribution(), 2.0).unwrap();
        let expected = [0.10, 0.05, 0.05, 0.10, 0.70];
        for (w, e) in weights.iter().zip(expected) {
            assert!((w - e).abs() < 1e-9);
        }
    }

    #[test]
    fn test_material_scenario() {
        let weights = normalized_weights(&sample_distribution(), 2.0).unwrap();
        // Star 1..=5 positive rates: 0.20, 0.30, 0.50, 0.80, 0.95.
        let buckets = [
            bucket(20, 100),
            bucket(30, 100),
            bucket(50, 100),
            bucket(80, 100),
            bucket(95, 100),
        ];

        let score = weighted_score(&weights, &buckets).unwrap();
        assert!((score - 0.805).abs() < 1e-9);
    }

    #[test]
    fn test_corrupt_distribution_has_no_weights() {
        let corrupt =
            RatingDistribution::from_pairs([(5, 20.0), (4, 10.0), (3, 5.0), (2, 5.0), (1, 0.0)]);
        assert!(normalized_weights(&corrupt, 2.0).is_none());
    }

    #[test]
    fn test_missing_buckets_are_renormalized() {
        let weights = normalized_weights(&sample_distribution(), 2.0).unwrap();
        let buckets = [
            StarCount::default(),
            StarCount::default(),
            StarCount::default(),
            StarCount::default(),
            bucket(3, 4),
        ];

        let score = weighted_score(&weights, &buckets).unwrap();
        assert!((score - 0.75).abs() < 1e-9);
    }

    #[test]
    fn test_zero_weight_coverage_yields_none() {
        let dist =
            RatingDistribution::from_pairs([(5, 100.0), (4, 0.0), (3, 0.0), (2, 0.0), (1, 0.0)]);
        let weights = normalized_weights(&dist, 2.0).unwrap();
        let buckets = [
            bucket(1, 2),
            StarCount::default(),
            StarCount::default(),
            StarCount::default(),
            StarCount::default(),
        ];

        assert_eq!(weighted_score(&weights, &buckets), None);
    }

    fn usable_distribution() -> impl Strategy<Value = RatingDistribution> {
        prop::array::uniform5(0.0f64..1.0)
            .prop_filter("needs mass", |raw| raw.iter().sum::<f64>() > 1e-3)
            .prop_map(|raw| {
                let sum: f64 = raw.iter().sum();
                RatingDistribution::from_pairs(
                    raw.iter()
                        .enumerate()
                        .map(|(i, v)| (i as u8 + 1, v / sum * 100.0)),
                )
            })
    }

    fn star_counts() -> impl Strategy<Value = [StarCount; 5]> {
        prop::array::uniform5((0u64..50, 0u64..50)).prop_map(|pairs| {
            pairs.map(|(positive, rest)| StarCount {
                positive,
                total: positive + rest,
            })
        })
    }

    proptest! {
        #[test]
        fn prop_weights_sum_to_one(dist in usable_distribution()) {
            let weights = normalized_weights(&dist, 2.0).unwrap();
            let sum: f64 = weights.iter().sum();
            prop_assert!((sum - 1.0).abs() <= 1e-6);
        }

        #[test]
        fn prop_score_is_a_rate(dist in usable_distribution(), buckets in star_counts()) {
            let weights = normalized_weights(&dist, 2.0).unwrap();
            if let Some(score) = weighted_score(&weights, &buckets) {
                prop_assert!((0.0..=1.0).contains(&score));
            }
        }
    }
}
