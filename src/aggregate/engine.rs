//! Per-product aggregation.

use super::weights::{normalized_weights, weighted_score, StarCount};
use crate::config::AnalyticsConfig;
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::{
    aspect_key, Analytics, AspectMapping, AspectSentiment, KpiSource, Kpis, Product, Review,
    ReviewId, ReviewTag, Sentiment, TrendPoint, WeightedAspectScore,
};
use chrono::Datelike;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};

/// Computes [`Analytics`] for one product from the contents of a store.
///
/// The engine is stateless; the same store contents always produce the same
/// output.
#[derive(Clone, Debug)]
pub struct AggregationEngine {
    top_n: usize,
    min_mentions: u64,
    distribution_tolerance: f64,
}

/// Tag counts of one aspect across the family.
#[derive(Default)]
struct AspectTally {
    category: Option<String>,
    positive: u64,
    negative: u64,
    by_star: [StarCount; 5],
}

impl AspectTally {
    fn mentions(&self) -> u64 {
        self.positive + self.negative
    }
}

impl AggregationEngine {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            top_n: config.top_n,
            min_mentions: config.min_mentions,
            distribution_tolerance: config.distribution_tolerance,
        }
    }

    /// Aggregate the family of `asin`.
    ///
    /// Reviews, tags and the catalog distribution are all taken at family
    /// level, so every member of a family reports the same figures.
    pub fn aggregate(&self, store: &Store, asin: &str) -> Result<Analytics> {
        let anchor = store
            .family_anchor(asin)
            .map_err(|e| StoreError::aggregation(asin, e.to_string()))?;

        let reviews = store.family_reviews(&anchor.asin);
        let mut stars: BTreeMap<ReviewId, u8> = BTreeMap::new();
        for review in &reviews {
            let star = review.star().ok_or_else(|| {
                StoreError::aggregation(
                    asin,
                    format!(
                        "review {} has rating {} outside 1..=5",
                        review.id, review.rating_score
                    ),
                )
            })?;
            stars.insert(review.id, star);
        }

        let review_ids: BTreeSet<ReviewId> = stars.keys().copied().collect();
        let tags = store.tags_for_reviews(&review_ids);
        let tallies = self.tally(asin, &tags, &stars, &store.aspect_mappings())?;

        let variation_count = store.family_members(&anchor.asin).len() as u64;

        Ok(Analytics {
            asin: asin.to_string(),
            family: anchor.asin.clone(),
            kpis: self.kpis(&anchor, &reviews, &stars, variation_count),
            raw_sentiment: self.raw_sentiment(&tallies),
            weighted_sentiment: self.weighted_sentiment(&anchor, &tallies),
            trend: trend(&reviews),
        })
    }

    fn tally(
        &self,
        asin: &str,
        tags: &[ReviewTag],
        stars: &BTreeMap<ReviewId, u8>,
        mappings: &BTreeMap<String, AspectMapping>,
    ) -> Result<BTreeMap<String, AspectTally>> {
        let mut tallies: BTreeMap<String, AspectTally> = BTreeMap::new();

        for tag in tags {
            let raw = tag.aspect.trim();
            if raw.is_empty() {
                return Err(StoreError::aggregation(
                    asin,
                    format!("tag {:?} has an empty aspect", tag.id),
                ));
            }
            let star = *stars.get(&tag.review_id).ok_or_else(|| {
                StoreError::aggregation(
                    asin,
                    format!("tag {:?} references unknown review {}", tag.id, tag.review_id),
                )
            })?;

            // Unmapped labels aggregate under their raw spelling.
            let (aspect, category) = match mappings.get(&aspect_key(raw)) {
                Some(mapping) => (mapping.canonical.clone(), mapping.category.clone()),
                None => (raw.to_string(), None),
            };

            let tally = tallies.entry(aspect).or_default();
            if tally.category.is_none() {
                tally.category = category;
            }

            let bucket = &mut tally.by_star[usize::from(star - 1)];
            bucket.total += 1;
            match tag.sentiment {
                Sentiment::Positive => {
                    tally.positive += 1;
                    bucket.positive += 1;
                }
                Sentiment::Negative => tally.negative += 1,
                Sentiment::Neutral => {}
            }
        }

        Ok(tallies)
    }

    fn kpis(
        &self,
        anchor: &Product,
        reviews: &[Review],
        stars: &BTreeMap<ReviewId, u8>,
        variation_count: u64,
    ) -> Kpis {
        let sample_average = (!reviews.is_empty())
            .then(|| reviews.iter().map(|r| r.rating_score).sum::<f64>() / reviews.len() as f64);

        let usable = anchor
            .distribution
            .as_ref()
            .filter(|d| d.is_usable(self.distribution_tolerance));

        let negative_rate_pct = match usable {
            Some(dist) => {
                let negative = dist.pct(1).unwrap_or(0.0) + dist.pct(2).unwrap_or(0.0);
                Some(round2(negative / dist.total() * 100.0))
            }
            None if !stars.is_empty() => {
                let negative = stars.values().filter(|&&s| s <= 2).count();
                Some(round2(negative as f64 / stars.len() as f64 * 100.0))
            }
            None => None,
        };

        let source = if anchor.rating_count.is_some() {
            KpiSource::Catalog
        } else {
            KpiSource::Reviews
        };

        Kpis {
            total_reviews: anchor.rating_count.unwrap_or(reviews.len() as u64),
            average_rating: anchor.average_rating.or(sample_average).map(round2),
            variation_count,
            negative_rate_pct,
            source,
        }
    }

    fn raw_sentiment(&self, tallies: &BTreeMap<String, AspectTally>) -> Vec<AspectSentiment> {
        let mut rows: Vec<AspectSentiment> = tallies
            .iter()
            .filter(|(_, t)| t.mentions() >= self.min_mentions)
            .map(|(aspect, t)| AspectSentiment {
                aspect: aspect.clone(),
                category: t.category.clone(),
                positive: t.positive,
                negative: t.negative,
                mentions: t.mentions(),
            })
            .collect();

        rows.sort_by(|a, b| b.mentions.cmp(&a.mentions).then_with(|| a.aspect.cmp(&b.aspect)));
        rows.truncate(self.top_n);
        rows
    }

    fn weighted_sentiment(
        &self,
        anchor: &Product,
        tallies: &BTreeMap<String, AspectTally>,
    ) -> Vec<WeightedAspectScore> {
        let weights = match anchor
            .distribution
            .as_ref()
            .and_then(|d| normalized_weights(d, self.distribution_tolerance))
        {
            Some(weights) => weights,
            None => return Vec::new(),
        };

        let mut rows: Vec<WeightedAspectScore> = tallies
            .iter()
            .filter(|(_, t)| t.mentions() >= self.min_mentions)
            .filter_map(|(aspect, t)| {
                weighted_score(&weights, &t.by_star).map(|score| WeightedAspectScore {
                    aspect: aspect.clone(),
                    category: t.category.clone(),
                    score_pct: round2(score * 100.0),
                    mentions: t.mentions(),
                })
            })
            .collect();

        rows.sort_by(|a, b| {
            a.score_pct
                .partial_cmp(&b.score_pct)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.aspect.cmp(&b.aspect))
        });
        rows.truncate(self.top_n);
        rows
    }
}

/// Average rating per UTC calendar month, oldest first.
fn trend(reviews: &[Review]) -> Vec<TrendPoint> {
    let mut months: BTreeMap<(i32, u32), (f64, u64)> = BTreeMap::new();

    for review in reviews {
        if let Some(dt) = review.reviewed_at.and_then(|ts| ts.to_datetime()) {
            let entry = months.entry((dt.year(), dt.month())).or_insert((0.0, 0));
            entry.0 += review.rating_score;
            entry.1 += 1;
        }
    }

    months
        .into_iter()
        .map(|((year, month), (sum, count))| TrendPoint {
            month: format!("{:04}-{:02}", year, month),
            average_rating: round2(sum / count as f64),
            reviews: count,
        })
        .collect()
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
