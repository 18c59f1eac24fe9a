//! Core types for the analytics store.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};

/// Identifier of one of the two physical stores.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum StoreId {
    A,
    B,
}

impl StoreId {
    /// The other store.
    pub fn complement(self) -> Self {
        match self {
            StoreId::A => StoreId::B,
            StoreId::B => StoreId::A,
        }
    }

    /// Token persisted in the active pointer file.
    pub fn token(self) -> &'static str {
        match self {
            StoreId::A => "A",
            StoreId::B => "B",
        }
    }

    /// Directory name of this store under the deployment root.
    pub fn dir_name(self) -> &'static str {
        match self {
            StoreId::A => "store-a",
            StoreId::B => "store-b",
        }
    }
}

impl fmt::Display for StoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.token())
    }
}

impl FromStr for StoreId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "A" => Ok(StoreId::A),
            "B" => Ok(StoreId::B),
            other => Err(other.to_string()),
        }
    }
}

/// Store-assigned identifier of a review.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ReviewId(pub u64);

impl fmt::Debug for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReviewId({})", self.0)
    }
}

impl fmt::Display for ReviewId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Store-assigned identifier of a review tag.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TagId(pub u64);

impl fmt::Debug for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TagId({})", self.0)
    }
}

/// Content hash (SHA-256), used to verify table copies.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Compute hash from bytes.
    pub fn from_bytes(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        Hash(hasher.finalize().into())
    }

    /// Convert to hex string.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}...)", &self.to_hex()[..8])
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Timestamp(dt.timestamp_micros())
    }

    pub fn to_datetime(self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_micros(self.0)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Real-world share of ratings per star, in percent.
///
/// Sourced from the catalog rather than from sampled reviews, so it reflects
/// the full population of ratings.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RatingDistribution {
    pub percentages: BTreeMap<u8, f64>,
}

impl RatingDistribution {
    /// Build from `(star, percent)` pairs.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u8, f64)>) -> Self {
        Self {
            percentages: pairs.into_iter().collect(),
        }
    }

    /// Percentage at a star, if present.
    pub fn pct(&self, star: u8) -> Option<f64> {
        self.percentages.get(&star).copied()
    }

    /// Sum of all five buckets.
    pub fn total(&self) -> f64 {
        (1..=5).filter_map(|s| self.pct(s)).sum()
    }

    /// A distribution is usable when all five buckets are present, finite,
    /// non-negative, and sum to 100 within `tolerance`.
    pub fn is_usable(&self, tolerance: f64) -> bool {
        let complete = (1..=5).all(|s| matches!(self.pct(s), Some(p) if p.is_finite() && p >= 0.0));
        complete && (self.total() - 100.0).abs() <= tolerance
    }
}

/// A catalog item. Variants of one underlying item share a `parent_key`
/// naming the family anchor.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Product {
    pub asin: String,
    pub parent_key: String,
    pub title: Option<String>,
    /// Catalog-reported number of ratings.
    pub rating_count: Option<u64>,
    /// Catalog-reported average star rating.
    pub average_rating: Option<f64>,
    pub distribution: Option<RatingDistribution>,
    pub updated: Timestamp,
}

impl Product {
    /// Create a product that anchors its own family.
    pub fn anchor(asin: impl Into<String>) -> Self {
        let asin = asin.into();
        Self {
            parent_key: asin.clone(),
            asin,
            title: None,
            rating_count: None,
            average_rating: None,
            distribution: None,
            updated: Timestamp::now(),
        }
    }

    pub fn is_anchor(&self) -> bool {
        self.asin == self.parent_key
    }
}

/// Catalog data handed over by the ingestion collaborator.
#[derive(Clone, Debug, Default)]
pub struct ProductInput {
    pub asin: String,
    /// Family anchor; `None` makes the product its own anchor.
    pub parent_key: Option<String>,
    pub title: Option<String>,
    pub rating_count: Option<u64>,
    pub average_rating: Option<f64>,
    pub distribution: Option<RatingDistribution>,
}

impl ProductInput {
    pub fn new(asin: impl Into<String>) -> Self {
        Self {
            asin: asin.into(),
            ..Default::default()
        }
    }

    pub fn with_parent(mut self, parent_key: impl Into<String>) -> Self {
        self.parent_key = Some(parent_key.into());
        self
    }

    pub fn with_distribution(mut self, distribution: RatingDistribution) -> Self {
        self.distribution = Some(distribution);
        self
    }

    pub fn with_catalog_rating(mut self, rating_count: u64, average_rating: f64) -> Self {
        self.rating_count = Some(rating_count);
        self.average_rating = Some(average_rating);
        self
    }
}

/// Processing state of a review in the tagging pipeline.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReviewStatus {
    #[default]
    Unprocessed,
    Queued,
    Tagged,
}

/// A raw customer review.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub id: ReviewId,
    /// Variant the review was written against.
    pub asin: String,
    /// Family anchor the review is aggregated under.
    pub parent_key: String,
    pub rating_score: f64,
    pub reviewed_at: Option<Timestamp>,
    pub text: String,
    pub status: ReviewStatus,
}

impl Review {
    /// Rounded star bucket, or `None` when the score is outside 1..=5.
    pub fn star(&self) -> Option<u8> {
        if !self.rating_score.is_finite() {
            return None;
        }
        let star = self.rating_score.round();
        if (1.0..=5.0).contains(&star) {
            Some(star as u8)
        } else {
            None
        }
    }
}

/// Review data handed over by the ingestion collaborator.
#[derive(Clone, Debug)]
pub struct ReviewInput {
    pub asin: String,
    pub rating_score: f64,
    pub reviewed_at: Option<Timestamp>,
    pub text: String,
}

impl ReviewInput {
    pub fn new(asin: impl Into<String>, rating_score: f64) -> Self {
        Self {
            asin: asin.into(),
            rating_score,
            reviewed_at: None,
            text: String::new(),
        }
    }

    pub fn at(mut self, reviewed_at: Timestamp) -> Self {
        self.reviewed_at = Some(reviewed_at);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
}

/// Aspect/sentiment annotation attached to a review by the tagger.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ReviewTag {
    pub id: TagId,
    pub review_id: ReviewId,
    /// Raw aspect label as produced by the tagger.
    pub aspect: String,
    pub sentiment: Sentiment,
    pub quote: String,
    pub created_at: Timestamp,
}

/// Tag data handed over by the tagging collaborator.
#[derive(Clone, Debug)]
pub struct TagInput {
    pub aspect: String,
    pub sentiment: Sentiment,
    pub quote: String,
}

impl TagInput {
    pub fn new(aspect: impl Into<String>, sentiment: Sentiment) -> Self {
        Self {
            aspect: aspect.into(),
            sentiment,
            quote: String::new(),
        }
    }

    pub fn with_quote(mut self, quote: impl Into<String>) -> Self {
        self.quote = quote.into();
        self
    }
}

/// Normalization of a raw aspect label.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectMapping {
    pub raw_aspect: String,
    pub canonical: String,
    pub category: Option<String>,
}

/// Lookup key for a raw aspect label: trimmed and lowercased.
pub fn aspect_key(raw: &str) -> String {
    raw.trim().to_lowercase()
}

/// Where the KPI block was taken from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum KpiSource {
    Catalog,
    Reviews,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Kpis {
    pub total_reviews: u64,
    pub average_rating: Option<f64>,
    pub variation_count: u64,
    pub negative_rate_pct: Option<f64>,
    pub source: KpiSource,
}

/// Raw positive/negative counts for one aspect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AspectSentiment {
    pub aspect: String,
    pub category: Option<String>,
    pub positive: u64,
    pub negative: u64,
    pub mentions: u64,
}

/// Population-weighted positive rate for one aspect.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WeightedAspectScore {
    pub aspect: String,
    pub category: Option<String>,
    pub score_pct: f64,
    pub mentions: u64,
}

/// Average rating for one calendar month.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TrendPoint {
    /// `YYYY-MM`, UTC.
    pub month: String,
    pub average_rating: f64,
    pub reviews: u64,
}

/// Full output of the aggregation engine for one product.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Analytics {
    pub asin: String,
    pub family: String,
    pub kpis: Kpis,
    pub raw_sentiment: Vec<AspectSentiment>,
    pub weighted_sentiment: Vec<WeightedAspectScore>,
    pub trend: Vec<TrendPoint>,
}

/// Current analytics blob version.
pub const ANALYTICS_VERSION: u8 = 1;

/// Derived analytics as served to readers.
#[derive(Clone, Debug, PartialEq)]
pub struct ProductStats {
    pub asin: String,
    pub version: u8,
    pub last_updated: Timestamp,
    pub analytics: Analytics,
}

/// Row counts of a store's tables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreCounts {
    pub products: u64,
    pub reviews: u64,
    pub tags: u64,
    pub aspect_mappings: u64,
    pub stats: u64,
}
