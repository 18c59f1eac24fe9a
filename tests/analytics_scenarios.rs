//! End-to-end analytics through ingestion, a cycle and the read interface.

use review_analytics::{
    AnalyticsConfig, AspectMapping, Ingestor, KpiSource, ProductInput, RatingDistribution,
    ReviewInput, Sentiment, StoreSet, SwapCoordinator, TagInput,
};
use std::sync::Arc;
use tempfile::TempDir;

struct Harness {
    stores: Arc<StoreSet>,
    ingestor: Ingestor,
    coordinator: SwapCoordinator,
}

impl Harness {
    fn new(dir: &TempDir) -> Self {
        let config = AnalyticsConfig::with_root(dir.path().join("analytics"));
        let stores = Arc::new(StoreSet::open(&config).unwrap());
        Self {
            ingestor: Ingestor::new(Arc::clone(&stores)),
            coordinator: SwapCoordinator::new(Arc::clone(&stores), &config),
            stores,
        }
    }

    /// Adds `total` reviews at `star`, each tagged with `aspect`, the first
    /// `positive` of them positively.
    fn tagged_reviews(&self, asin: &str, star: f64, aspect: &str, positive: usize, total: usize) {
        for i in 0..total {
            let review = self.ingestor.ingest_review(ReviewInput::new(asin, star)).unwrap();
            let sentiment = if i < positive { Sentiment::Positive } else { Sentiment::Negative };
            self.ingestor
                .ingest_tags(review.id, vec![TagInput::new(aspect, sentiment)])
                .unwrap();
        }
    }
}

fn skewed_distribution() -> RatingDistribution {
    RatingDistribution::from_pairs([(5, 70.0), (4, 10.0), (3, 5.0), (2, 5.0), (1, 10.0)])
}

#[test]
fn test_weighted_sentiment_reflects_real_distribution() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(&dir);
    h.ingestor
        .ingest_product(ProductInput::new("X").with_distribution(skewed_distribution()))
        .unwrap();

    // Sample is balanced across stars; the catalog is not.
    h.tagged_reviews("X", 5.0, "Material", 19, 20);
    h.tagged_reviews("X", 4.0, "Material", 8, 10);
    h.tagged_reviews("X", 3.0, "Material", 5, 10);
    h.tagged_reviews("X", 2.0, "Material", 3, 10);
    h.tagged_reviews("X", 1.0, "Material", 2, 10);

    h.coordinator.run_cycle().unwrap();
    let stats = h.stores.get_analytics("X").unwrap().unwrap();
    let analytics = &stats.analytics;

    let raw = &analytics.raw_sentiment[0];
    assert_eq!((raw.positive, raw.negative, raw.mentions), (37, 23, 60));

    let weighted = &analytics.weighted_sentiment[0];
    assert_eq!(weighted.aspect, "Material");
    assert!((weighted.score_pct - 80.5).abs() < 1e-9);

    // 15% of the catalog is one or two stars.
    assert_eq!(analytics.kpis.negative_rate_pct, Some(15.0));
}

#[test]
fn test_unusable_distribution_omits_weighted_scores() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(&dir);
    let sums_to_forty =
        RatingDistribution::from_pairs([(5, 20.0), (4, 10.0), (3, 5.0), (2, 5.0), (1, 0.0)]);
    h.ingestor
        .ingest_product(ProductInput::new("X").with_distribution(sums_to_forty))
        .unwrap();
    h.tagged_reviews("X", 5.0, "Fit", 3, 4);
    h.tagged_reviews("X", 1.0, "Fit", 0, 1);

    let report = h.coordinator.run_cycle().unwrap();
    assert!(report.failures.is_empty());

    let stats = h.stores.get_analytics("X").unwrap().unwrap();
    assert!(stats.analytics.weighted_sentiment.is_empty());
    assert_eq!(stats.analytics.raw_sentiment[0].mentions, 5);
    assert_eq!(stats.analytics.kpis.negative_rate_pct, Some(20.0));
}

#[test]
fn test_variants_share_family_analytics() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(&dir);
    h.ingestor
        .ingest_product(
            ProductInput::new("P")
                .with_distribution(skewed_distribution())
                .with_catalog_rating(980, 4.4),
        )
        .unwrap();
    h.ingestor
        .ingest_product(ProductInput::new("V1").with_parent("P"))
        .unwrap();
    h.ingestor
        .ingest_product(ProductInput::new("V2").with_parent("V1"))
        .unwrap();
    h.tagged_reviews("V1", 5.0, "Color", 2, 2);
    h.tagged_reviews("V2", 2.0, "Color", 0, 1);

    let report = h.coordinator.run_cycle().unwrap();
    assert_eq!(report.processed, 3);
    assert_eq!(report.succeeded, 3);

    let v1 = h.stores.get_analytics("V1").unwrap().unwrap().analytics;
    let v2 = h.stores.get_analytics("V2").unwrap().unwrap().analytics;
    assert_eq!(v1.family, "P");
    assert_eq!(v2.family, "P");
    assert_eq!(v1.kpis, v2.kpis);
    assert_eq!(v1.raw_sentiment, v2.raw_sentiment);
    assert_eq!(v1.kpis.source, KpiSource::Catalog);
    assert_eq!(v1.kpis.total_reviews, 980);
    assert_eq!(v1.kpis.variation_count, 3);
    assert_eq!(v1.raw_sentiment[0].mentions, 3);
}

#[test]
fn test_aspect_mappings_apply_at_recompute() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(&dir);
    h.ingestor.ingest_product(ProductInput::new("X")).unwrap();
    h.tagged_reviews("X", 4.0, "sizing", 1, 1);
    h.tagged_reviews("X", 2.0, "Size ", 0, 1);

    h.coordinator.run_cycle().unwrap();
    let before = h.stores.get_analytics("X").unwrap().unwrap();
    assert!(before.analytics.raw_sentiment.is_empty());

    for raw in ["sizing", "size"] {
        h.ingestor
            .upsert_aspect_mapping(AspectMapping {
                raw_aspect: raw.into(),
                canonical: "Fit".into(),
                category: Some("Sizing".into()),
            })
            .unwrap();
    }

    h.coordinator.run_cycle().unwrap();
    let after = h.stores.get_analytics("X").unwrap().unwrap();
    let fit = &after.analytics.raw_sentiment[0];
    assert_eq!(fit.aspect, "Fit");
    assert_eq!(fit.category.as_deref(), Some("Sizing"));
    assert_eq!((fit.positive, fit.negative), (1, 1));
}

#[test]
fn test_product_without_reviews_gets_empty_analytics() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(&dir);
    h.ingestor.ingest_product(ProductInput::new("EMPTY")).unwrap();

    h.coordinator.run_cycle().unwrap();
    let stats = h.stores.get_analytics("EMPTY").unwrap().unwrap();
    assert_eq!(stats.analytics.kpis.total_reviews, 0);
    assert_eq!(stats.analytics.kpis.average_rating, None);
    assert!(stats.analytics.trend.is_empty());
}

#[test]
fn test_variant_enrichment_keeps_family_together() {
    let dir = TempDir::new().unwrap();
    let h = Harness::new(&dir);
    h.ingestor.ingest_product(ProductInput::new("P1")).unwrap();
    h.ingestor
        .ingest_product(ProductInput::new("V1").with_parent("P1"))
        .unwrap();
    h.tagged_reviews("V1", 5.0, "Fit", 1, 1);

    h.ingestor
        .ingest_product(ProductInput::new("V1").with_catalog_rating(40, 4.8))
        .unwrap();
    h.tagged_reviews("V1", 4.0, "Fit", 1, 1);

    let report = h.coordinator.run_cycle().unwrap();
    assert!(report.failures.is_empty());

    let p1 = h.stores.get_analytics("P1").unwrap().unwrap().analytics;
    let v1 = h.stores.get_analytics("V1").unwrap().unwrap().analytics;
    assert_eq!(v1.family, "P1");
    assert_eq!(p1.family, "P1");
    assert_eq!(v1.kpis.variation_count, 2);
    assert_eq!(v1.raw_sentiment[0].mentions, 2);
}
