//! Store handle: one physical copy of the analytics data.
//!
//! A store is a directory holding a manifest, a lock file and one table file
//! per entity table. Two stores exist per deployment; see [`crate::stores`].

use crate::error::{Result, StoreError};
use crate::journal::{CatchUpJournal, JournalEntry, JournalOperation};
use crate::tables::Table;
use crate::types::{
    aspect_key, Analytics, AspectMapping, Product, ProductStats, Review, ReviewId, ReviewInput,
    ReviewStatus, ReviewTag, StoreCounts, TagId, TagInput, Timestamp, ANALYTICS_VERSION,
};
use fs2::FileExt;
use lru::LruCache;
use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Directory of the store.
    pub path: PathBuf,

    /// Whether to create the store if it doesn't exist.
    pub create_if_missing: bool,

    /// Number of decoded analytics records kept in memory.
    pub stats_cache_size: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./store"),
            create_if_missing: true,
            stats_cache_size: 256,
        }
    }
}

/// Magic bytes for store manifest.
const STORE_MAGIC: &[u8; 4] = b"RVA\0";

/// Current store format version.
const STORE_VERSION: u8 = 1;

/// Persisted analytics row; the analytics themselves are an opaque JSON blob.
#[derive(Clone, Debug, Serialize, Deserialize)]
struct StatsRow {
    version: u8,
    last_updated: Timestamp,
    blob: Vec<u8>,
}

/// One physical store.
pub struct Store {
    config: StoreConfig,

    /// Lock file for exclusive access.
    _lock_file: File,

    products: Table<String, Product>,
    reviews: Table<ReviewId, Review>,
    tags: Table<TagId, ReviewTag>,
    /// Keyed by [`aspect_key`] of the raw label.
    aspects: Table<String, AspectMapping>,
    stats: Table<String, StatsRow>,

    next_review_id: AtomicU64,
    next_tag_id: AtomicU64,

    /// Decoded analytics, cleared on reload.
    stats_cache: Mutex<LruCache<String, ProductStats>>,

    /// Raw writes since the last snapshot, while a cycle is in flight.
    journal: CatchUpJournal,

    /// Serializes writers; held by snapshot sync for a point-in-time copy.
    write_lock: Mutex<()>,
}

impl Store {
    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        if config.path.join("MANIFEST").exists() {
            Self::open(config)
        } else if config.create_if_missing {
            Self::create(config)
        } else {
            Err(StoreError::NotInitialized)
        }
    }

    /// Create a new, empty store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        fs::create_dir_all(&config.path)?;
        Self::write_manifest(&config.path)?;
        Self::open_tables(config)
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        Self::verify_manifest(&config.path)?;
        Self::open_tables(config)
    }

    fn open_tables(config: StoreConfig) -> Result<Self> {
        let lock_file = Self::acquire_lock(&config.path)?;

        let products = Table::open(&config.path, "products")?;
        let reviews = Table::open(&config.path, "reviews")?;
        let tags = Table::open(&config.path, "tags")?;
        let aspects = Table::open(&config.path, "aspects")?;
        let stats = Table::open(&config.path, "stats")?;

        let cache_size =
            NonZeroUsize::new(config.stats_cache_size.max(1)).unwrap_or(NonZeroUsize::MIN);

        let store = Self {
            config,
            _lock_file: lock_file,
            products,
            reviews,
            tags,
            aspects,
            stats,
            next_review_id: AtomicU64::new(1),
            next_tag_id: AtomicU64::new(1),
            stats_cache: Mutex::new(LruCache::new(cache_size)),
            journal: CatchUpJournal::new(),
            write_lock: Mutex::new(()),
        };
        store.reset_id_sequences();
        Ok(store)
    }

    fn reset_id_sequences(&self) {
        let next_review = self.reviews.last_key().map_or(1, |id| id.0 + 1);
        let next_tag = self.tags.last_key().map_or(1, |id| id.0 + 1);
        self.next_review_id.store(next_review, Ordering::SeqCst);
        self.next_tag_id.store(next_tag, Ordering::SeqCst);
    }

    // --- Products ---

    /// Insert or replace a product.
    ///
    /// A variant's family anchor must already exist and be an anchor. A
    /// stored product never changes family; its reviews are filed under it.
    pub fn upsert_product(&self, product: Product) -> Result<()> {
        let _lock = self.write_lock.lock();

        if let Some(existing) = self.products.get(&product.asin) {
            if existing.parent_key != product.parent_key {
                return Err(StoreError::InvalidOperation(format!(
                    "product {} belongs to family {} and cannot move to {}",
                    product.asin, existing.parent_key, product.parent_key
                )));
            }
        }

        if !product.is_anchor() {
            match self.products.get(&product.parent_key) {
                Some(parent) if parent.is_anchor() => {}
                Some(parent) => {
                    return Err(StoreError::InvalidOperation(format!(
                        "product {} is a variant of {} and cannot anchor {}",
                        parent.asin, parent.parent_key, product.asin
                    )));
                }
                None => {
                    return Err(StoreError::MissingAnchor {
                        asin: product.asin,
                        parent_key: product.parent_key,
                    });
                }
            }
        }

        self.journal.record(JournalOperation::UpsertProduct(product.clone()));
        self.products.insert(product.asin.clone(), product);
        Ok(())
    }

    pub fn get_product(&self, asin: &str) -> Option<Product> {
        self.products.get(&asin.to_string())
    }

    /// All product keys, in key order.
    pub fn product_keys(&self) -> Vec<String> {
        self.products.keys()
    }

    /// Resolve a product to the anchor of its family.
    pub fn family_anchor(&self, asin: &str) -> Result<Product> {
        let product = self
            .get_product(asin)
            .ok_or_else(|| StoreError::ProductNotFound(asin.to_string()))?;

        if product.is_anchor() {
            return Ok(product);
        }

        self.get_product(&product.parent_key)
            .ok_or(StoreError::MissingAnchor {
                asin: product.asin,
                parent_key: product.parent_key,
            })
    }

    /// Every product whose family anchor is `parent_key`, the anchor included.
    pub fn family_members(&self, parent_key: &str) -> Vec<Product> {
        self.products.filter(|p| p.parent_key == parent_key)
    }

    // --- Reviews ---

    /// Append a review against an existing product.
    ///
    /// The review is filed under the product's family anchor.
    pub fn insert_review(&self, input: ReviewInput) -> Result<Review> {
        let _lock = self.write_lock.lock();

        let product = self
            .get_product(&input.asin)
            .ok_or_else(|| StoreError::ProductNotFound(input.asin.clone()))?;

        let id = ReviewId(self.next_review_id.fetch_add(1, Ordering::SeqCst));
        let review = Review {
            id,
            asin: input.asin,
            parent_key: product.parent_key,
            rating_score: input.rating_score,
            reviewed_at: input.reviewed_at,
            text: input.text,
            status: ReviewStatus::Unprocessed,
        };

        self.journal.record(JournalOperation::InsertReview(review.clone()));
        self.reviews.insert(id, review.clone());
        Ok(review)
    }

    pub fn get_review(&self, id: ReviewId) -> Option<Review> {
        self.reviews.get(&id)
    }

    /// Reviews filed under a family anchor, in id order.
    pub fn family_reviews(&self, parent_key: &str) -> Vec<Review> {
        self.reviews.filter(|r| r.parent_key == parent_key)
    }

    pub fn set_review_status(&self, id: ReviewId, status: ReviewStatus) -> Result<()> {
        let _lock = self.write_lock.lock();

        let mut review = self.reviews.get(&id).ok_or(StoreError::ReviewNotFound(id))?;
        review.status = status;
        self.journal.record(JournalOperation::SetReviewStatus { id, status });
        self.reviews.insert(id, review);
        Ok(())
    }

    // --- Tags ---

    /// Attach a tag to an existing review.
    pub fn insert_tag(&self, review_id: ReviewId, input: TagInput) -> Result<ReviewTag> {
        let _lock = self.write_lock.lock();

        if !self.reviews.contains(&review_id) {
            return Err(StoreError::ReviewNotFound(review_id));
        }

        let id = TagId(self.next_tag_id.fetch_add(1, Ordering::SeqCst));
        let tag = ReviewTag {
            id,
            review_id,
            aspect: input.aspect,
            sentiment: input.sentiment,
            quote: input.quote,
            created_at: Timestamp::now(),
        };

        self.journal.record(JournalOperation::InsertTag(tag.clone()));
        self.tags.insert(id, tag.clone());
        Ok(tag)
    }

    /// Tags attached to any of `review_ids`, in tag id order.
    pub fn tags_for_reviews(&self, review_ids: &BTreeSet<ReviewId>) -> Vec<ReviewTag> {
        self.tags.filter(|t| review_ids.contains(&t.review_id))
    }

    /// Every tag in the store.
    pub fn tags(&self) -> Vec<ReviewTag> {
        self.tags.filter(|_| true)
    }

    /// Remove tags by id, returning how many existed.
    pub fn remove_tags(&self, ids: &[TagId]) -> usize {
        let _lock = self.write_lock.lock();
        ids.iter().filter(|id| self.tags.remove(id).is_some()).count()
    }

    // --- Aspect mappings ---

    pub fn upsert_aspect_mapping(&self, mapping: AspectMapping) {
        let _lock = self.write_lock.lock();
        self.journal.record(JournalOperation::UpsertAspectMapping(mapping.clone()));
        self.aspects.insert(aspect_key(&mapping.raw_aspect), mapping);
    }

    /// Mapping for a raw label, matched after trimming and lowercasing.
    pub fn aspect_mapping(&self, raw_aspect: &str) -> Option<AspectMapping> {
        self.aspects.get(&aspect_key(raw_aspect))
    }

    /// Snapshot of the whole mapping table, keyed by [`aspect_key`].
    pub fn aspect_mappings(&self) -> BTreeMap<String, AspectMapping> {
        self.aspects.read().clone()
    }

    // --- Derived analytics ---

    /// Replace the analytics of a product wholesale.
    pub fn upsert_stats(&self, analytics: &Analytics) -> Result<ProductStats> {
        let blob = serde_json::to_vec(analytics)?;
        let last_updated = Timestamp::now();

        let _lock = self.write_lock.lock();
        self.stats.insert(
            analytics.asin.clone(),
            StatsRow {
                version: ANALYTICS_VERSION,
                last_updated,
                blob,
            },
        );
        self.stats_cache.lock().pop(&analytics.asin);

        Ok(ProductStats {
            asin: analytics.asin.clone(),
            version: ANALYTICS_VERSION,
            last_updated,
            analytics: analytics.clone(),
        })
    }

    /// Most recent analytics of a product, if computed.
    pub fn get_stats(&self, asin: &str) -> Result<Option<ProductStats>> {
        if let Some(cached) = self.stats_cache.lock().get(asin).cloned() {
            return Ok(Some(cached));
        }

        let row = match self.stats.get(&asin.to_string()) {
            Some(row) => row,
            None => return Ok(None),
        };

        if row.version != ANALYTICS_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported analytics version: {}",
                row.version
            )));
        }

        let analytics: Analytics = serde_json::from_slice(&row.blob)
            .map_err(|e| StoreError::Deserialization(e.to_string()))?;

        let stats = ProductStats {
            asin: asin.to_string(),
            version: row.version,
            last_updated: row.last_updated,
            analytics,
        };
        self.stats_cache.lock().put(asin.to_string(), stats.clone());
        Ok(Some(stats))
    }

    /// Raw analytics blob of a product.
    pub fn stats_blob(&self, asin: &str) -> Option<Vec<u8>> {
        self.stats.get(&asin.to_string()).map(|row| row.blob)
    }

    // --- Store Operations ---

    /// Row counts of every table.
    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            products: self.products.len() as u64,
            reviews: self.reviews.len() as u64,
            tags: self.tags.len() as u64,
            aspect_mappings: self.aspects.len() as u64,
            stats: self.stats.len() as u64,
        }
    }

    /// Table files of this store, in a stable order.
    pub fn table_paths(&self) -> Vec<PathBuf> {
        vec![
            self.products.path().to_path_buf(),
            self.reviews.path().to_path_buf(),
            self.tags.path().to_path_buf(),
            self.aspects.path().to_path_buf(),
            self.stats.path().to_path_buf(),
        ]
    }

    /// Persist every table that changed.
    pub fn flush(&self) -> Result<()> {
        let _lock = self.write_lock.lock();
        self.products.save_if_dirty()?;
        self.reviews.save_if_dirty()?;
        self.tags.save_if_dirty()?;
        self.aspects.save_if_dirty()?;
        self.stats.save_if_dirty()?;
        Ok(())
    }

    /// Block writers until the guard is dropped.
    pub(crate) fn write_guard(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock()
    }

    /// Persist every table; caller holds the write guard.
    ///
    /// Tables are written even when clean so that every table file exists
    /// on disk before a copy.
    pub(crate) fn save_tables(&self) -> Result<()> {
        self.products.save()?;
        self.reviews.save()?;
        self.tags.save()?;
        self.aspects.save()?;
        self.stats.save()?;
        Ok(())
    }

    /// Re-read every table from disk, discarding unsaved changes.
    pub fn reload(&self) -> Result<()> {
        let _lock = self.write_lock.lock();
        self.reload_tables()
    }

    /// Re-read every table; caller holds the write guard.
    pub(crate) fn reload_tables(&self) -> Result<()> {
        self.products.reload()?;
        self.reviews.reload()?;
        self.tags.reload()?;
        self.aspects.reload()?;
        self.stats.reload()?;
        self.stats_cache.lock().clear();
        self.reset_id_sequences();
        Ok(())
    }

    // --- Catch-up journal ---

    /// Start journaling raw writes; caller holds the write guard at the
    /// snapshot point.
    pub(crate) fn arm_journal(&self) {
        self.journal.arm();
    }

    /// Stop journaling and hand over the recorded writes.
    pub(crate) fn take_journal(&self) -> Vec<JournalEntry> {
        let _lock = self.write_lock.lock();
        self.journal.disarm()
    }

    /// Apply writes journaled by the other store, keeping their ids.
    pub(crate) fn replay(&self, entries: &[JournalEntry]) -> Result<usize> {
        let _lock = self.write_lock.lock();

        for entry in entries {
            match &entry.operation {
                JournalOperation::UpsertProduct(product) => {
                    self.products.insert(product.asin.clone(), product.clone());
                }
                JournalOperation::InsertReview(review) => {
                    self.reviews.insert(review.id, review.clone());
                }
                JournalOperation::SetReviewStatus { id, status } => {
                    let mut review = self.reviews.get(id).ok_or(StoreError::ReviewNotFound(*id))?;
                    review.status = *status;
                    self.reviews.insert(*id, review);
                }
                JournalOperation::InsertTag(tag) => {
                    self.tags.insert(tag.id, tag.clone());
                }
                JournalOperation::UpsertAspectMapping(mapping) => {
                    self.aspects.insert(aspect_key(&mapping.raw_aspect), mapping.clone());
                }
            }
        }

        self.reset_id_sequences();
        Ok(entries.len())
    }

    /// Get the store path.
    pub fn path(&self) -> &Path {
        &self.config.path
    }

    // --- Private Helpers ---

    fn write_manifest(path: &Path) -> Result<()> {
        use std::io::Write;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::create(manifest_path)?;

        file.write_all(STORE_MAGIC)?;
        file.write_all(&[STORE_VERSION])?;
        file.sync_all()?;

        Ok(())
    }

    fn verify_manifest(path: &Path) -> Result<()> {
        use std::io::Read;

        let manifest_path = path.join("MANIFEST");
        let mut file = File::open(manifest_path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != STORE_MAGIC {
            return Err(StoreError::InvalidFormat("Invalid store magic".into()));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != STORE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported store version: {}",
                version[0]
            )));
        }

        Ok(())
    }

    fn acquire_lock(path: &Path) -> Result<File> {
        let lock_path = path.join("LOCK");
        let lock_file = File::create(lock_path)?;

        lock_file
            .try_lock_exclusive()
            .map_err(|_| StoreError::Locked)?;

        Ok(lock_file)
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort flush on drop
        let _lock = self.write_lock.lock();
        let _ = self.products.save_if_dirty();
        let _ = self.reviews.save_if_dirty();
        let _ = self.tags.save_if_dirty();
        let _ = self.aspects.save_if_dirty();
        let _ = self.stats.save_if_dirty();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{KpiSource, Kpis, Sentiment};
    use tempfile::TempDir;

    fn test_config(dir: &TempDir) -> StoreConfig {
        StoreConfig {
            path: dir.path().join("store"),
            create_if_missing: true,
            stats_cache_size: 16,
        }
    }

    fn sample_analytics(asin: &str) -> Analytics {
        Analytics {
            asin: asin.to_string(),
            family: asin.to_string(),
            kpis: Kpis {
                total_reviews: 3,
                average_rating: Some(4.0),
                variation_count: 1,
                negative_rate_pct: Some(0.0),
                source: KpiSource::Reviews,
            },
            raw_sentiment: Vec::new(),
            weighted_sentiment: Vec::new(),
            trend: Vec::new(),
        }
    }

    #[test]
    fn test_create_store() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(test_config(&dir)).unwrap();

        assert!(store.path().join("MANIFEST").exists());
        assert_eq!(store.counts(), StoreCounts::default());
    }

    #[test]
    fn test_variant_requires_anchor() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(test_config(&dir)).unwrap();

        let mut variant = Product::anchor("V1");
        variant.parent_key = "P1".into();
        let result = store.upsert_product(variant.clone());
        assert!(matches!(result, Err(StoreError::MissingAnchor { .. })));

        store.upsert_product(Product::anchor("P1")).unwrap();
        store.upsert_product(variant).unwrap();

        assert_eq!(store.family_anchor("V1").unwrap().asin, "P1");
        assert_eq!(store.family_anchor("P1").unwrap().asin, "P1");
        assert_eq!(store.family_members("P1").len(), 2);
    }

    #[test]
    fn test_family_is_fixed_once_stored() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(test_config(&dir)).unwrap();

        store.upsert_product(Product::anchor("P1")).unwrap();
        store.upsert_product(Product::anchor("X")).unwrap();
        let mut variant = Product::anchor("V1");
        variant.parent_key = "P1".into();
        store.upsert_product(variant.clone()).unwrap();

        // Demoting an anchor would leave its variants without one.
        let mut demoted = Product::anchor("P1");
        demoted.parent_key = "X".into();
        let result = store.upsert_product(demoted);
        assert!(matches!(result, Err(StoreError::InvalidOperation(_))));

        // Variants cannot anchor other products.
        let mut nested = Product::anchor("V2");
        nested.parent_key = "V1".into();
        let result = store.upsert_product(nested);
        assert!(matches!(result, Err(StoreError::InvalidOperation(_))));

        // Same family is a plain update.
        variant.title = Some("Red".into());
        store.upsert_product(variant).unwrap();

        let anchor = store.family_anchor("V1").unwrap();
        assert_eq!(anchor.asin, "P1");
        assert!(anchor.is_anchor());
        assert_eq!(store.get_product("V1").unwrap().title.as_deref(), Some("Red"));
    }

    #[test]
    fn test_reviews_filed_under_anchor() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(test_config(&dir)).unwrap();

        store.upsert_product(Product::anchor("P1")).unwrap();
        let mut variant = Product::anchor("V1");
        variant.parent_key = "P1".into();
        store.upsert_product(variant).unwrap();

        let review = store.insert_review(ReviewInput::new("V1", 4.0)).unwrap();
        assert_eq!(review.parent_key, "P1");
        assert_eq!(review.id, ReviewId(1));
        assert_eq!(store.family_reviews("P1").len(), 1);

        let missing = store.insert_review(ReviewInput::new("nope", 4.0));
        assert!(matches!(missing, Err(StoreError::ProductNotFound(_))));
    }

    #[test]
    fn test_tags_require_review() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(test_config(&dir)).unwrap();

        let result = store.insert_tag(ReviewId(9), TagInput::new("Fit", Sentiment::Positive));
        assert!(matches!(result, Err(StoreError::ReviewNotFound(ReviewId(9)))));
    }

    #[test]
    fn test_aspect_mapping_lookup_is_case_insensitive() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(test_config(&dir)).unwrap();

        store.upsert_aspect_mapping(AspectMapping {
            raw_aspect: "Fabric Quality".into(),
            canonical: "Material".into(),
            category: Some("Build".into()),
        });

        let mapping = store.aspect_mapping(" fabric quality").unwrap();
        assert_eq!(mapping.canonical, "Material");
        assert!(store.aspect_mapping("Zipper").is_none());
    }

    #[test]
    fn test_persistence_and_id_continuation() {
        let dir = TempDir::new().unwrap();

        {
            let store = Store::create(test_config(&dir)).unwrap();
            store.upsert_product(Product::anchor("P1")).unwrap();
            let review = store.insert_review(ReviewInput::new("P1", 5.0)).unwrap();
            store
                .insert_tag(review.id, TagInput::new("Fit", Sentiment::Positive))
                .unwrap();
            store.upsert_stats(&sample_analytics("P1")).unwrap();
            store.flush().unwrap();
        }

        let store = Store::open(test_config(&dir)).unwrap();
        assert_eq!(store.counts().reviews, 1);
        assert_eq!(store.counts().tags, 1);

        let next = store.insert_review(ReviewInput::new("P1", 3.0)).unwrap();
        assert_eq!(next.id, ReviewId(2));

        let stats = store.get_stats("P1").unwrap().unwrap();
        assert_eq!(stats.analytics, sample_analytics("P1"));
    }

    #[test]
    fn test_store_lock() {
        let dir = TempDir::new().unwrap();
        let _store = Store::create(test_config(&dir)).unwrap();

        let result = Store::open(test_config(&dir));
        assert!(matches!(result, Err(StoreError::Locked)));
    }

    #[test]
    fn test_open_missing_store_without_create() {
        let dir = TempDir::new().unwrap();
        let mut config = test_config(&dir);
        config.create_if_missing = false;

        let result = Store::open_or_create(config);
        assert!(matches!(result, Err(StoreError::NotInitialized)));
    }

    #[test]
    fn test_upsert_stats_replaces_cached_value() {
        let dir = TempDir::new().unwrap();
        let store = Store::create(test_config(&dir)).unwrap();

        store.upsert_stats(&sample_analytics("P1")).unwrap();
        assert!(store.get_stats("P1").unwrap().is_some());

        let mut updated = sample_analytics("P1");
        updated.kpis.total_reviews = 10;
        store.upsert_stats(&updated).unwrap();

        let stats = store.get_stats("P1").unwrap().unwrap();
        assert_eq!(stats.analytics.kpis.total_reviews, 10);
        assert!(store.get_stats("P2").unwrap().is_none());
    }
}
