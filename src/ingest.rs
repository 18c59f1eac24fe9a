//! Ingestion boundary used by the scraping and tagging collaborators.
//!
//! Every call resolves the active pointer and writes into that store only,
//! so raw data never lands in the standby a cycle is rebuilding.

use crate::error::{Result, StoreError};
use crate::stores::StoreSet;
use crate::types::{
    AspectMapping, Product, ProductInput, Review, ReviewId, ReviewInput, ReviewStatus, ReviewTag,
    TagInput, Timestamp,
};
use std::sync::Arc;
use tracing::debug;

pub struct Ingestor {
    stores: Arc<StoreSet>,
}

impl Ingestor {
    pub fn new(stores: Arc<StoreSet>) -> Self {
        Self { stores }
    }

    /// Insert or update a product, creating its family anchor if needed.
    ///
    /// Fields missing from `input` keep their stored values. A `parent_key`
    /// that names a variant is resolved to that variant's anchor. A stored
    /// product cannot be moved to another family.
    pub fn ingest_product(&self, input: ProductInput) -> Result<Product> {
        let _gate = self.stores.ingest_shared();
        let (_, store) = self.stores.active_store()?;

        let existing = store.get_product(&input.asin);
        let requested_parent = input
            .parent_key
            .clone()
            .or_else(|| existing.as_ref().map(|p| p.parent_key.clone()))
            .unwrap_or_else(|| input.asin.clone());

        let parent_key =
            if requested_parent != input.asin && store.get_product(&requested_parent).is_some() {
                store.family_anchor(&requested_parent)?.asin
            } else {
                requested_parent
            };

        if let Some(existing) = &existing {
            if existing.parent_key != parent_key {
                return Err(StoreError::InvalidOperation(format!(
                    "product {} belongs to family {} and cannot move to {}",
                    input.asin, existing.parent_key, parent_key
                )));
            }
        }

        if parent_key != input.asin && store.get_product(&parent_key).is_none() {
            debug!(anchor = %parent_key, variant = %input.asin, "creating family anchor");
            store.upsert_product(Product::anchor(parent_key.clone()))?;
        }

        let product = Product {
            asin: input.asin.clone(),
            parent_key,
            title: input.title.or_else(|| existing.as_ref().and_then(|p| p.title.clone())),
            rating_count: input
                .rating_count
                .or_else(|| existing.as_ref().and_then(|p| p.rating_count)),
            average_rating: input
                .average_rating
                .or_else(|| existing.as_ref().and_then(|p| p.average_rating)),
            distribution: input
                .distribution
                .or_else(|| existing.as_ref().and_then(|p| p.distribution.clone())),
            updated: Timestamp::now(),
        };

        store.upsert_product(product.clone())?;
        store.flush()?;
        Ok(product)
    }

    pub fn ingest_review(&self, input: ReviewInput) -> Result<Review> {
        let mut reviews = self.ingest_reviews(vec![input])?;
        Ok(reviews.remove(0))
    }

    /// Append reviews against existing products.
    pub fn ingest_reviews(&self, inputs: Vec<ReviewInput>) -> Result<Vec<Review>> {
        let _gate = self.stores.ingest_shared();
        let (_, store) = self.stores.active_store()?;

        let mut reviews = Vec::with_capacity(inputs.len());
        for input in inputs {
            reviews.push(store.insert_review(input)?);
        }

        store.flush()?;
        Ok(reviews)
    }

    /// Move reviews into the tagging queue.
    pub fn mark_queued(&self, ids: &[ReviewId]) -> Result<()> {
        let _gate = self.stores.ingest_shared();
        let (_, store) = self.stores.active_store()?;

        for id in ids {
            store.set_review_status(*id, ReviewStatus::Queued)?;
        }

        store.flush()
    }

    /// Attach tags to a review and mark it tagged.
    pub fn ingest_tags(&self, review_id: ReviewId, tags: Vec<TagInput>) -> Result<Vec<ReviewTag>> {
        let _gate = self.stores.ingest_shared();
        let (_, store) = self.stores.active_store()?;

        let mut inserted = Vec::with_capacity(tags.len());
        for tag in tags {
            inserted.push(store.insert_tag(review_id, tag)?);
        }
        store.set_review_status(review_id, ReviewStatus::Tagged)?;

        store.flush()?;
        Ok(inserted)
    }

    /// Record a normalization of a raw aspect label.
    pub fn upsert_aspect_mapping(&self, mapping: AspectMapping) -> Result<()> {
        let _gate = self.stores.ingest_shared();
        let (_, store) = self.stores.active_store()?;

        store.upsert_aspect_mapping(mapping);
        store.flush()
    }
}
