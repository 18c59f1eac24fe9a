//! Built-in maintenance jobs.

use super::{MaintenanceJob, MaintenanceOutcome};
use crate::error::Result;
use crate::store::Store;
use crate::types::{aspect_key, ReviewId, ReviewTag, Sentiment, TagId, Timestamp};
use std::collections::HashMap;

/// Removes tags that repeat another tag of the same review.
///
/// Two tags are duplicates when they share the review, the normalized aspect
/// label, the sentiment and the quote. Re-tagging after a normalization pass
/// produces these; the newest copy is kept.
#[derive(Clone, Copy, Debug, Default)]
pub struct DedupeTags;

type DedupeKey = (ReviewId, String, Sentiment, String);

impl MaintenanceJob for DedupeTags {
    fn name(&self) -> &str {
        "dedupe-tags"
    }

    fn apply(&self, store: &Store) -> Result<MaintenanceOutcome> {
        let tags = store.tags();
        let mut newest: HashMap<DedupeKey, (Timestamp, TagId)> = HashMap::new();

        for tag in &tags {
            let rank = (tag.created_at, tag.id);
            newest
                .entry(dedupe_key(tag))
                .and_modify(|best| {
                    if rank > *best {
                        *best = rank;
                    }
                })
                .or_insert(rank);
        }

        let duplicates: Vec<TagId> = tags
            .iter()
            .filter(|tag| newest.get(&dedupe_key(tag)).map(|(_, id)| *id) != Some(tag.id))
            .map(|tag| tag.id)
            .collect();

        let removed = store.remove_tags(&duplicates);
        Ok(MaintenanceOutcome {
            rows_examined: tags.len() as u64,
            rows_removed: removed as u64,
        })
    }
}

fn dedupe_key(tag: &ReviewTag) -> DedupeKey {
    (
        tag.review_id,
        aspect_key(&tag.aspect),
        tag.sentiment,
        tag.quote.trim().to_string(),
    )
}

/// Removes tags whose review no longer exists.
#[derive(Clone, Copy, Debug, Default)]
pub struct PruneOrphanTags;

impl MaintenanceJob for PruneOrphanTags {
    fn name(&self) -> &str {
        "prune-orphan-tags"
    }

    fn apply(&self, store: &Store) -> Result<MaintenanceOutcome> {
        let tags = store.tags();
        let orphans: Vec<TagId> = tags
            .iter()
            .filter(|tag| store.get_review(tag.review_id).is_none())
            .map(|tag| tag.id)
            .collect();

        let removed = store.remove_tags(&orphans);
        Ok(MaintenanceOutcome {
            rows_examined: tags.len() as u64,
            rows_removed: removed as u64,
        })
    }
}
