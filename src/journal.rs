//! Catch-up journal for raw writes that land after a snapshot.
//!
//! A cycle snapshots the active store, then recomputes the standby. Raw
//! writes that reach the active store in between are not part of the
//! snapshot, and the next sync copies in the opposite direction. The journal
//! records those writes so they can be replayed into the standby right
//! before it becomes active. Derived analytics are never journaled.

use crate::types::{AspectMapping, Product, Review, ReviewId, ReviewStatus, ReviewTag};
use parking_lot::Mutex;

/// Raw writes that can be carried over to the standby store.
#[derive(Clone, Debug, PartialEq)]
pub enum JournalOperation {
    UpsertProduct(Product),
    InsertReview(Review),
    SetReviewStatus { id: ReviewId, status: ReviewStatus },
    InsertTag(ReviewTag),
    UpsertAspectMapping(AspectMapping),
}

/// A single journal entry.
#[derive(Clone, Debug, PartialEq)]
pub struct JournalEntry {
    /// Position since the journal was armed, starting at 1.
    pub seq: u64,
    pub operation: JournalOperation,
}

/// In-memory journal; records only while armed.
#[derive(Default)]
pub struct CatchUpJournal {
    entries: Mutex<Option<Vec<JournalEntry>>>,
}

impl CatchUpJournal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start recording from an empty journal.
    pub fn arm(&self) {
        *self.entries.lock() = Some(Vec::new());
    }

    /// Stop recording and return what was recorded.
    pub fn disarm(&self) -> Vec<JournalEntry> {
        self.entries.lock().take().unwrap_or_default()
    }

    pub fn is_armed(&self) -> bool {
        self.entries.lock().is_some()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().as_ref().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record an operation if armed.
    pub fn record(&self, operation: JournalOperation) {
        if let Some(entries) = self.entries.lock().as_mut() {
            let seq = entries.len() as u64 + 1;
            entries.push(JournalEntry { seq, operation });
        }
    }
}
