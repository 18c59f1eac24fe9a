//! Bulk maintenance jobs.
//!
//! Jobs mutate the standby store only; the swap coordinator publishes the
//! result with the same flip used for analytics cycles.

mod jobs;

pub use jobs::{DedupeTags, PruneOrphanTags};

use crate::error::Result;
use crate::store::Store;

/// What a job did to the standby store.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MaintenanceOutcome {
    pub rows_examined: u64,
    pub rows_removed: u64,
}

/// A bulk mutation that must not be visible until fully applied.
pub trait MaintenanceJob: Send + Sync {
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    /// Apply the job to `store`, which is never the active store.
    fn apply(&self, store: &Store) -> Result<MaintenanceOutcome>;
}
