//! Deployment configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Settings shared by the store set, the aggregation engine and the swap
/// coordinator.
#[derive(Clone, Debug)]
pub struct AnalyticsConfig {
    /// Directory holding the active pointer and both stores.
    pub root: PathBuf,

    /// Maximum aspects reported per sentiment list.
    pub top_n: usize,

    /// Minimum positive + negative mentions for an aspect to be reported.
    pub min_mentions: u64,

    /// Allowed distance of a rating distribution's sum from 100.
    pub distribution_tolerance: f64,

    /// Upper bound on a cycle's recompute phase.
    pub cycle_timeout: Option<Duration>,

    /// Decoded analytics cached per store.
    pub stats_cache_size: usize,
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("./analytics"),
            top_n: 15,
            min_mentions: 2,
            distribution_tolerance: 2.0,
            cycle_timeout: None,
            stats_cache_size: 256,
        }
    }
}

impl AnalyticsConfig {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Default::default()
        }
    }
}
