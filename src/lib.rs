//! # Review Analytics
//!
//! Per-product review analytics served from one of two physical stores,
//! recomputed in the other, and published with an atomic pointer flip.
//!
//! ## Core Concepts
//!
//! - **Stores**: two full copies of the data (`A` and `B`), one active
//! - **Active pointer**: a persisted token naming the store that serves
//!   reads and ingestion
//! - **Cycles**: sync active over standby, recompute every product in the
//!   standby, flip the pointer
//! - **Weighted sentiment**: per-star aspect sentiment re-weighted by the
//!   product's real rating distribution
//!
//! ## Example
//!
//! ```ignore
//! use review_analytics::{AnalyticsConfig, Ingestor, ProductInput, StoreSet, SwapCoordinator};
//! use std::sync::Arc;
//!
//! let config = AnalyticsConfig::with_root("./analytics");
//! let stores = Arc::new(StoreSet::open(&config)?);
//!
//! let ingestor = Ingestor::new(Arc::clone(&stores));
//! ingestor.ingest_product(ProductInput::new("B0001").with_parent("B0000"))?;
//!
//! let coordinator = SwapCoordinator::new(Arc::clone(&stores), &config);
//! coordinator.run_cycle()?;
//!
//! let stats = stores.get_analytics("B0001")?;
//! ```

pub mod aggregate;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod ingest;
pub mod journal;
pub mod maintenance;
pub mod pointer;
pub mod store;
pub mod stores;
pub mod sync;
pub mod tables;
pub mod types;

// Re-exports
pub use aggregate::AggregationEngine;
pub use config::AnalyticsConfig;
pub use coordinator::{
    CancelHandle, CycleReport, EntityFailure, MaintenanceReport, SwapCoordinator,
};
pub use error::{Result, StoreError};
pub use ingest::Ingestor;
pub use maintenance::{DedupeTags, MaintenanceJob, MaintenanceOutcome, PruneOrphanTags};
pub use pointer::ActivePointer;
pub use store::{Store, StoreConfig};
pub use stores::StoreSet;
pub use sync::{FileCopySync, SnapshotSync, SyncReport, TableCopy};
pub use types::*;
