//! Swap coordinator: sync, rebuild the standby store, flip the pointer.
//!
//! Readers and ingestion only ever touch the active store. A cycle copies
//! the active store over the standby, recomputes every product's analytics
//! in the standby, carries over raw writes that arrived meanwhile, and then
//! points readers at the standby. Readers see either the old or the new
//! analytics generation, never a mix.

use crate::aggregate::AggregationEngine;
use crate::config::AnalyticsConfig;
use crate::error::{Result, StoreError};
use crate::maintenance::{MaintenanceJob, MaintenanceOutcome};
use crate::store::Store;
use crate::stores::StoreSet;
use crate::sync::{FileCopySync, SnapshotSync, SyncReport};
use crate::types::StoreId;
use fs2::FileExt;
use std::fs::File;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Lock file under the deployment root owned by a running cycle or job.
pub const CYCLE_LOCK_FILE: &str = "CYCLE.lock";

/// A product whose aggregation failed and was skipped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityFailure {
    pub asin: String,
    pub reason: String,
}

/// Outcome of a completed analytics cycle.
#[derive(Clone, Debug)]
pub struct CycleReport {
    /// Store that was active when the cycle started.
    pub previous: StoreId,
    /// Store that is active now.
    pub active: StoreId,
    pub sync: SyncReport,
    pub processed: usize,
    pub succeeded: usize,
    pub failures: Vec<EntityFailure>,
    /// Raw writes carried over from the previous store at the flip.
    pub carried_over: usize,
    pub elapsed: Duration,
}

/// Outcome of a completed maintenance job.
#[derive(Clone, Debug)]
pub struct MaintenanceReport {
    pub job: String,
    pub previous: StoreId,
    pub active: StoreId,
    pub sync: SyncReport,
    pub outcome: MaintenanceOutcome,
    pub carried_over: usize,
    pub elapsed: Duration,
}

/// Stores prepared for a cycle: the snapshot has been copied into `standby`.
struct Prepared {
    active_id: StoreId,
    active: Arc<Store>,
    standby_id: StoreId,
    standby: Arc<Store>,
    sync: SyncReport,
}

/// Cancels the cycle running on the coordinator it was taken from.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    /// Ask the running cycle to stop before its next product.
    ///
    /// The pointer is not flipped; the next sync overwrites the partial
    /// standby.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }
}

/// Held for the lifetime of a cycle; releases the lock file on drop.
struct CycleGuard {
    _file: File,
}

pub struct SwapCoordinator {
    stores: Arc<StoreSet>,
    engine: AggregationEngine,
    syncer: Box<dyn SnapshotSync>,
    cycle_timeout: Option<Duration>,
    cancelled: Arc<AtomicBool>,
}

impl SwapCoordinator {
    pub fn new(stores: Arc<StoreSet>, config: &AnalyticsConfig) -> Self {
        Self {
            stores,
            engine: AggregationEngine::new(config),
            syncer: Box::new(FileCopySync),
            cycle_timeout: config.cycle_timeout,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Replace the snapshot sync strategy.
    pub fn with_sync(mut self, syncer: Box<dyn SnapshotSync>) -> Self {
        self.syncer = syncer;
        self
    }

    pub fn stores(&self) -> &Arc<StoreSet> {
        &self.stores
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            flag: Arc::clone(&self.cancelled),
        }
    }

    /// Run one full analytics cycle.
    pub fn run_cycle(&self) -> Result<CycleReport> {
        let started = Instant::now();
        let _guard = self.acquire_cycle_lock()?;
        self.cancelled.store(false, Ordering::SeqCst);

        let prepared = self.prepare()?;
        info!(
            active = %prepared.active_id,
            standby = %prepared.standby_id,
            "recomputing analytics"
        );

        let keys = prepared.standby.product_keys();
        let mut failures = Vec::new();
        let mut succeeded = 0;

        for (processed, asin) in keys.iter().enumerate() {
            if let Err(e) = self.check_interrupt(started, processed) {
                self.abandon(&prepared);
                return Err(e);
            }

            let result = self
                .engine
                .aggregate(&prepared.standby, asin)
                .and_then(|analytics| prepared.standby.upsert_stats(&analytics));

            match result {
                Ok(_) => succeeded += 1,
                Err(e) => {
                    warn!(asin = %asin, error = %e, "skipping product");
                    failures.push(EntityFailure {
                        asin: asin.clone(),
                        reason: e.to_string(),
                    });
                }
            }
        }

        let carried_over = self.publish(&prepared)?;

        let report = CycleReport {
            previous: prepared.active_id,
            active: prepared.standby_id,
            sync: prepared.sync,
            processed: keys.len(),
            succeeded,
            failures,
            carried_over,
            elapsed: started.elapsed(),
        };
        info!(
            active = %report.active,
            processed = report.processed,
            failed = report.failures.len(),
            carried_over = report.carried_over,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "analytics cycle complete"
        );
        Ok(report)
    }

    /// Run a maintenance job against the standby store and publish it.
    pub fn run_maintenance_job(&self, job: &dyn MaintenanceJob) -> Result<MaintenanceReport> {
        let started = Instant::now();
        let _guard = self.acquire_cycle_lock()?;

        let prepared = self.prepare()?;
        info!(job = job.name(), standby = %prepared.standby_id, "running maintenance job");

        let outcome = match job.apply(&prepared.standby) {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(job = job.name(), error = %e, "maintenance job failed");
                self.abandon(&prepared);
                return Err(e);
            }
        };

        let carried_over = self.publish(&prepared)?;

        let report = MaintenanceReport {
            job: job.name().to_string(),
            previous: prepared.active_id,
            active: prepared.standby_id,
            sync: prepared.sync,
            outcome,
            carried_over,
            elapsed: started.elapsed(),
        };
        info!(
            job = %report.job,
            active = %report.active,
            examined = report.outcome.rows_examined,
            removed = report.outcome.rows_removed,
            "maintenance job complete"
        );
        Ok(report)
    }

    fn acquire_cycle_lock(&self) -> Result<CycleGuard> {
        let file = File::create(self.stores.root().join(CYCLE_LOCK_FILE))?;
        file.try_lock_exclusive()
            .map_err(|_| StoreError::CycleInProgress)?;
        Ok(CycleGuard { _file: file })
    }

    /// Resolve both stores and copy the active one over the standby.
    fn prepare(&self) -> Result<Prepared> {
        let active_id = self.stores.resolve_active()?;
        let standby_id = active_id.complement();

        let active = self.stores.open_store(active_id)?;
        let standby = self.stores.open_store(standby_id)?;

        let sync = match self.syncer.sync(&active, &standby) {
            Ok(report) => report,
            Err(e) => {
                active.take_journal();
                warn!(from = %active_id, to = %standby_id, error = %e, "snapshot sync failed");
                return Err(StoreError::Sync {
                    from: active_id,
                    to: standby_id,
                    reason: e.to_string(),
                });
            }
        };
        info!(
            from = %active_id,
            to = %standby_id,
            tables = sync.tables.len(),
            bytes = sync.total_bytes(),
            "snapshot synced"
        );

        Ok(Prepared {
            active_id,
            active,
            standby_id,
            standby,
            sync,
        })
    }

    fn check_interrupt(&self, started: Instant, processed: usize) -> Result<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            return Err(StoreError::Cancelled { processed });
        }
        if let Some(timeout) = self.cycle_timeout {
            if started.elapsed() > timeout {
                return Err(StoreError::CycleTimedOut { processed });
            }
        }
        Ok(())
    }

    /// Carry late raw writes into the standby, persist it, and flip.
    ///
    /// Ingestion is held off for the duration, so nothing can be written to
    /// the old active store between the carry-over and the flip.
    fn publish(&self, prepared: &Prepared) -> Result<usize> {
        let _gate = self.stores.ingest_exclusive();

        let late = prepared.active.take_journal();
        prepared.standby.replay(&late)?;
        prepared.standby.flush()?;

        self.stores.pointer().set_active(prepared.standby_id)?;
        info!(from = %prepared.active_id, to = %prepared.standby_id, "active pointer flipped");
        Ok(late.len())
    }

    /// Leave the pointer alone and stop journaling on the active store.
    fn abandon(&self, prepared: &Prepared) {
        let dropped = prepared.active.take_journal();
        warn!(
            active = %prepared.active_id,
            journaled = dropped.len(),
            "cycle abandoned, active store unchanged"
        );
    }
}
