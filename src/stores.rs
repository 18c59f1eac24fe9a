//! The pair of physical stores and the pointer that selects between them.

use crate::config::AnalyticsConfig;
use crate::error::Result;
use crate::pointer::ActivePointer;
use crate::store::{Store, StoreConfig};
use crate::types::{ProductStats, StoreId};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Owns the deployment root, the active pointer and one handle per store.
///
/// Every component that needs to know which store is authoritative goes
/// through a shared `StoreSet` rather than global state.
pub struct StoreSet {
    root: PathBuf,
    pointer: ActivePointer,
    stats_cache_size: usize,
    handles: Mutex<HashMap<StoreId, Arc<Store>>>,

    /// Shared by ingestion calls, exclusive while the pointer flips, so no
    /// raw write lands in a store after it stops being active.
    ingest_gate: RwLock<()>,
}

impl StoreSet {
    pub fn open(config: &AnalyticsConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.root)?;
        Ok(Self {
            root: config.root.clone(),
            pointer: ActivePointer::new(&config.root),
            stats_cache_size: config.stats_cache_size,
            handles: Mutex::new(HashMap::new()),
            ingest_gate: RwLock::new(()),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pointer(&self) -> &ActivePointer {
        &self.pointer
    }

    pub fn resolve_active(&self) -> Result<StoreId> {
        self.pointer.resolve_active()
    }

    pub fn resolve_standby(&self) -> Result<StoreId> {
        self.pointer.resolve_standby()
    }

    /// Directory of a store.
    pub fn store_path(&self, id: StoreId) -> PathBuf {
        self.root.join(id.dir_name())
    }

    /// Handle to a store, opening (or creating) it on first use.
    pub fn open_store(&self, id: StoreId) -> Result<Arc<Store>> {
        let mut handles = self.handles.lock();
        if let Some(store) = handles.get(&id) {
            return Ok(Arc::clone(store));
        }

        let store = Arc::new(Store::open_or_create(StoreConfig {
            path: self.store_path(id),
            create_if_missing: true,
            stats_cache_size: self.stats_cache_size,
        })?);
        handles.insert(id, Arc::clone(&store));
        Ok(store)
    }

    /// Handle to the currently active store.
    pub fn active_store(&self) -> Result<(StoreId, Arc<Store>)> {
        let id = self.resolve_active()?;
        Ok((id, self.open_store(id)?))
    }

    /// Latest analytics of a product from the active store.
    ///
    /// `None` means no cycle has computed it yet; callers fall back to a live
    /// query.
    pub fn get_analytics(&self, asin: &str) -> Result<Option<ProductStats>> {
        let (_, store) = self.active_store()?;
        store.get_stats(asin)
    }

    pub(crate) fn ingest_shared(&self) -> RwLockReadGuard<'_, ()> {
        self.ingest_gate.read()
    }

    pub(crate) fn ingest_exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.ingest_gate.write()
    }

    /// Flush every open store.
    pub fn flush(&self) -> Result<()> {
        let handles: Vec<Arc<Store>> = self.handles.lock().values().cloned().collect();
        for store in handles {
            store.flush()?;
        }
        Ok(())
    }
}
