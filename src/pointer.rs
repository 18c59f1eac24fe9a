//! Active pointer: names the store that serves reads and ingestion.
//!
//! The pointer is a one-token file (`A` or `B`) kept outside both stores.
//! Reads are a single file read; writes go to a temporary file that is
//! renamed over the pointer, so a concurrent reader sees the old or the new
//! token and never a partial one.

use crate::error::{Result, StoreError};
use crate::types::StoreId;
use parking_lot::RwLock;
use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// File name of the pointer under the deployment root.
pub const POINTER_FILE: &str = "ACTIVE";

/// Store used when no pointer has been written yet.
pub const DEFAULT_ACTIVE: StoreId = StoreId::A;

pub struct ActivePointer {
    path: PathBuf,

    /// Last value successfully read or written.
    last_known: RwLock<Option<StoreId>>,
}

impl ActivePointer {
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self {
            path: root.as_ref().join(POINTER_FILE),
            last_known: RwLock::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the active store.
    ///
    /// A missing pointer is initialized to [`DEFAULT_ACTIVE`]. When the file
    /// cannot be read or holds an unknown token, the last value this process
    /// observed is returned.
    pub fn resolve_active(&self) -> Result<StoreId> {
        match fs::read_to_string(&self.path) {
            Ok(contents) => match contents.parse::<StoreId>() {
                Ok(id) => {
                    *self.last_known.write() = Some(id);
                    Ok(id)
                }
                Err(token) => match *self.last_known.read() {
                    Some(id) => {
                        warn!(
                            token = %token,
                            store = %id,
                            "active pointer invalid, using last known store"
                        );
                        Ok(id)
                    }
                    None => Err(StoreError::InvalidPointer(token)),
                },
            },
            Err(e) if e.kind() == ErrorKind::NotFound => {
                info!(
                    path = %self.path.display(),
                    store = %DEFAULT_ACTIVE,
                    "initializing active pointer"
                );
                self.set_active(DEFAULT_ACTIVE)?;
                Ok(DEFAULT_ACTIVE)
            }
            Err(e) => match *self.last_known.read() {
                Some(id) => {
                    warn!(
                        error = %e,
                        store = %id,
                        "active pointer unreadable, using last known store"
                    );
                    Ok(id)
                }
                None => Err(StoreError::Pointer(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                ))),
            },
        }
    }

    /// The store that is not active.
    pub fn resolve_standby(&self) -> Result<StoreId> {
        Ok(self.resolve_active()?.complement())
    }

    /// Atomically point readers at `id`.
    pub fn set_active(&self, id: StoreId) -> Result<()> {
        self.write_token(id).map_err(|e| {
            StoreError::Pointer(format!("cannot write {}: {}", self.path.display(), e))
        })?;
        *self.last_known.write() = Some(id);
        Ok(())
    }

    fn write_token(&self, id: StoreId) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }

        let tmp_path = self.path.with_extension("tmp");
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(id.token().as_bytes())?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        // Make the rename itself durable where the platform allows it.
        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }
        Ok(())
    }
}
