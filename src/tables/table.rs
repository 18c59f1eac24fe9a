//! Generic table file.
//!
//! Layout: magic, version, `u64` body length, MessagePack body, CRC32 of the
//! body. Saves go to a temporary file that is renamed over the table file,
//! so a reader of the file never observes a partial write.

use crate::error::{Result, StoreError};
use parking_lot::{RwLock, RwLockReadGuard};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

/// Magic bytes for table files.
const TABLE_MAGIC: &[u8; 4] = b"TBL\0";

/// Current table format version.
const TABLE_VERSION: u8 = 1;

/// File extension of table files.
pub const TABLE_EXTENSION: &str = "tbl";

/// An ordered, persisted key/value table.
pub struct Table<K, V> {
    /// Path to the table file.
    path: PathBuf,

    /// In-memory rows.
    rows: RwLock<BTreeMap<K, V>>,

    /// Set when rows changed since the last save.
    dirty: AtomicBool,
}

impl<K, V> Table<K, V>
where
    K: Ord + Clone + Serialize + DeserializeOwned,
    V: Clone + Serialize + DeserializeOwned,
{
    /// Open a table in `dir`, loading it if its file exists.
    pub fn open(dir: impl AsRef<Path>, name: &'static str) -> Result<Self> {
        let path = dir.as_ref().join(format!("{}.{}", name, TABLE_EXTENSION));

        let rows = if path.exists() {
            Self::read_file(&path)?
        } else {
            BTreeMap::new()
        };

        Ok(Self {
            path,
            rows: RwLock::new(rows),
            dirty: AtomicBool::new(false),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &K) -> Option<V> {
        self.rows.read().get(key).cloned()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.rows.read().contains_key(key)
    }

    /// Insert or replace a row, returning the previous value.
    pub fn insert(&self, key: K, value: V) -> Option<V> {
        self.dirty.store(true, Ordering::Release);
        self.rows.write().insert(key, value)
    }

    pub fn remove(&self, key: &K) -> Option<V> {
        let removed = self.rows.write().remove(key);
        if removed.is_some() {
            self.dirty.store(true, Ordering::Release);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn keys(&self) -> Vec<K> {
        self.rows.read().keys().cloned().collect()
    }

    /// Largest key, used to continue id sequences after a load.
    pub fn last_key(&self) -> Option<K> {
        self.rows.read().keys().next_back().cloned()
    }

    /// Clone every row matching `pred`, in key order.
    pub fn filter(&self, mut pred: impl FnMut(&V) -> bool) -> Vec<V> {
        self.rows.read().values().filter(|v| pred(v)).cloned().collect()
    }

    /// Read access to all rows.
    pub fn read(&self) -> RwLockReadGuard<'_, BTreeMap<K, V>> {
        self.rows.read()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }

    /// Save the table if it changed since the last save or load.
    pub fn save_if_dirty(&self) -> Result<bool> {
        if self.is_dirty() {
            self.save()?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    /// Write the table file atomically.
    pub fn save(&self) -> Result<()> {
        let encoded = {
            let rows = self.rows.read();
            let entries: Vec<(&K, &V)> = rows.iter().collect();
            rmp_serde::to_vec(&entries)?
        };

        let tmp_path = self.path.with_extension(format!("{}.tmp", TABLE_EXTENSION));
        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;

            file.write_all(TABLE_MAGIC)?;
            file.write_all(&[TABLE_VERSION])?;
            file.write_all(&(encoded.len() as u64).to_le_bytes())?;
            file.write_all(&encoded)?;
            file.write_all(&crc32fast::hash(&encoded).to_le_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    /// Replace the in-memory rows with the file contents.
    ///
    /// A missing file reloads as an empty table.
    pub fn reload(&self) -> Result<()> {
        let rows = if self.path.exists() {
            Self::read_file(&self.path)?
        } else {
            BTreeMap::new()
        };
        *self.rows.write() = rows;
        self.dirty.store(false, Ordering::Release);
        Ok(())
    }

    fn read_file(path: &Path) -> Result<BTreeMap<K, V>> {
        let mut file = File::open(path)?;

        let mut magic = [0u8; 4];
        file.read_exact(&mut magic)?;
        if &magic != TABLE_MAGIC {
            return Err(StoreError::InvalidFormat(format!(
                "Invalid table magic in {}",
                path.display()
            )));
        }

        let mut version = [0u8; 1];
        file.read_exact(&mut version)?;
        if version[0] != TABLE_VERSION {
            return Err(StoreError::InvalidFormat(format!(
                "Unsupported table version: {}",
                version[0]
            )));
        }

        let mut len_bytes = [0u8; 8];
        file.read_exact(&mut len_bytes)?;
        let len = u64::from_le_bytes(len_bytes) as usize;

        let mut encoded = vec![0u8; len];
        file.read_exact(&mut encoded)?;

        let mut checksum_bytes = [0u8; 4];
        file.read_exact(&mut checksum_bytes)?;
        let stored_checksum = u32::from_le_bytes(checksum_bytes);
        let computed_checksum = crc32fast::hash(&encoded);
        if stored_checksum != computed_checksum {
            return Err(StoreError::ChecksumMismatch {
                expected: stored_checksum,
                got: computed_checksum,
            });
        }

        let entries: Vec<(K, V)> = rmp_serde::from_slice(&encoded)?;
        Ok(entries.into_iter().collect())
    }
}
