//! Snapshot sync: full physical copy of one store into the other.

use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::types::Hash;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use tracing::debug;

/// One copied table file.
#[derive(Clone, Debug)]
pub struct TableCopy {
    pub file_name: String,
    pub bytes: u64,
    pub digest: Hash,
}

/// Outcome of a sync.
#[derive(Clone, Debug, Default)]
pub struct SyncReport {
    pub tables: Vec<TableCopy>,
}

impl SyncReport {
    pub fn total_bytes(&self) -> u64 {
        self.tables.iter().map(|t| t.bytes).sum()
    }
}

/// Copies the full contents of one store over another.
///
/// Implementations must overwrite the target completely; a sync is never a
/// merge. They must also arm the source's catch-up journal at the snapshot
/// point, so writes after it can be carried over before the flip.
pub trait SnapshotSync: Send + Sync {
    fn sync(&self, from: &Store, to: &Store) -> Result<SyncReport>;
}

/// Sync by flushing the source and copying its table files.
///
/// The source's writers are blocked for the duration of the copy, so the
/// target receives a point-in-time snapshot. Every copy is verified against
/// the SHA-256 of the source bytes before the target reloads.
#[derive(Clone, Copy, Debug, Default)]
pub struct FileCopySync;

impl SnapshotSync for FileCopySync {
    fn sync(&self, from: &Store, to: &Store) -> Result<SyncReport> {
        if from.path() == to.path() {
            return Err(StoreError::InvalidOperation(format!(
                "cannot sync {} onto itself",
                from.path().display()
            )));
        }

        let _source_guard = from.write_guard();
        let _target_guard = to.write_guard();

        from.save_tables()?;
        from.arm_journal();

        let mut report = SyncReport::default();
        for source in from.table_paths() {
            let file_name = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .ok_or_else(|| {
                    StoreError::InvalidFormat(format!("bad table path {}", source.display()))
                })?;

            let bytes = fs::read(&source)?;
            let digest = Hash::from_bytes(&bytes);
            let target = to.path().join(&file_name);
            copy_verified(&bytes, digest, &target)?;

            debug!(table = %file_name, bytes = bytes.len(), digest = %digest, "copied table");
            report.tables.push(TableCopy {
                file_name,
                bytes: bytes.len() as u64,
                digest,
            });
        }

        to.reload_tables()?;
        Ok(report)
    }
}

fn copy_verified(bytes: &[u8], digest: Hash, target: &Path) -> Result<()> {
    let tmp_path = target.with_extension("sync");
    {
        let mut file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp_path, target)?;

    let written = Hash::from_bytes(&fs::read(target)?);
    if written != digest {
        return Err(StoreError::HashMismatch {
            expected: digest,
            got: written,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::StoreConfig;
    use crate::types::{Product, ReviewInput, Sentiment, TagInput};
    use tempfile::TempDir;

    fn open(dir: &TempDir, name: &str) -> Store {
        Store::create(StoreConfig {
            path: dir.path().join(name),
            create_if_missing: true,
            stats_cache_size: 8,
        })
        .unwrap()
    }

    #[test]
    fn test_sync_overwrites_target() {
        let dir = TempDir::new().unwrap();
        let source = open(&dir, "a");
        let target = open(&dir, "b");

        source.upsert_product(Product::anchor("P1")).unwrap();
        let review = source.insert_review(ReviewInput::new("P1", 5.0)).unwrap();
        source
            .insert_tag(review.id, TagInput::new("Fit", Sentiment::Positive))
            .unwrap();

        // Stale rows in the target must disappear.
        target.upsert_product(Product::anchor("STALE")).unwrap();
        target.flush().unwrap();

        let report = FileCopySync.sync(&source, &target).unwrap();
        assert_eq!(report.tables.len(), 5);
        assert!(report.total_bytes() > 0);

        assert_eq!(target.counts(), source.counts());
        assert!(target.get_product("STALE").is_none());
        assert!(target.get_product("P1").is_some());
    }

    #[test]
    fn test_sync_copies_are_identical() {
        let dir = TempDir::new().unwrap();
        let source = open(&dir, "a");
        let target = open(&dir, "b");
        source.upsert_product(Product::anchor("P1")).unwrap();

        let report = FileCopySync.sync(&source, &target).unwrap();
        for copy in &report.tables {
            let bytes = fs::read(target.path().join(&copy.file_name)).unwrap();
            assert_eq!(Hash::from_bytes(&bytes), copy.digest);
        }
    }

    #[test]
    fn test_sync_arms_source_journal() {
        let dir = TempDir::new().unwrap();
        let source = open(&dir, "a");
        let target = open(&dir, "b");
        source.upsert_product(Product::anchor("P1")).unwrap();

        FileCopySync.sync(&source, &target).unwrap();
        source.insert_review(ReviewInput::new("P1", 2.0)).unwrap();

        let late = source.take_journal();
        assert_eq!(late.len(), 1);
        assert_eq!(target.counts().reviews, 0);

        target.replay(&late).unwrap();
        assert_eq!(target.counts().reviews, 1);
    }

    #[test]
    fn test_target_continues_id_sequence() {
        let dir = TempDir::new().unwrap();
        let source = open(&dir, "a");
        let target = open(&dir, "b");
        source.upsert_product(Product::anchor("P1")).unwrap();
        source.insert_review(ReviewInput::new("P1", 4.0)).unwrap();
        source.insert_review(ReviewInput::new("P1", 2.0)).unwrap();

        FileCopySync.sync(&source, &target).unwrap();
        let next = target.insert_review(ReviewInput::new("P1", 3.0)).unwrap();
        assert_eq!(next.id.0, 3);
    }
}
