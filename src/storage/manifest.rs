//! The manifest file: schema, counters and the checkpoint position.
//!
//! A single bincode file updated by write-to-temp + rename, so readers always
//! see either the old or the new manifest and never a torn one. An unreadable
//! manifest makes `open` fail with a corruption error; the engine refuses to
//! guess at schema.

use crate::catalog::CatalogSnapshot;
use crate::error::{DbError, DbResult};
use crate::storage::wal::Lsn;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

pub const MANIFEST_FILE: &str = "MANIFEST";
const MANIFEST_MAGIC: u32 = 0x504C_4D46; // "PLMF"

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    magic: u32,
    /// Page size the data file was created with; immutable afterwards.
    pub page_size: u32,
    /// Replay starts here.
    pub last_checkpoint_lsn: Lsn,
    /// Transaction id counter floor after restart.
    pub next_txn_id: u64,
    /// Commit timestamp counter floor after restart.
    pub next_commit_ts: u64,
    /// Whether the last shutdown ran a final checkpoint.
    pub clean_shutdown: bool,
    pub catalog: CatalogSnapshot,
}

impl Manifest {
    pub fn new(page_size: u32, catalog: CatalogSnapshot) -> Self {
        Manifest {
            magic: MANIFEST_MAGIC,
            page_size,
            last_checkpoint_lsn: Lsn::INVALID,
            next_txn_id: 1,
            next_commit_ts: 1,
            clean_shutdown: true,
            catalog,
        }
    }

    pub fn load(dir: &Path) -> DbResult<Self> {
        let bytes = std::fs::read(Self::path(dir))?;
        let manifest: Manifest = bincode::deserialize(&bytes)
            .map_err(|e| DbError::Corruption(format!("manifest unreadable: {}", e)))?;
        if manifest.magic != MANIFEST_MAGIC {
            return Err(DbError::Corruption("manifest has wrong magic".into()));
        }
        Ok(manifest)
    }

    /// Atomically replaces the manifest on disk.
    pub fn store(&self, dir: &Path) -> DbResult<()> {
        let tmp = dir.join(format!("{}.tmp", MANIFEST_FILE));
        let bytes = bincode::serialize(self)?;
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp, Self::path(dir))?;
        if let Ok(dir_handle) = File::open(dir) {
            let _ = dir_handle.sync_all();
        }
        Ok(())
    }

    pub fn exists(dir: &Path) -> bool {
        Self::path(dir).exists()
    }

    fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_store_and_load() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let mut manifest = Manifest::new(8192, CatalogSnapshot::default());
        manifest.last_checkpoint_lsn = Lsn(17);
        manifest.next_txn_id = 5;
        manifest.store(dir.path())?;

        let loaded = Manifest::load(dir.path())?;
        assert_eq!(loaded.page_size, 8192);
        assert_eq!(loaded.last_checkpoint_lsn, Lsn(17));
        assert_eq!(loaded.next_txn_id, 5);
        assert!(loaded.clean_shutdown);
        Ok(())
    }

    #[test]
    fn test_missing_manifest() {
        let dir = tempdir().unwrap();
        assert!(!Manifest::exists(dir.path()));
        assert!(matches!(Manifest::load(dir.path()), Err(DbError::Io(_))));
    }

    #[test]
    fn test_corrupt_manifest_detected() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(MANIFEST_FILE), b"not a manifest").unwrap();
        assert!(matches!(
            Manifest::load(dir.path()),
            Err(DbError::Corruption(_))
        ));
    }

    #[test]
    fn test_store_overwrites_atomically() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let m1 = Manifest::new(4096, CatalogSnapshot::default());
        m1.store(dir.path())?;
        let mut m2 = Manifest::new(4096, CatalogSnapshot::default());
        m2.next_commit_ts = 99;
        m2.store(dir.path())?;
        assert_eq!(Manifest::load(dir.path())?.next_commit_ts, 99);
        Ok(())
    }
}
