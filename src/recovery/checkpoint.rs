//! Checkpointing: bound WAL replay and reclaim segments.
//!
//! A checkpoint takes the apply latch (so it never observes a half-applied
//! commit), makes the WAL durable, flushes every dirty page, records the
//! checkpoint position in the manifest, and deletes segments that replay
//! will never need again. Runs at close, on demand, and whenever the live
//! WAL outgrows the configured threshold.

use crate::catalog::Catalog;
use crate::concurrency::timestamp::TimestampOracle;
use crate::error::DbResult;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::manifest::Manifest;
use crate::storage::wal::{Lsn, WalManager, WalPayload};
use crate::transaction::TransactionManager;
use log::{debug, info};
use std::path::PathBuf;
use std::sync::Arc;

pub struct CheckpointManager {
    dir: PathBuf,
    pool: BufferPoolManager,
    wal: Arc<WalManager>,
    catalog: Arc<Catalog>,
    txns: Arc<TransactionManager>,
    oracle: Arc<TimestampOracle>,
    page_size: u32,
    /// Checkpoint when live WAL bytes exceed this.
    wal_threshold: u64,
}

impl CheckpointManager {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dir: PathBuf,
        pool: BufferPoolManager,
        wal: Arc<WalManager>,
        catalog: Arc<Catalog>,
        txns: Arc<TransactionManager>,
        oracle: Arc<TimestampOracle>,
        page_size: u32,
        wal_threshold: u64,
    ) -> Self {
        Self {
            dir,
            pool,
            wal,
            catalog,
            txns,
            oracle,
            page_size,
            wal_threshold,
        }
    }

    /// Runs a full checkpoint and returns its LSN.
    pub fn checkpoint(&self, clean_shutdown: bool) -> DbResult<Lsn> {
        let _latch = self.txns.apply_latch().lock();

        let lsn = self
            .wal
            .append(0, WalPayload::Checkpoint {
                active_txns: self.txns.active_txns(),
            })?;
        self.wal.sync()?;
        self.pool.flush_all()?;

        let mut manifest = Manifest::new(self.page_size, self.catalog.snapshot());
        manifest.last_checkpoint_lsn = lsn;
        manifest.next_txn_id = self.txns.id_floor();
        manifest.next_commit_ts = self.oracle.current().0 + 1;
        manifest.clean_shutdown = clean_shutdown;
        manifest.store(&self.dir)?;

        self.wal.truncate_below(lsn)?;
        info!("checkpoint complete at {}", lsn);
        Ok(lsn)
    }

    /// Checkpoints only when the WAL has outgrown the threshold. Called
    /// after commits; cheap when there is nothing to do.
    pub fn maybe_checkpoint(&self) -> DbResult<Option<Lsn>> {
        let live = self.wal.live_bytes()?;
        if live < self.wal_threshold {
            return Ok(None);
        }
        debug!(
            "wal at {} bytes exceeds threshold {}, checkpointing",
            live, self.wal_threshold
        );
        self.checkpoint(false).map(Some)
    }
}
