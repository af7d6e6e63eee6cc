//! WAL replay, run once inside `Database::open`.
//!
//! The log is redo-only (pages never hold uncommitted data), so recovery is
//! two passes over the records after the last checkpoint: collect the
//! transactions whose Commit record made it to disk, then re-apply their
//! Put/Delete records in LSN order through the normal storage-apply path.
//! Those upserts are idempotent, which makes it safe that some of the pages
//! were already flushed by eviction before the crash.
//!
//! B+Tree roots recorded in the manifest can trail eviction-flushed index
//! pages, so whenever replay had committed work to redo, every index is
//! rebuilt from its heap rather than trusted. The runtime row-id hash index
//! is rebuilt on every open.
//!
//! A checksum failure on a page while re-applying is unrecoverable here
//! (the WAL already was our second copy) and fails the open.

use crate::access::value;
use crate::access::{BTree, TableHeap};
use crate::error::DbResult;
use crate::storage::page::PageId;
use crate::storage::wal::{Lsn, WalManager, WalPayload};
use crate::transaction::apply::{index_key, ApplyContext};
use log::{info, warn};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct RecoveryReport {
    /// Committed row operations re-applied.
    pub replayed: usize,
    /// Operations discarded because their transaction never committed.
    pub discarded: usize,
    pub max_lsn: Lsn,
    pub max_commit_ts: u64,
    pub max_txn_id: u64,
}

/// Replays the WAL from `from` and rebuilds derived state. Returns the
/// counter floors the caller feeds back into the oracle and id generators.
pub fn recover(apply: &ApplyContext, wal: &WalManager, from: Lsn) -> DbResult<RecoveryReport> {
    let mut report = RecoveryReport::default();

    // The row-id hash index is in-memory and always rebuilt; replay needs it
    // for its upserts anyway.
    let heap_max_ts = rebuild_rowid_index(apply)?;
    report.max_commit_ts = heap_max_ts;

    let records = wal.read_records(from)?;
    for record in &records {
        report.max_lsn = report.max_lsn.max(record.lsn);
        report.max_txn_id = report.max_txn_id.max(record.txn_id);
    }

    // Pass 1: which transactions actually committed, and when.
    let mut committed: HashMap<u64, u64> = HashMap::new();
    for record in &records {
        if let WalPayload::Commit { commit_ts } = &record.payload {
            committed.insert(record.txn_id, *commit_ts);
            report.max_commit_ts = report.max_commit_ts.max(*commit_ts);
        }
    }

    // Pass 2: redo committed changes in LSN order.
    for record in &records {
        match &record.payload {
            WalPayload::Put {
                table,
                row_id,
                after,
                ..
            } => match committed.get(&record.txn_id) {
                Some(commit_ts) => {
                    apply.apply_put(*table, *row_id, after, *commit_ts, record.lsn)?;
                    report.replayed += 1;
                }
                None => report.discarded += 1,
            },
            WalPayload::Delete { table, row_id, .. } => match committed.get(&record.txn_id) {
                Some(_) => {
                    apply.apply_delete(*table, *row_id, record.lsn)?;
                    report.replayed += 1;
                }
                None => report.discarded += 1,
            },
            WalPayload::Begin
            | WalPayload::Commit { .. }
            | WalPayload::Abort
            | WalPayload::Checkpoint { .. } => {}
        }
    }

    if report.replayed > 0 {
        // Replay may have raced manifest roots against eviction-flushed
        // index pages; rebuilding from the heap settles it.
        rebuild_indexes(apply, report.max_lsn)?;
        // Row ids moved during replay: refresh the hash index too.
        let ts = rebuild_rowid_index(apply)?;
        report.max_commit_ts = report.max_commit_ts.max(ts);
        info!(
            "recovery replayed {} operations ({} discarded) up to {}",
            report.replayed, report.discarded, report.max_lsn
        );
    }

    Ok(report)
}

/// Scans every table heap, filling the row-id hash index and bumping each
/// table's row-id counter past what is stored. Returns the largest commit
/// timestamp seen.
fn rebuild_rowid_index(apply: &ApplyContext) -> DbResult<u64> {
    apply.rowids.clear();
    let mut max_ts = 0;
    for def in apply.catalog.all_tables() {
        if !def.first_page.is_valid() {
            continue;
        }
        let heap = TableHeap::new(apply.pool.clone(), def.first_page);
        let mut max_row_id = 0;
        for item in heap.iter() {
            let (tid, image) = item?;
            apply.rowids.insert(def.id, image.row_id, tid);
            max_row_id = max_row_id.max(image.row_id);
            max_ts = max_ts.max(image.commit_ts);
        }
        apply.catalog.bump_next_row_id(def.id, max_row_id);
    }
    Ok(max_ts)
}

/// Discards every B+Tree and rebuilds it from its table's heap.
fn rebuild_indexes(apply: &ApplyContext, lsn: Lsn) -> DbResult<()> {
    for def in apply.catalog.all_tables() {
        for index in &def.indexes {
            let mut tree = BTree::new(apply.pool.clone(), index.root);
            if tree.destroy().is_err() {
                // The stale tree can reference pages reused since the
                // checkpoint; abandon what is left of it.
                warn!(
                    "index '{}' had an unwalkable tree after crash; rebuilding fresh",
                    index.name
                );
                tree = BTree::new(apply.pool.clone(), PageId::INVALID);
            }

            if def.first_page.is_valid() {
                let heap = TableHeap::new(apply.pool.clone(), def.first_page);
                for item in heap.iter() {
                    let (_, image) = item?;
                    let values =
                        value::deserialize_values(&image.values, &def.column_types())?;
                    if let Some(key) =
                        index_key(&def, index.unique, &index.columns, &values, image.row_id)?
                    {
                        tree.insert(&key, image.row_id, lsn)?;
                    }
                }
            }
            apply.catalog.set_index_root(def.id, &index.name, tree.root());
        }
    }
    Ok(())
}
