//! Transaction manager: snapshots, buffered writes, commit validation.
//!
//! Writes never touch pages while a transaction is active; they accumulate
//! in the transaction's write set. Commit validates first-committer-wins
//! against the version store, journals Begin + Put/Delete + Commit, makes
//! the log durable, and only then applies the writes to heap and indexes
//! and publishes the new versions. Rollback just discards the write set.
//!
//! Commits are serialized by the apply latch (the WAL is single-writer
//! anyway); reads never take it.

use crate::catalog::TableId;
use crate::concurrency::timestamp::{Timestamp, TimestampOracle};
use crate::concurrency::version::{VersionKey, VersionManager, Visibility};
use crate::error::{DbError, DbResult};
use crate::storage::wal::{WalManager, WalPayload};
use crate::transaction::apply::ApplyContext;
use crate::transaction::id::{TxnId, TxnIdGenerator};
use crate::transaction::state::TransactionState;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct RowOp {
    /// Heap state when the transaction first touched the key, seeding the
    /// version chain at commit and serving as the WAL before-image.
    base_ts: u64,
    before: Option<Vec<u8>>,
    /// New values; `None` deletes the row.
    after: Option<Vec<u8>>,
}

struct Txn {
    snapshot: Timestamp,
    state: TransactionState,
    writes: BTreeMap<VersionKey, RowOp>,
}

pub struct TransactionManager {
    oracle: Arc<TimestampOracle>,
    versions: Arc<VersionManager>,
    wal: Arc<WalManager>,
    apply: ApplyContext,
    ids: TxnIdGenerator,
    txns: RwLock<HashMap<TxnId, Txn>>,
    /// Serializes commit application and checkpointing.
    apply_lock: Mutex<()>,
}

impl TransactionManager {
    pub fn new(
        oracle: Arc<TimestampOracle>,
        versions: Arc<VersionManager>,
        wal: Arc<WalManager>,
        apply: ApplyContext,
        first_txn_id: u64,
    ) -> Self {
        Self {
            oracle,
            versions,
            wal,
            apply,
            ids: TxnIdGenerator::new(first_txn_id),
            txns: RwLock::new(HashMap::new()),
            apply_lock: Mutex::new(()),
        }
    }

    pub fn begin(&self) -> TxnId {
        let id = self.ids.next();
        let snapshot = self.oracle.next();
        self.txns.write().insert(
            id,
            Txn {
                snapshot,
                state: TransactionState::Active,
                writes: BTreeMap::new(),
            },
        );
        id
    }

    pub fn snapshot_of(&self, txn: TxnId) -> DbResult<Timestamp> {
        self.with_txn(txn, |t| Ok(t.snapshot))
    }

    pub fn state_of(&self, txn: TxnId) -> Option<TransactionState> {
        self.txns.read().get(&txn).map(|t| t.state)
    }

    /// Snapshot read of one row: own writes, then the version store, then
    /// the heap. Returns the serialized values.
    pub fn read(&self, txn: TxnId, table: TableId, row_id: u64) -> DbResult<Option<Vec<u8>>> {
        let key = (table, row_id);
        let snapshot = {
            let txns = self.txns.read();
            let t = txns
                .get(&txn)
                .ok_or_else(|| DbError::NotFound(format!("{} not found", txn)))?;
            if t.state != TransactionState::Active {
                return Err(DbError::TransactionConflict(format!(
                    "{} is {}",
                    txn, t.state
                )));
            }
            if let Some(op) = t.writes.get(&key) {
                return Ok(op.after.clone());
            }
            t.snapshot
        };

        match self.versions.visible(&key, snapshot) {
            Visibility::Row(bytes) => Ok(Some(bytes)),
            Visibility::Deleted => Ok(None),
            Visibility::Unknown => match self.apply.read_committed(table, row_id)? {
                Some((commit_ts, bytes)) if commit_ts <= snapshot.0 => Ok(Some(bytes)),
                _ => Ok(None),
            },
        }
    }

    /// Stages an insert or update. The first touch of a key captures the
    /// committed heap state as its base.
    pub fn stage_put(
        &self,
        txn: TxnId,
        table: TableId,
        row_id: u64,
        values: Vec<u8>,
    ) -> DbResult<()> {
        let base = self.base_for(txn, table, row_id)?;
        self.with_txn_mut(txn, |t| {
            t.writes
                .entry((table, row_id))
                .or_insert(base)
                .after = Some(values);
            Ok(())
        })
    }

    pub fn stage_delete(&self, txn: TxnId, table: TableId, row_id: u64) -> DbResult<()> {
        let base = self.base_for(txn, table, row_id)?;
        self.with_txn_mut(txn, |t| {
            t.writes.entry((table, row_id)).or_insert(base).after = None;
            Ok(())
        })
    }

    /// Staged rows of one table, for in-transaction uniqueness checks and
    /// scans: (row_id, after-image).
    pub fn staged_rows(&self, txn: TxnId, table: TableId) -> Vec<(u64, Option<Vec<u8>>)> {
        self.txns
            .read()
            .get(&txn)
            .map(|t| {
                t.writes
                    .iter()
                    .filter(|((tid, _), _)| *tid == table)
                    .map(|((_, row_id), op)| (*row_id, op.after.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Validates and commits. First-committer-wins: any write-set key with a
    /// commit newer than this transaction's snapshot aborts it with a
    /// retryable conflict.
    pub fn commit(&self, txn: TxnId) -> DbResult<Timestamp> {
        let _latch = self.apply_lock.lock();

        let (snapshot, writes) = {
            let mut txns = self.txns.write();
            let t = txns
                .get_mut(&txn)
                .ok_or_else(|| DbError::NotFound(format!("{} not found", txn)))?;
            if t.state != TransactionState::Active {
                return Err(DbError::TransactionConflict(format!(
                    "{} is already {}",
                    txn, t.state
                )));
            }
            (t.snapshot, std::mem::take(&mut t.writes))
        };

        if writes.is_empty() {
            self.set_state(txn, TransactionState::Committed);
            return Ok(snapshot);
        }

        for (key, op) in &writes {
            let conflicted = match self.versions.latest_commit_ts(key) {
                Some(ts) => ts > snapshot,
                None => Timestamp(op.base_ts) > snapshot,
            };
            if conflicted {
                self.set_state(txn, TransactionState::Aborted);
                return Err(DbError::TransactionConflict(format!(
                    "row {} in table {} was modified by a later commit; retry",
                    key.1, key.0 .0
                )));
            }
        }

        let commit_ts = self.oracle.next();
        match self.journal_and_apply(txn, commit_ts, &writes) {
            Ok(()) => {}
            Err(e) => {
                // A failed WAL append (disk full) aborts the transaction;
                // nothing was applied before the commit record was durable.
                self.set_state(txn, TransactionState::Aborted);
                return Err(e);
            }
        }

        for ((table, row_id), op) in writes {
            let base = (Timestamp(op.base_ts), op.before);
            self.versions
                .publish((table, row_id), Some(base), commit_ts, op.after);
        }

        self.set_state(txn, TransactionState::Committed);
        Ok(commit_ts)
    }

    fn journal_and_apply(
        &self,
        txn: TxnId,
        commit_ts: Timestamp,
        writes: &BTreeMap<VersionKey, RowOp>,
    ) -> DbResult<()> {
        // Write-ahead: journal everything, make it durable, then touch pages.
        self.wal.append(txn.0, WalPayload::Begin)?;
        for ((table, row_id), op) in writes {
            let payload = match &op.after {
                Some(after) => WalPayload::Put {
                    table: *table,
                    row_id: *row_id,
                    before: op.before.clone(),
                    after: after.clone(),
                },
                None => WalPayload::Delete {
                    table: *table,
                    row_id: *row_id,
                    before: op.before.clone().unwrap_or_default(),
                },
            };
            self.wal.append(txn.0, payload)?;
        }
        let commit_lsn = self.wal.append_commit(txn.0, commit_ts.0)?;

        for ((table, row_id), op) in writes {
            match &op.after {
                Some(after) => {
                    self.apply
                        .apply_put(*table, *row_id, after, commit_ts.0, commit_lsn)?
                }
                None => self.apply.apply_delete(*table, *row_id, commit_lsn)?,
            }
        }
        Ok(())
    }

    /// Discards all buffered writes; nothing reached storage.
    pub fn rollback(&self, txn: TxnId) -> DbResult<()> {
        let had_writes = self.with_txn_mut(txn, |t| {
            let had = !t.writes.is_empty();
            t.writes.clear();
            t.state = TransactionState::Aborted;
            Ok(had)
        })?;
        if had_writes {
            // Journal breadcrumb only; there is nothing to undo.
            self.wal.append(txn.0, WalPayload::Abort)?;
        }
        Ok(())
    }

    pub fn active_txns(&self) -> Vec<u64> {
        self.txns
            .read()
            .iter()
            .filter(|(_, t)| t.state == TransactionState::Active)
            .map(|(id, _)| id.0)
            .collect()
    }

    pub fn oldest_active_snapshot(&self) -> Option<Timestamp> {
        self.txns
            .read()
            .values()
            .filter(|t| t.state == TransactionState::Active)
            .map(|t| t.snapshot)
            .min()
    }

    /// Version GC plus cleanup of finished transaction records.
    pub fn garbage_collect(&self) {
        let horizon = self
            .oldest_active_snapshot()
            .unwrap_or_else(|| self.oracle.current());
        self.versions.gc(horizon);
        self.txns
            .write()
            .retain(|_, t| t.state == TransactionState::Active);
    }

    /// The apply latch, shared with checkpointing so a checkpoint never
    /// observes a half-applied commit.
    pub fn apply_latch(&self) -> &Mutex<()> {
        &self.apply_lock
    }

    pub fn id_floor(&self) -> u64 {
        self.ids.current_floor()
    }

    fn base_for(&self, txn: TxnId, table: TableId, row_id: u64) -> DbResult<RowOp> {
        // Only consulted on first touch; the committed heap state is the
        // base regardless of our snapshot (conflict validation decides
        // whether we were allowed to build on it).
        let _ = self.snapshot_of(txn)?;
        let (base_ts, before) = match self.apply.read_committed(table, row_id)? {
            Some((ts, bytes)) => (ts, Some(bytes)),
            None => (0, None),
        };
        Ok(RowOp {
            base_ts,
            before,
            after: None,
        })
    }

    fn set_state(&self, txn: TxnId, state: TransactionState) {
        if let Some(t) = self.txns.write().get_mut(&txn) {
            t.state = state;
        }
    }

    fn with_txn<R>(&self, txn: TxnId, f: impl FnOnce(&Txn) -> DbResult<R>) -> DbResult<R> {
        let txns = self.txns.read();
        let t = txns
            .get(&txn)
            .ok_or_else(|| DbError::NotFound(format!("{} not found", txn)))?;
        f(t)
    }

    fn with_txn_mut<R>(&self, txn: TxnId, f: impl FnOnce(&mut Txn) -> DbResult<R>) -> DbResult<R> {
        let mut txns = self.txns.write();
        let t = txns
            .get_mut(&txn)
            .ok_or_else(|| DbError::NotFound(format!("{} not found", txn)))?;
        if t.state != TransactionState::Active {
            return Err(DbError::TransactionConflict(format!(
                "{} is already {}",
                txn, t.state
            )));
        }
        f(t)
    }
}
