//! Index range scan with snapshot visibility.
//!
//! The B+Tree holds the newest committed state, so each candidate row id is
//! re-read through the transaction's snapshot and the full predicate is
//! re-checked (the index only narrows). Two supplements keep the scan
//! snapshot-correct: the transaction's own staged rows are probed against
//! the bounds, and so are rows in the version overlay whose visible version
//! differs from what the index points at.

use crate::access::value::{self, Value};
use crate::access::BTree;
use crate::catalog::{IndexDef, TableDef};
use crate::error::{DbError, DbResult};
use crate::executor::{scan_schema, ColumnInfo, ExecutionContext, Executor};
use crate::expression::eval::{evaluate, truthy};
use crate::sql::ast::Expression;
use crate::transaction::apply::index_key;
use std::collections::HashSet;

pub struct IndexScanExecutor {
    table: String,
    qualifier: Option<String>,
    index: String,
    lo: Option<Vec<u8>>,
    hi: Option<Vec<u8>>,
    residual: Expression,
    ctx: ExecutionContext,
    schema: Vec<ColumnInfo>,
    state: Option<ScanState>,
}

struct ScanState {
    def: TableDef,
    index_def: IndexDef,
    tree_hits: std::vec::IntoIter<u64>,
    extra: std::vec::IntoIter<Vec<Value>>,
    emitted: HashSet<u64>,
    staged_deleted: HashSet<u64>,
}

impl IndexScanExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        table: String,
        qualifier: Option<String>,
        index: String,
        lo: Option<Vec<u8>>,
        hi: Option<Vec<u8>>,
        residual: Expression,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            table,
            qualifier,
            index,
            lo,
            hi,
            residual,
            ctx,
            schema: Vec::new(),
            state: None,
        }
    }

}

fn in_bounds(lo: &Option<Vec<u8>>, hi: &Option<Vec<u8>>, key: &[u8]) -> bool {
    if let Some(lo) = lo {
        if key < lo.as_slice() {
            return false;
        }
    }
    if let Some(hi) = hi {
        if key > hi.as_slice() {
            return false;
        }
    }
    true
}

impl Executor for IndexScanExecutor {
    fn init(&mut self) -> DbResult<()> {
        let def = self.ctx.catalog.require_table(&self.table)?;
        self.schema = scan_schema(&def, &self.qualifier);
        let index_def = def
            .indexes
            .iter()
            .find(|i| i.name == self.index)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("index '{}' does not exist", self.index)))?;

        // Committed candidates from the tree, in key order.
        let tree = BTree::new(self.ctx.pool.clone(), index_def.root);
        let mut tree_hits = Vec::new();
        for entry in tree.range(self.lo.as_deref(), self.hi.as_deref())? {
            let (_, row_id) = entry?;
            tree_hits.push(row_id);
        }

        let staged = self.ctx.txns.staged_rows(self.ctx.txn, def.id);
        let mut staged_deleted = HashSet::new();
        let mut extra_rows = Vec::new();
        for (row_id, after) in &staged {
            match after {
                None => {
                    staged_deleted.insert(*row_id);
                }
                Some(bytes) => {
                    // Staged rows are invisible to the tree; probe them
                    // against the same bounds.
                    staged_deleted.insert(*row_id); // shadow any tree hit
                    let physical = value::deserialize_values(bytes, &def.column_types())?;
                    if let Some(key) = index_key(
                        &def,
                        index_def.unique,
                        &index_def.columns,
                        &physical,
                        *row_id,
                    )? {
                        if in_bounds(&self.lo, &self.hi, &key) {
                            extra_rows.push(def.to_visible(physical));
                        }
                    }
                }
            }
        }

        // Overlay rows whose visible version differs from the indexed one.
        let snapshot = self.ctx.txns.snapshot_of(self.ctx.txn)?;
        let tree_set: HashSet<u64> = tree_hits.iter().copied().collect();
        for (row_id, vis) in self.ctx.versions.table_overlay(def.id, snapshot) {
            if tree_set.contains(&row_id) || staged.iter().any(|(r, _)| *r == row_id) {
                continue;
            }
            if let crate::concurrency::version::Visibility::Row(bytes) = vis {
                let physical = value::deserialize_values(&bytes, &def.column_types())?;
                if let Some(key) = index_key(
                    &def,
                    index_def.unique,
                    &index_def.columns,
                    &physical,
                    row_id,
                )? {
                    if in_bounds(&self.lo, &self.hi, &key) {
                        extra_rows.push(def.to_visible(physical));
                    }
                }
            }
        }

        self.state = Some(ScanState {
            def,
            index_def,
            tree_hits: tree_hits.into_iter(),
            extra: extra_rows.into_iter(),
            emitted: HashSet::new(),
            staged_deleted,
        });
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Vec<Value>>> {
        loop {
            let state = self
                .state
                .as_mut()
                .ok_or_else(|| DbError::InvalidArgument("executor not initialized".into()))?;

            if let Some(row_id) = state.tree_hits.next() {
                if state.staged_deleted.contains(&row_id) || !state.emitted.insert(row_id) {
                    continue;
                }
                let Some(bytes) = self.ctx.txns.read(self.ctx.txn, state.def.id, row_id)? else {
                    continue;
                };
                let physical = value::deserialize_values(&bytes, &state.def.column_types())?;
                // The visible version may differ from the indexed one; make
                // sure it still falls inside the probe.
                let still_inside = match index_key(
                    &state.def,
                    state.index_def.unique,
                    &state.index_def.columns,
                    &physical,
                    row_id,
                )? {
                    Some(key) => in_bounds(&self.lo, &self.hi, &key),
                    None => false,
                };
                if !still_inside {
                    continue;
                }
                let values = state.def.to_visible(physical);
                if truthy(&evaluate(&self.residual, &values, &self.schema)?)? {
                    return Ok(Some(values));
                }
                continue;
            }

            let Some(values) = state.extra.next() else {
                return Ok(None);
            };
            if truthy(&evaluate(&self.residual, &values, &self.schema)?)? {
                return Ok(Some(values));
            }
        }
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.schema
    }
}
