//! Snapshot-consistent table scans.
//!
//! A scan merges three sources: the heap (newest committed state), the
//! version overlay (rows whose visible version at this snapshot differs from
//! the heap, including rows deleted after the snapshot), and the scanning
//! transaction's own staged writes. The heap part streams page by page; rows
//! only present in the overlay or the write set are emitted afterwards in
//! row-id order. Dropping the scanner at any step has no side effects.

use crate::access::heap::{HeapIter, TableHeap};
use crate::access::value::{self, Value};
use crate::catalog::TableDef;
use crate::concurrency::timestamp::Timestamp;
use crate::concurrency::version::{VersionManager, Visibility};
use crate::error::DbResult;
use crate::storage::buffer::BufferPoolManager;
use std::collections::{BTreeMap, HashMap, HashSet};

pub struct TableScanner {
    def: TableDef,
    heap: Option<HeapIter>,
    snapshot: Timestamp,
    overlay: HashMap<u64, Visibility>,
    staged: HashMap<u64, Option<Vec<u8>>>,
    seen: HashSet<u64>,
    /// Rows not found during the heap pass, emitted at the end.
    trailing: Option<std::collections::btree_map::IntoIter<u64, Vec<u8>>>,
}

impl TableScanner {
    pub fn new(
        pool: BufferPoolManager,
        def: TableDef,
        versions: &VersionManager,
        snapshot: Timestamp,
        staged: Vec<(u64, Option<Vec<u8>>)>,
    ) -> Self {
        let overlay = versions.table_overlay(def.id, snapshot);
        let heap = def
            .first_page
            .is_valid()
            .then(|| TableHeap::new(pool, def.first_page).iter());
        Self {
            def,
            heap,
            snapshot,
            overlay,
            staged: staged.into_iter().collect(),
            seen: HashSet::new(),
            trailing: None,
        }
    }

    fn decode(&self, bytes: &[u8]) -> DbResult<Vec<Value>> {
        let physical = value::deserialize_values(bytes, &self.def.column_types())?;
        Ok(self.def.to_visible(physical))
    }

    fn start_trailing(&mut self) {
        let mut rest: BTreeMap<u64, Vec<u8>> = BTreeMap::new();
        for (row_id, vis) in self.overlay.drain() {
            if self.seen.contains(&row_id) || self.staged.contains_key(&row_id) {
                continue;
            }
            if let Visibility::Row(bytes) = vis {
                rest.insert(row_id, bytes);
            }
        }
        for (row_id, after) in self.staged.drain() {
            if self.seen.contains(&row_id) {
                continue;
            }
            if let Some(bytes) = after {
                rest.insert(row_id, bytes);
            }
        }
        self.trailing = Some(rest.into_iter());
    }
}

impl Iterator for TableScanner {
    type Item = DbResult<(u64, Vec<Value>)>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(trailing) = &mut self.trailing {
                let (row_id, bytes) = trailing.next()?;
                return Some(self.decode(&bytes).map(|values| (row_id, values)));
            }

            match self.heap.as_mut().and_then(|h| h.next()) {
                Some(Ok((_, image))) => {
                    let row_id = image.row_id;
                    self.seen.insert(row_id);

                    // The transaction's own writes shadow everything.
                    if let Some(after) = self.staged.get(&row_id) {
                        match after {
                            Some(bytes) => {
                                let bytes = bytes.clone();
                                return Some(
                                    self.decode(&bytes).map(|values| (row_id, values)),
                                );
                            }
                            None => continue,
                        }
                    }
                    match self.overlay.get(&row_id) {
                        Some(Visibility::Row(bytes)) => {
                            let bytes = bytes.clone();
                            return Some(self.decode(&bytes).map(|values| (row_id, values)));
                        }
                        Some(Visibility::Deleted) => continue,
                        Some(Visibility::Unknown) | None => {
                            if image.commit_ts <= self.snapshot.0 {
                                return Some(
                                    self.decode(&image.values).map(|values| (row_id, values)),
                                );
                            }
                            continue;
                        }
                    }
                }
                Some(Err(e)) => return Some(Err(e)),
                None => self.start_trailing(),
            }
        }
    }
}
