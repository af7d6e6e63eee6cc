//! Hash index for exact-match lookups.
//!
//! Maps `(table, row_id)` to the row's physical tuple address. This is the
//! point-lookup path the façade's `get` and every index scan use; it needs
//! no ordering, so a sharded concurrent map beats the B+Tree here. The map
//! is rebuilt from heap scans at open and maintained by the commit-apply
//! path afterwards.

use crate::access::tuple::TupleId;
use crate::catalog::TableId;
use dashmap::DashMap;

#[derive(Default)]
pub struct RowIdIndex {
    map: DashMap<(TableId, u64), TupleId>,
}

impl RowIdIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, table: TableId, row_id: u64, tid: TupleId) {
        self.map.insert((table, row_id), tid);
    }

    pub fn get(&self, table: TableId, row_id: u64) -> Option<TupleId> {
        self.map.get(&(table, row_id)).map(|e| *e.value())
    }

    pub fn remove(&self, table: TableId, row_id: u64) -> Option<TupleId> {
        self.map.remove(&(table, row_id)).map(|(_, tid)| tid)
    }

    /// Drops every entry of a table (DROP TABLE).
    pub fn remove_table(&self, table: TableId) {
        self.map.retain(|(t, _), _| *t != table);
    }

    /// Row ids of one table, unordered.
    pub fn table_rows(&self, table: TableId) -> Vec<u64> {
        self.map
            .iter()
            .filter(|e| e.key().0 == table)
            .map(|e| e.key().1)
            .collect()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn clear(&self) {
        self.map.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::page::PageId;

    #[test]
    fn test_point_operations() {
        let index = RowIdIndex::new();
        let tid = TupleId::new(PageId(3), 7);
        index.insert(TableId(1), 42, tid);

        assert_eq!(index.get(TableId(1), 42), Some(tid));
        assert_eq!(index.get(TableId(1), 43), None);
        assert_eq!(index.get(TableId(2), 42), None);

        assert_eq!(index.remove(TableId(1), 42), Some(tid));
        assert_eq!(index.get(TableId(1), 42), None);
    }

    #[test]
    fn test_remove_table_scopes_to_table() {
        let index = RowIdIndex::new();
        index.insert(TableId(1), 1, TupleId::new(PageId(1), 0));
        index.insert(TableId(1), 2, TupleId::new(PageId(1), 1));
        index.insert(TableId(2), 1, TupleId::new(PageId(2), 0));

        index.remove_table(TableId(1));
        assert!(index.get(TableId(1), 1).is_none());
        assert!(index.get(TableId(2), 1).is_some());
        assert_eq!(index.len(), 1);
    }
}
