//! The storage-apply path: the one place committed row changes become page
//! and index mutations.
//!
//! Both commit (after its WAL records are durable) and recovery replay go
//! through these functions, so a re-applied WAL record produces exactly the
//! state the original commit did. Upsert semantics make replay idempotent:
//! a Put over an existing row id replaces it, a Delete of a missing row is
//! a no-op.

use crate::access::hash::RowIdIndex;
use crate::access::tuple::RowImage;
use crate::access::value::{self, Value};
use crate::access::{BTree, TableHeap};
use crate::catalog::{Catalog, TableDef, TableId};
use crate::error::{DbError, DbResult};
use crate::storage::buffer::BufferPoolManager;
use crate::storage::wal::Lsn;
use std::sync::Arc;

#[derive(Clone)]
pub struct ApplyContext {
    pub pool: BufferPoolManager,
    pub catalog: Arc<Catalog>,
    pub rowids: Arc<RowIdIndex>,
}

impl ApplyContext {
    pub fn new(pool: BufferPoolManager, catalog: Arc<Catalog>, rowids: Arc<RowIdIndex>) -> Self {
        Self {
            pool,
            catalog,
            rowids,
        }
    }

    /// Inserts or replaces a row and keeps every index in step.
    pub fn apply_put(
        &self,
        table: TableId,
        row_id: u64,
        values_bytes: &[u8],
        commit_ts: u64,
        lsn: Lsn,
    ) -> DbResult<()> {
        let def = self.require_table(table)?;
        let mut heap = TableHeap::new(self.pool.clone(), def.first_page);

        // Replace: drop the old tuple and its index entries first.
        let old_values = match self.rowids.get(table, row_id) {
            Some(tid) => {
                let old = heap.get(tid)?;
                heap.delete(tid, lsn)?;
                match old {
                    Some(bytes) => {
                        let image = RowImage::decode(&bytes)?;
                        Some(value::deserialize_values(
                            &image.values,
                            &def.column_types(),
                        )?)
                    }
                    None => None,
                }
            }
            None => None,
        };

        let frame = RowImage::encode(row_id, commit_ts, values_bytes);
        let tid = heap.insert(&frame, lsn)?;
        if heap.first_page() != def.first_page {
            self.catalog.set_first_page(table, heap.first_page());
        }
        self.rowids.insert(table, row_id, tid);

        let new_values = value::deserialize_values(values_bytes, &def.column_types())?;
        self.update_indexes(&def, row_id, old_values.as_deref(), Some(&new_values), lsn)
    }

    /// Removes a row and its index entries. Missing rows are a no-op so
    /// replay can re-run deletes.
    pub fn apply_delete(&self, table: TableId, row_id: u64, lsn: Lsn) -> DbResult<()> {
        let def = self.require_table(table)?;
        let Some(tid) = self.rowids.remove(table, row_id) else {
            return Ok(());
        };
        let mut heap = TableHeap::new(self.pool.clone(), def.first_page);
        let old_values = match heap.get(tid)? {
            Some(bytes) => {
                let image = RowImage::decode(&bytes)?;
                Some(value::deserialize_values(
                    &image.values,
                    &def.column_types(),
                )?)
            }
            None => None,
        };
        heap.delete(tid, lsn)?;
        self.update_indexes(&def, row_id, old_values.as_deref(), None, lsn)
    }

    /// Reads the committed heap row, returning (commit_ts, values bytes).
    pub fn read_committed(
        &self,
        table: TableId,
        row_id: u64,
    ) -> DbResult<Option<(u64, Vec<u8>)>> {
        let def = self.require_table(table)?;
        let Some(tid) = self.rowids.get(table, row_id) else {
            return Ok(None);
        };
        let heap = TableHeap::new(self.pool.clone(), def.first_page);
        match heap.get(tid)? {
            Some(bytes) => {
                let image = RowImage::decode(&bytes)?;
                Ok(Some((image.commit_ts, image.values)))
            }
            None => Ok(None),
        }
    }

    fn update_indexes(
        &self,
        def: &TableDef,
        row_id: u64,
        old_values: Option<&[Value]>,
        new_values: Option<&[Value]>,
        lsn: Lsn,
    ) -> DbResult<()> {
        for index in &def.indexes {
            let mut tree = BTree::new(self.pool.clone(), index.root);
            if let Some(old) = old_values {
                if let Some(key) = index_key(def, index.unique, &index.columns, old, row_id)? {
                    tree.delete(&key, lsn)?;
                }
            }
            if let Some(new) = new_values {
                if let Some(key) = index_key(def, index.unique, &index.columns, new, row_id)? {
                    tree.insert(&key, row_id, lsn)?;
                }
            }
            if tree.root() != index.root {
                self.catalog.set_index_root(def.id, &index.name, tree.root());
            }
        }
        Ok(())
    }

    fn require_table(&self, table: TableId) -> DbResult<TableDef> {
        self.catalog
            .get_table_by_id(table)
            .ok_or_else(|| DbError::NotFound(format!("table id {} unknown", table.0)))
    }
}

/// Builds the B+Tree key for one index entry. Rows with a NULL in any
/// indexed column are not indexed; a non-unique key gets the row id appended
/// to keep keys distinct at the tree layer.
pub fn index_key(
    def: &TableDef,
    unique: bool,
    columns: &[String],
    values: &[Value],
    row_id: u64,
) -> DbResult<Option<Vec<u8>>> {
    let mut parts = Vec::with_capacity(columns.len());
    for col in columns {
        let idx = def.column_index(col).ok_or_else(|| {
            DbError::Corruption(format!("index references missing column '{}'", col))
        })?;
        let v = &values[idx];
        if v.is_null() {
            return Ok(None);
        }
        parts.push(v.clone());
    }
    let mut key = value::encode_key(&parts)?;
    if !unique {
        key.extend_from_slice(&row_id.to_be_bytes());
    }
    Ok(Some(key))
}

/// Equality-probe bounds for an index: unique indexes probe the exact key,
/// non-unique ones scan the row-id-suffixed range under the prefix.
pub fn index_probe_bounds(unique: bool, prefix: Vec<u8>) -> (Vec<u8>, Vec<u8>) {
    if unique {
        (prefix.clone(), prefix)
    } else {
        let mut hi = prefix.clone();
        hi.extend_from_slice(&u64::MAX.to_be_bytes());
        (prefix, hi)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::access::value::DataType;
    use crate::catalog::ColumnDef;
    use crate::storage::buffer::lru::LruReplacer;
    use crate::storage::wal::{WalConfig, WalManager};
    use crate::storage::PageStore;
    use tempfile::tempdir;

    fn test_ctx(dir: &tempfile::TempDir) -> ApplyContext {
        let store = PageStore::create(&dir.path().join("data.pdb"), 4096).unwrap();
        let wal = Arc::new(
            WalManager::open(WalConfig {
                dir: dir.path().join("wal"),
                sync_on_commit: false,
                ..Default::default()
            })
            .unwrap(),
        );
        let pool = BufferPoolManager::new(store, wal, Box::new(LruReplacer::new(32)), 32);
        let catalog = Arc::new(Catalog::bootstrap().unwrap());
        ApplyContext::new(pool, catalog, Arc::new(RowIdIndex::new()))
    }

    fn users(ctx: &ApplyContext) -> TableDef {
        ctx.catalog
            .create_table(
                "users",
                vec![
                    ColumnDef::new("id", DataType::Int32, false),
                    ColumnDef::new("name", DataType::Text, true),
                ],
                vec!["id".into()],
            )
            .unwrap();
        ctx.catalog.require_table("users").unwrap()
    }

    fn row(id: i32, name: &str) -> Vec<u8> {
        value::serialize_values(
            &[Value::Int32(id), Value::Text(name.into())],
            &[DataType::Int32, DataType::Text],
        )
        .unwrap()
    }

    #[test]
    fn test_put_then_read() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let ctx = test_ctx(&dir);
        let def = users(&ctx);

        ctx.apply_put(def.id, 1, &row(7, "alice"), 5, Lsn(1))?;
        let (ts, bytes) = ctx.read_committed(def.id, 1)?.unwrap();
        assert_eq!(ts, 5);
        let values = value::deserialize_values(&bytes, &def.column_types())?;
        assert_eq!(values[0], Value::Int32(7));

        // The primary key index finds the row.
        let def = ctx.catalog.require_table("users")?;
        let pk = def.primary_index().unwrap();
        let tree = BTree::new(ctx.pool.clone(), pk.root);
        let key = value::encode_key(&[Value::Int32(7)])?;
        assert_eq!(tree.search(&key)?, Some(1));
        Ok(())
    }

    #[test]
    fn test_put_is_an_upsert() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let ctx = test_ctx(&dir);
        let def = users(&ctx);

        ctx.apply_put(def.id, 1, &row(7, "alice"), 5, Lsn(1))?;
        ctx.apply_put(def.id, 1, &row(8, "alice2"), 6, Lsn(2))?;

        let (_, bytes) = ctx.read_committed(def.id, 1)?.unwrap();
        let values = value::deserialize_values(&bytes, &def.column_types())?;
        assert_eq!(values[0], Value::Int32(8));

        // The old pk entry is gone, the new one present.
        let def = ctx.catalog.require_table("users")?;
        let tree = BTree::new(ctx.pool.clone(), def.primary_index().unwrap().root);
        assert_eq!(tree.search(&value::encode_key(&[Value::Int32(7)])?)?, None);
        assert_eq!(
            tree.search(&value::encode_key(&[Value::Int32(8)])?)?,
            Some(1)
        );
        Ok(())
    }

    #[test]
    fn test_delete_is_idempotent() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let ctx = test_ctx(&dir);
        let def = users(&ctx);

        ctx.apply_put(def.id, 1, &row(7, "alice"), 5, Lsn(1))?;
        ctx.apply_delete(def.id, 1, Lsn(2))?;
        ctx.apply_delete(def.id, 1, Lsn(3))?;
        assert!(ctx.read_committed(def.id, 1)?.is_none());

        let def = ctx.catalog.require_table("users")?;
        let tree = BTree::new(ctx.pool.clone(), def.primary_index().unwrap().root);
        assert_eq!(tree.search(&value::encode_key(&[Value::Int32(7)])?)?, None);
        Ok(())
    }

    #[test]
    fn test_null_columns_stay_unindexed() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let ctx = test_ctx(&dir);
        let def = users(&ctx);
        ctx.catalog
            .create_index("users_name", "users", vec!["name".into()], false)?;

        let bytes = value::serialize_values(
            &[Value::Int32(1), Value::Null],
            &[DataType::Int32, DataType::Text],
        )?;
        ctx.apply_put(def.id, 1, &bytes, 5, Lsn(1))?;

        let def = ctx.catalog.require_table("users")?;
        let name_idx = def.indexes.iter().find(|i| i.name == "users_name").unwrap();
        // No entry was created for the NULL name.
        assert!(!name_idx.root.is_valid());
        Ok(())
    }
}
