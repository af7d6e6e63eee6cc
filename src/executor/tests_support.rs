//! Shared fixture wiring a full in-process engine for executor tests.

use crate::access::graph::AdjacencyIndex;
use crate::access::hash::RowIdIndex;
use crate::access::value::{self, DataType, Value};
use crate::access::vector::VectorStore;
use crate::catalog::{Catalog, ColumnDef};
use crate::concurrency::timestamp::TimestampOracle;
use crate::concurrency::version::VersionManager;
use crate::executor::ExecutionContext;
use crate::storage::buffer::lru::LruReplacer;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::wal::{WalConfig, WalManager};
use crate::storage::PageStore;
use crate::transaction::apply::ApplyContext;
use crate::transaction::TransactionManager;
use std::sync::Arc;
use tempfile::TempDir;

pub struct TestDb {
    pub catalog: Arc<Catalog>,
    pub pool: BufferPoolManager,
    pub versions: Arc<VersionManager>,
    pub txns: Arc<TransactionManager>,
    pub rowids: Arc<RowIdIndex>,
    pub vectors: Arc<VectorStore>,
    pub graph: Arc<AdjacencyIndex>,
    _dir: TempDir,
}

impl TestDb {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = PageStore::create(&dir.path().join("data.pdb"), 4096).unwrap();
        let wal = Arc::new(
            WalManager::open(WalConfig {
                dir: dir.path().join("wal"),
                sync_on_commit: false,
                ..Default::default()
            })
            .unwrap(),
        );
        let pool = BufferPoolManager::new(store, wal.clone(), Box::new(LruReplacer::new(64)), 64);
        let catalog = Arc::new(Catalog::bootstrap().unwrap());
        let rowids = Arc::new(RowIdIndex::new());
        let versions = Arc::new(VersionManager::new());
        let oracle = Arc::new(TimestampOracle::new(1));
        let apply = ApplyContext::new(pool.clone(), catalog.clone(), rowids.clone());
        let txns = Arc::new(TransactionManager::new(
            oracle,
            versions.clone(),
            wal,
            apply,
            1,
        ));
        TestDb {
            catalog,
            pool,
            versions,
            txns,
            rowids,
            vectors: Arc::new(VectorStore::new()),
            graph: Arc::new(AdjacencyIndex::new()),
            _dir: dir,
        }
    }

    /// Context bound to a freshly begun transaction.
    pub fn context(&self) -> ExecutionContext {
        ExecutionContext {
            catalog: self.catalog.clone(),
            pool: self.pool.clone(),
            versions: self.versions.clone(),
            txns: self.txns.clone(),
            vectors: self.vectors.clone(),
            graph: self.graph.clone(),
            txn: self.txns.begin(),
        }
    }

    pub fn create_users(&self) {
        self.catalog
            .create_table(
                "users",
                vec![
                    ColumnDef::new("id", DataType::Int32, false),
                    ColumnDef::new("name", DataType::Text, true),
                    ColumnDef::new("age", DataType::Int32, true),
                ],
                vec!["id".into()],
            )
            .unwrap();
    }

    /// Inserts and commits one user row through the transaction manager.
    pub fn commit_user(&self, id: i32, name: &str, age: i32) -> u64 {
        let def = self.catalog.require_table("users").unwrap();
        let values = vec![
            Value::Int32(id),
            Value::Text(name.into()),
            Value::Int32(age),
        ];
        let bytes = value::serialize_values(&values, &def.column_types()).unwrap();
        let row_id = self.catalog.alloc_row_id(def.id).unwrap();
        let txn = self.txns.begin();
        self.txns.stage_put(txn, def.id, row_id, bytes).unwrap();
        self.txns.commit(txn).unwrap();
        row_id
    }
}
