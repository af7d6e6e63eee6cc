//! The embedded façade: one handle owning the storage, transaction and
//! query machinery for a data directory.
//!
//! SQL goes through parse → plan → optimize → execute; the row, vector and
//! graph APIs skip the parser but build the same plans and run inside the
//! same transactions. There are no process-wide singletons: every `Database`
//! is independent, so tests can open several side by side.
//!
//! Layout of a data directory: `data.pdb` (page store), `wal/` (segments),
//! `MANIFEST` (schema, counters, checkpoint position).

use crate::access::graph::AdjacencyIndex;
use crate::access::hash::RowIdIndex;
use crate::access::value::{self, Value};
use crate::access::vector::VectorStore;
use crate::access::{BTree, TableHeap};
use crate::catalog::{
    Catalog, ColumnDef, TableDef, GRAPH_EDGES_TABLE, GRAPH_NODES_TABLE, VECTORS_TABLE,
};
use crate::concurrency::timestamp::TimestampOracle;
use crate::concurrency::version::VersionManager;
use crate::error::{DbError, DbResult};
use crate::executor::{
    build_executor, check_row, unique_violation, ColumnInfo, DeleteExecutor, ExecutionContext,
    Executor, InsertExecutor, UpdateExecutor,
};
use crate::planner::logical::{build_logical_plan, LogicalNode, LogicalPlan};
use crate::planner::physical::{optimize, PhysicalPlan, PlannerContext};
use crate::recovery::checkpoint::CheckpointManager;
use crate::recovery::replay;
use crate::sql::ast::ColumnSpec;
use crate::sql::Parser;
use crate::storage::buffer::lru::LruReplacer;
use crate::storage::buffer::BufferPoolManager;
use crate::storage::manifest::Manifest;
use crate::storage::wal::{Lsn, WalConfig, WalManager};
use crate::storage::{PageStore, DEFAULT_PAGE_SIZE};
use crate::transaction::apply::{index_key, index_probe_bounds, ApplyContext};
use crate::transaction::{TransactionManager, TxnId};
use log::info;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const DATA_FILE: &str = "data.pdb";
const WAL_DIR: &str = "wal";

/// When the WAL is made durable.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FsyncPolicy {
    /// fsync on every commit; nothing committed is ever lost.
    EveryCommit,
    /// fsync only when forced (page flushes, checkpoints). The tail of
    /// recent commits can be lost in a crash.
    Grouped,
}

#[derive(Debug, Clone)]
pub struct Config {
    /// Page size, fixed when the data directory is created.
    pub page_size: usize,
    /// Buffer pool budget in bytes.
    pub buffer_pool_bytes: usize,
    /// WAL segment rotation size.
    pub wal_segment_bytes: u64,
    /// Checkpoint once the live WAL exceeds this many bytes.
    pub checkpoint_wal_bytes: u64,
    pub fsync: FsyncPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            page_size: DEFAULT_PAGE_SIZE,
            buffer_pool_bytes: 4 * 1024 * 1024,
            wal_segment_bytes: 16 * 1024 * 1024,
            checkpoint_wal_bytes: 8 * 1024 * 1024,
            fsync: FsyncPolicy::EveryCommit,
        }
    }
}

/// Materialized result of `execute`.
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub columns: Vec<ColumnInfo>,
    pub rows: Vec<Vec<Value>>,
    pub rows_affected: u64,
}

impl ResultSet {
    fn empty() -> Self {
        Self::default()
    }

    fn affected(n: u64) -> Self {
        ResultSet {
            rows_affected: n,
            ..Default::default()
        }
    }
}

pub struct Database {
    dir: PathBuf,
    config: Config,
    catalog: Arc<Catalog>,
    pool: BufferPoolManager,
    wal: Arc<WalManager>,
    versions: Arc<VersionManager>,
    txns: Arc<TransactionManager>,
    rowids: Arc<RowIdIndex>,
    vectors: Arc<VectorStore>,
    graph: Arc<AdjacencyIndex>,
    checkpoints: CheckpointManager,
    /// Explicit transaction opened by SQL BEGIN on this handle.
    session_txn: Mutex<Option<TxnId>>,
}

impl Database {
    /// Creates a fresh data directory and opens it.
    pub fn create(path: &Path, config: Config) -> DbResult<Self> {
        std::fs::create_dir_all(path)?;
        if Manifest::exists(path) {
            return Err(DbError::InvalidArgument(format!(
                "a database already exists at {}",
                path.display()
            )));
        }
        PageStore::create(&path.join(DATA_FILE), config.page_size)?;
        let catalog = Catalog::bootstrap()?;
        Manifest::new(config.page_size as u32, catalog.snapshot()).store(path)?;
        Self::open_with(path, config)
    }

    /// Opens an existing data directory with default runtime options.
    pub fn open(path: &Path) -> DbResult<Self> {
        Self::open_with(path, Config::default())
    }

    /// Opens an existing data directory. Recovery (WAL replay) runs here;
    /// a data directory that cannot be proven consistent refuses to open.
    pub fn open_with(path: &Path, config: Config) -> DbResult<Self> {
        if !Manifest::exists(path) {
            return Err(DbError::NotFound(format!(
                "no database at {}",
                path.display()
            )));
        }
        let manifest = Manifest::load(path)?;
        let store = PageStore::open(&path.join(DATA_FILE))?;
        if store.page_size() as u32 != manifest.page_size {
            return Err(DbError::Corruption(format!(
                "page size mismatch: manifest says {}, data file says {}",
                manifest.page_size,
                store.page_size()
            )));
        }
        if !manifest.clean_shutdown {
            info!("previous shutdown was not clean, recovering from wal");
        }

        let wal = Arc::new(WalManager::open(WalConfig {
            dir: path.join(WAL_DIR),
            segment_size: config.wal_segment_bytes,
            sync_on_commit: config.fsync == FsyncPolicy::EveryCommit,
        })?);
        let page_size = store.page_size();
        let frames = (config.buffer_pool_bytes / page_size).max(8);
        let pool = BufferPoolManager::new(
            store,
            wal.clone(),
            Box::new(LruReplacer::new(frames)),
            frames,
        );

        let catalog = Arc::new(Catalog::from_snapshot(manifest.catalog.clone()));
        let rowids = Arc::new(RowIdIndex::new());
        let apply = ApplyContext::new(pool.clone(), catalog.clone(), rowids.clone());

        let report = replay::recover(&apply, &wal, manifest.last_checkpoint_lsn)?;
        wal.reset_next_lsn(Lsn(
            report.max_lsn.0.max(manifest.last_checkpoint_lsn.0) + 1,
        ));

        let oracle = Arc::new(TimestampOracle::new(
            manifest.next_commit_ts.max(report.max_commit_ts + 1),
        ));
        let versions = Arc::new(VersionManager::new());
        let txns = Arc::new(TransactionManager::new(
            oracle.clone(),
            versions.clone(),
            wal.clone(),
            apply,
            manifest.next_txn_id.max(report.max_txn_id + 1),
        ));

        let checkpoints = CheckpointManager::new(
            path.to_path_buf(),
            pool.clone(),
            wal.clone(),
            catalog.clone(),
            txns.clone(),
            oracle,
            manifest.page_size,
            config.checkpoint_wal_bytes,
        );

        let db = Database {
            dir: path.to_path_buf(),
            config,
            catalog,
            pool,
            wal,
            versions,
            txns,
            rowids,
            vectors: Arc::new(VectorStore::new()),
            graph: Arc::new(AdjacencyIndex::new()),
            checkpoints,
            session_txn: Mutex::new(None),
        };
        db.rebuild_model_indexes()?;

        if report.replayed > 0 {
            // Bound the next recovery and reclaim replayed segments.
            db.checkpoints.checkpoint(false)?;
        } else {
            // Record that the directory is in use.
            let mut manifest = manifest;
            manifest.clean_shutdown = false;
            manifest.store(path)?;
        }
        Ok(db)
    }

    /// Flushes everything and releases the directory. The next open will
    /// find a clean manifest and skip replay.
    pub fn close(self) -> DbResult<()> {
        if let Some(txn) = self.session_txn.lock().take() {
            self.txns.rollback(txn)?;
        }
        self.checkpoints.checkpoint(true)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn list_tables(&self) -> Vec<String> {
        self.catalog.list_tables()
    }

    /// Committed row count of a table.
    pub fn row_count(&self, table: &str) -> DbResult<usize> {
        let def = self.visible_table(table)?;
        Ok(self.rowids.table_rows(def.id).len())
    }

    /// Runs a manual checkpoint.
    pub fn checkpoint(&self) -> DbResult<()> {
        self.checkpoints.checkpoint(false).map(|_| ())
    }

    // ------------------------------------------------------------------
    // SQL entry point
    // ------------------------------------------------------------------

    /// Parses, plans and executes one SQL statement.
    pub fn execute(&self, sql: &str) -> DbResult<ResultSet> {
        let statement = Parser::parse_statement(sql)?;
        let logical = build_logical_plan(statement)?;
        let physical = optimize(
            logical,
            &PlannerContext {
                catalog: self.catalog.clone(),
                rowids: self.rowids.clone(),
            },
        )?;

        match physical {
            PhysicalPlan::Begin => {
                let mut session = self.session_txn.lock();
                if session.is_some() {
                    return Err(DbError::InvalidArgument(
                        "a transaction is already open on this handle".into(),
                    ));
                }
                *session = Some(self.txns.begin());
                Ok(ResultSet::empty())
            }
            PhysicalPlan::Commit => {
                let txn = self.session_txn.lock().take().ok_or_else(|| {
                    DbError::InvalidArgument("no open transaction to commit".into())
                })?;
                self.txns.commit(txn)?;
                self.after_commit()?;
                Ok(ResultSet::empty())
            }
            PhysicalPlan::Rollback => {
                let txn = self.session_txn.lock().take().ok_or_else(|| {
                    DbError::InvalidArgument("no open transaction to roll back".into())
                })?;
                self.txns.rollback(txn)?;
                Ok(ResultSet::empty())
            }
            PhysicalPlan::Query(node) => self.run_query(&node),
            PhysicalPlan::Insert {
                table,
                columns,
                rows,
            } => self.run_dml(|ctx| Box::new(InsertExecutor::new(table, columns, rows, ctx))),
            PhysicalPlan::Update {
                table,
                assignments,
                filter,
            } => self.run_dml(|ctx| {
                Box::new(UpdateExecutor::new(table, assignments, filter, ctx))
            }),
            PhysicalPlan::Delete { table, filter } => {
                self.run_dml(|ctx| Box::new(DeleteExecutor::new(table, filter, ctx)))
            }
            ddl => self.run_ddl(ddl),
        }
    }

    fn run_query(&self, node: &crate::planner::physical::PhysicalNode) -> DbResult<ResultSet> {
        let (txn, owned) = self.current_txn();
        let ctx = self.exec_ctx(txn);
        let result = (|| {
            let mut executor = build_executor(node, &ctx)?;
            executor.init()?;
            let mut rows = Vec::new();
            while let Some(row) = executor.next()? {
                rows.push(row);
            }
            Ok(ResultSet {
                columns: executor.output_schema().to_vec(),
                rows,
                rows_affected: 0,
            })
        })();
        self.finish(txn, owned, result)
    }

    fn run_dml<F>(&self, make: F) -> DbResult<ResultSet>
    where
        F: FnOnce(ExecutionContext) -> Box<dyn Executor>,
    {
        let (txn, owned) = self.current_txn();
        let ctx = self.exec_ctx(txn);
        let result = (|| {
            let mut executor = make(ctx);
            executor.init()?;
            let affected = match executor.next()? {
                Some(row) => match row.first() {
                    Some(Value::Int64(n)) => *n as u64,
                    _ => 0,
                },
                None => 0,
            };
            Ok(ResultSet::affected(affected))
        })();
        self.finish(txn, owned, result)
    }

    fn run_ddl(&self, plan: PhysicalPlan) -> DbResult<ResultSet> {
        if self.session_txn.lock().is_some() {
            return Err(DbError::InvalidArgument(
                "DDL cannot run inside an open transaction".into(),
            ));
        }
        match plan {
            PhysicalPlan::CreateTable(ct) => {
                let columns = ct.columns.iter().map(column_def).collect();
                self.catalog
                    .create_table(&ct.table, columns, ct.primary_key.clone())?;
            }
            PhysicalPlan::DropTable { table } => {
                let def = self.catalog.drop_table(&table)?;
                self.release_table_storage(&def)?;
            }
            PhysicalPlan::AlterTable(alter) => match alter {
                crate::sql::ast::AlterTableStatement::AddColumn { table, column } => {
                    self.visible_table(&table)?;
                    self.catalog.add_column(&table, column_def(&column))?;
                }
                crate::sql::ast::AlterTableStatement::DropColumn { table, column } => {
                    self.visible_table(&table)?;
                    self.catalog.drop_column(&table, &column)?;
                }
            },
            PhysicalPlan::CreateIndex(ci) => {
                self.visible_table(&ci.table)?;
                self.catalog
                    .create_index(&ci.index, &ci.table, ci.columns.clone(), ci.unique)?;
                if let Err(e) = self.backfill_index(&ci.table, &ci.index) {
                    let _ = self.catalog.drop_index(&ci.index);
                    return Err(e);
                }
            }
            PhysicalPlan::DropIndex { index } => {
                let dropped = self.catalog.drop_index(&index)?;
                let mut tree = BTree::new(self.pool.clone(), dropped.root);
                tree.destroy()?;
            }
            other => {
                return Err(DbError::QueryPlan(format!(
                    "statement not executable as DDL: {:?}",
                    other
                )))
            }
        }
        // DDL durability: catalog changes persist through a checkpoint.
        self.checkpoints.checkpoint(false)?;
        Ok(ResultSet::empty())
    }

    // ------------------------------------------------------------------
    // Row API
    // ------------------------------------------------------------------

    /// Inserts a row given (column, value) pairs; unnamed columns become
    /// NULL. Returns the engine-generated row id.
    pub fn insert(&self, table: &str, row: Vec<(String, Value)>) -> DbResult<u64> {
        let (txn, owned) = self.current_txn();
        let result = self.insert_in(txn, table, row);
        self.finish(txn, owned, result)
    }

    /// Reads a row by its engine-generated id.
    pub fn get(&self, table: &str, id: u64) -> DbResult<Option<Vec<(String, Value)>>> {
        let (txn, owned) = self.current_txn();
        let result = self.get_in(txn, table, id);
        self.finish(txn, owned, result)
    }

    /// Replaces the named columns of a row; unnamed columns keep their
    /// current values.
    pub fn update(&self, table: &str, id: u64, row: Vec<(String, Value)>) -> DbResult<()> {
        let (txn, owned) = self.current_txn();
        let result = self.update_in(txn, table, id, row);
        self.finish(txn, owned, result)
    }

    /// Deletes a row by id.
    pub fn delete(&self, table: &str, id: u64) -> DbResult<()> {
        let (txn, owned) = self.current_txn();
        let result = self.delete_in(txn, table, id);
        self.finish(txn, owned, result)
    }

    /// Opens an explicit transaction handle for multi-statement work. The
    /// handle rolls back on drop unless committed.
    pub fn transaction(&self) -> Transaction<'_> {
        Transaction {
            db: self,
            txn: self.txns.begin(),
            finished: false,
        }
    }

    fn insert_in(&self, txn: TxnId, table: &str, row: Vec<(String, Value)>) -> DbResult<u64> {
        let def = self.visible_table(table)?;
        let values = self.arrange_row(&def, row, None)?;
        let physical = check_row(&def, &values)?;

        let ctx = self.exec_ctx(txn);
        if let Some(index) = unique_violation(&ctx, &def, &physical, None)? {
            return Err(DbError::ConstraintViolation(format!(
                "duplicate key violates unique index '{}'",
                index
            )));
        }
        let bytes = value::serialize_values(&physical, &def.column_types())?;
        let row_id = self.catalog.alloc_row_id(def.id)?;
        self.txns.stage_put(txn, def.id, row_id, bytes)?;
        Ok(row_id)
    }

    fn get_in(
        &self,
        txn: TxnId,
        table: &str,
        id: u64,
    ) -> DbResult<Option<Vec<(String, Value)>>> {
        let def = self.visible_table(table)?;
        let Some(bytes) = self.txns.read(txn, def.id, id)? else {
            return Ok(None);
        };
        let physical = value::deserialize_values(&bytes, &def.column_types())?;
        let visible = def.to_visible(physical);
        Ok(Some(
            def.visible_columns()
                .iter()
                .map(|c| c.name.clone())
                .zip(visible)
                .collect(),
        ))
    }

    fn update_in(
        &self,
        txn: TxnId,
        table: &str,
        id: u64,
        row: Vec<(String, Value)>,
    ) -> DbResult<()> {
        let def = self.visible_table(table)?;
        let Some(bytes) = self.txns.read(txn, def.id, id)? else {
            return Err(DbError::NotFound(format!(
                "row {} not found in '{}'",
                id, table
            )));
        };
        let current = def.to_visible(value::deserialize_values(&bytes, &def.column_types())?);
        let values = self.arrange_row(&def, row, Some(current))?;
        let physical = check_row(&def, &values)?;

        let ctx = self.exec_ctx(txn);
        if let Some(index) = unique_violation(&ctx, &def, &physical, Some(id))? {
            return Err(DbError::ConstraintViolation(format!(
                "duplicate key violates unique index '{}'",
                index
            )));
        }
        let bytes = value::serialize_values(&physical, &def.column_types())?;
        self.txns.stage_put(txn, def.id, id, bytes)
    }

    fn delete_in(&self, txn: TxnId, table: &str, id: u64) -> DbResult<()> {
        let def = self.visible_table(table)?;
        if self.txns.read(txn, def.id, id)?.is_none() {
            return Err(DbError::NotFound(format!(
                "row {} not found in '{}'",
                id, table
            )));
        }
        self.txns.stage_delete(txn, def.id, id)
    }

    // ------------------------------------------------------------------
    // Vector API
    // ------------------------------------------------------------------

    /// Stores (or replaces) a vector. The first vector stored in a
    /// collection fixes the collection's dimension.
    pub fn store_vector(&self, collection: &str, id: &str, vector: Vec<f32>) -> DbResult<()> {
        if vector.is_empty() {
            return Err(DbError::InvalidArgument(
                "vectors must have at least one component".into(),
            ));
        }
        if let Some(dim) = self.catalog.vector_dimension(collection) {
            if vector.len() != dim as usize {
                return Err(DbError::DimensionMismatch {
                    expected: dim as usize,
                    actual: vector.len(),
                });
            }
        }

        let def = self.catalog.require_table(VECTORS_TABLE)?;
        let pk = vec![
            Value::Text(collection.to_string()),
            Value::Text(id.to_string()),
        ];
        let physical = vec![
            Value::Text(collection.to_string()),
            Value::Text(id.to_string()),
            Value::Vector(vector.clone()),
        ];
        self.upsert_hidden(&def, &pk, physical)?;

        self.catalog
            .register_vector_dimension(collection, vector.len() as u32);
        self.vectors.insert(collection, id, vector)?;
        Ok(())
    }

    pub fn get_vector(&self, collection: &str, id: &str) -> Option<Vec<f32>> {
        self.vectors.get(collection, id)
    }

    pub fn delete_vector(&self, collection: &str, id: &str) -> DbResult<bool> {
        let def = self.catalog.require_table(VECTORS_TABLE)?;
        let pk = vec![
            Value::Text(collection.to_string()),
            Value::Text(id.to_string()),
        ];
        let removed = self.delete_hidden(&def, &pk)?;
        if removed {
            self.vectors.remove(collection, id);
        }
        Ok(removed)
    }

    /// Removes a whole collection and frees its dimension binding.
    pub fn drop_vector_collection(&self, collection: &str) -> DbResult<usize> {
        let def = self.catalog.require_table(VECTORS_TABLE)?;
        let (txn, owned) = self.current_txn();
        let result = (|| {
            let snapshot = self.txns.snapshot_of(txn)?;
            let staged = self.txns.staged_rows(txn, def.id);
            let scanner = crate::access::TableScanner::new(
                self.pool.clone(),
                def.clone(),
                &self.versions,
                snapshot,
                staged,
            );
            let mut removed = 0;
            for item in scanner {
                let (row_id, values) = item?;
                if values[0] == Value::Text(collection.to_string()) {
                    self.txns.stage_delete(txn, def.id, row_id)?;
                    removed += 1;
                }
            }
            Ok(removed)
        })();
        let removed = self.finish(txn, owned, result)?;
        self.vectors.drop_collection(collection);
        self.catalog.drop_vector_collection(collection);
        Ok(removed)
    }

    /// k-nearest-neighbor search, ascending by distance.
    pub fn vector_search(
        &self,
        collection: &str,
        query: Vec<f32>,
        k: usize,
    ) -> DbResult<Vec<(String, f64)>> {
        let node = LogicalNode::VectorSearch {
            collection: collection.to_string(),
            query,
            k,
        };
        let rows = self.run_plan_node(node)?;
        rows.rows
            .into_iter()
            .map(|row| match (&row[0], &row[1]) {
                (Value::Text(id), Value::Float64(d)) => Ok((id.clone(), *d)),
                _ => Err(DbError::Corruption("malformed vector search row".into())),
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Graph API
    // ------------------------------------------------------------------

    /// Stores (or replaces) a node with a JSON property map.
    pub fn store_node(&self, graph: &str, id: &str, props: serde_json::Value) -> DbResult<()> {
        let def = self.catalog.require_table(GRAPH_NODES_TABLE)?;
        let pk = vec![Value::Text(graph.to_string()), Value::Text(id.to_string())];
        let physical = vec![
            Value::Text(graph.to_string()),
            Value::Text(id.to_string()),
            Value::Json(props),
        ];
        self.upsert_hidden(&def, &pk, physical)
    }

    /// Node properties, if the node exists.
    pub fn get_node(&self, graph: &str, id: &str) -> DbResult<Option<serde_json::Value>> {
        let def = self.catalog.require_table(GRAPH_NODES_TABLE)?;
        let pk = vec![Value::Text(graph.to_string()), Value::Text(id.to_string())];
        let (txn, owned) = self.current_txn();
        let result = (|| {
            let Some(row_id) = self.find_by_pk(txn, &def, &pk)? else {
                return Ok(None);
            };
            let Some(bytes) = self.txns.read(txn, def.id, row_id)? else {
                return Ok(None);
            };
            let values = value::deserialize_values(&bytes, &def.column_types())?;
            match &values[2] {
                Value::Json(props) => Ok(Some(props.clone())),
                Value::Null => Ok(Some(serde_json::Value::Null)),
                other => Err(DbError::Corruption(format!(
                    "node props column holds {:?}",
                    other
                ))),
            }
        })();
        self.finish(txn, owned, result)
    }

    /// Stores a directed edge. The relation label is the `"type"` property;
    /// both endpoints must already exist in the graph.
    pub fn store_edge(
        &self,
        graph: &str,
        from: &str,
        to: &str,
        props: serde_json::Value,
    ) -> DbResult<()> {
        let relation = props
            .get("type")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        for endpoint in [from, to] {
            if self.get_node(graph, endpoint)?.is_none() {
                return Err(DbError::NotFound(format!(
                    "node '{}' does not exist in graph '{}'",
                    endpoint, graph
                )));
            }
        }

        let def = self.catalog.require_table(GRAPH_EDGES_TABLE)?;
        let pk = vec![
            Value::Text(graph.to_string()),
            Value::Text(from.to_string()),
            Value::Text(relation.clone()),
            Value::Text(to.to_string()),
        ];
        let physical = vec![
            Value::Text(graph.to_string()),
            Value::Text(from.to_string()),
            Value::Text(to.to_string()),
            Value::Text(relation.clone()),
            Value::Json(props),
        ];
        self.upsert_hidden(&def, &pk, physical)?;
        self.graph.add_edge(graph, from, &relation, to);
        Ok(())
    }

    /// Removes a node and every edge touching it; returns whether the node
    /// existed.
    pub fn delete_node(&self, graph: &str, id: &str) -> DbResult<bool> {
        let nodes = self.catalog.require_table(GRAPH_NODES_TABLE)?;
        let edges = self.catalog.require_table(GRAPH_EDGES_TABLE)?;
        let pk = vec![Value::Text(graph.to_string()), Value::Text(id.to_string())];

        let (txn, owned) = self.current_txn();
        let result = (|| {
            let Some(node_row) = self.find_by_pk(txn, &nodes, &pk)? else {
                return Ok(false);
            };
            self.txns.stage_delete(txn, nodes.id, node_row)?;

            // Incident edges in either direction.
            let snapshot = self.txns.snapshot_of(txn)?;
            let staged = self.txns.staged_rows(txn, edges.id);
            let scanner = crate::access::TableScanner::new(
                self.pool.clone(),
                edges.clone(),
                &self.versions,
                snapshot,
                staged,
            );
            for item in scanner {
                let (row_id, values) = item?;
                let same_graph = values[0] == Value::Text(graph.to_string());
                let touches = values[1] == Value::Text(id.to_string())
                    || values[2] == Value::Text(id.to_string());
                if same_graph && touches {
                    self.txns.stage_delete(txn, edges.id, row_id)?;
                }
            }
            Ok(true)
        })();
        let existed = self.finish(txn, owned, result)?;
        if existed {
            self.graph.remove_node(graph, id);
        }
        Ok(existed)
    }

    /// Removes a directed edge; returns whether it existed.
    pub fn remove_edge(
        &self,
        graph: &str,
        from: &str,
        to: &str,
        relation: &str,
    ) -> DbResult<bool> {
        let def = self.catalog.require_table(GRAPH_EDGES_TABLE)?;
        let pk = vec![
            Value::Text(graph.to_string()),
            Value::Text(from.to_string()),
            Value::Text(relation.to_string()),
            Value::Text(to.to_string()),
        ];
        let removed = self.delete_hidden(&def, &pk)?;
        if removed {
            self.graph.remove_edge(graph, from, relation, to);
        }
        Ok(removed)
    }

    /// Neighbor node ids over one relation, in insertion order.
    pub fn neighbors(&self, graph: &str, id: &str, relation: &str) -> DbResult<Vec<String>> {
        let node = LogicalNode::GraphNeighbors {
            graph: graph.to_string(),
            node: id.to_string(),
            relation: relation.to_string(),
        };
        let rows = self.run_plan_node(node)?;
        rows.rows
            .into_iter()
            .map(|row| match row.into_iter().next() {
                Some(Value::Text(id)) => Ok(id),
                _ => Err(DbError::Corruption("malformed neighbor row".into())),
            })
            .collect()
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    /// Runs a programmatic plan node through the same optimizer/executor
    /// path SQL uses.
    fn run_plan_node(&self, node: LogicalNode) -> DbResult<ResultSet> {
        let physical = optimize(
            LogicalPlan::Query(node),
            &PlannerContext {
                catalog: self.catalog.clone(),
                rowids: self.rowids.clone(),
            },
        )?;
        let PhysicalPlan::Query(node) = physical else {
            return Err(DbError::QueryPlan("expected a query plan".into()));
        };
        self.run_query(&node)
    }

    /// The session transaction if one is open, else a fresh auto-commit
    /// transaction (owned = true).
    fn current_txn(&self) -> (TxnId, bool) {
        match *self.session_txn.lock() {
            Some(txn) => (txn, false),
            None => (self.txns.begin(), true),
        }
    }

    /// Completes an operation: commits owned transactions on success, rolls
    /// back on failure (aborting the session transaction too, per the
    /// error contract).
    fn finish<T>(&self, txn: TxnId, owned: bool, result: DbResult<T>) -> DbResult<T> {
        match result {
            Ok(value) => {
                if owned {
                    self.txns.commit(txn)?;
                    self.after_commit()?;
                }
                Ok(value)
            }
            Err(e) => {
                let _ = self.txns.rollback(txn);
                if !owned {
                    *self.session_txn.lock() = None;
                }
                Err(e)
            }
        }
    }

    fn after_commit(&self) -> DbResult<()> {
        self.txns.garbage_collect();
        self.checkpoints.maybe_checkpoint()?;
        Ok(())
    }

    fn exec_ctx(&self, txn: TxnId) -> ExecutionContext {
        ExecutionContext {
            catalog: self.catalog.clone(),
            pool: self.pool.clone(),
            versions: self.versions.clone(),
            txns: self.txns.clone(),
            vectors: self.vectors.clone(),
            graph: self.graph.clone(),
            txn,
        }
    }

    fn visible_table(&self, table: &str) -> DbResult<TableDef> {
        let def = self.catalog.require_table(table)?;
        if def.hidden {
            return Err(DbError::InvalidArgument(format!(
                "table '{}' is reserved for internal use",
                table
            )));
        }
        Ok(def)
    }

    /// Builds a visible row from (column, value) pairs, starting from
    /// `base` (current values for updates, NULLs for inserts).
    fn arrange_row(
        &self,
        def: &TableDef,
        pairs: Vec<(String, Value)>,
        base: Option<Vec<Value>>,
    ) -> DbResult<Vec<Value>> {
        let visible = def.visible_columns();
        let mut row = base.unwrap_or_else(|| vec![Value::Null; visible.len()]);
        for (name, value) in pairs {
            let idx = visible
                .iter()
                .position(|c| c.name == name)
                .ok_or_else(|| DbError::NotFound(format!("column '{}' does not exist", name)))?;
            row[idx] = value;
        }
        Ok(row)
    }

    /// Finds a committed-or-staged row by primary key, snapshot-visible.
    fn find_by_pk(&self, txn: TxnId, def: &TableDef, pk: &[Value]) -> DbResult<Option<u64>> {
        let Some(pk_index) = def.primary_index() else {
            return Ok(None);
        };
        let key = value::encode_key(pk)?;

        // Own staged rows first.
        for (row_id, after) in self.txns.staged_rows(txn, def.id) {
            let Some(bytes) = after else { continue };
            let values = value::deserialize_values(&bytes, &def.column_types())?;
            if index_key(def, true, &pk_index.columns, &values, 0)? == Some(key.clone()) {
                return Ok(Some(row_id));
            }
        }

        let tree = BTree::new(self.pool.clone(), pk_index.root);
        let (lo, hi) = index_probe_bounds(true, key);
        for entry in tree.range(Some(&lo), Some(&hi))? {
            let (_, row_id) = entry?;
            if self.txns.read(txn, def.id, row_id)?.is_some() {
                return Ok(Some(row_id));
            }
        }
        Ok(None)
    }

    /// Upserts a row in a hidden table by primary key, auto-committed.
    fn upsert_hidden(&self, def: &TableDef, pk: &[Value], physical: Vec<Value>) -> DbResult<()> {
        let (txn, owned) = self.current_txn();
        let result = (|| {
            let bytes = value::serialize_values(&physical, &def.column_types())?;
            let row_id = match self.find_by_pk(txn, def, pk)? {
                Some(existing) => existing,
                None => self.catalog.alloc_row_id(def.id)?,
            };
            self.txns.stage_put(txn, def.id, row_id, bytes)
        })();
        self.finish(txn, owned, result)
    }

    /// Deletes a hidden-table row by primary key, auto-committed.
    fn delete_hidden(&self, def: &TableDef, pk: &[Value]) -> DbResult<bool> {
        let (txn, owned) = self.current_txn();
        let result = (|| match self.find_by_pk(txn, def, pk)? {
            Some(row_id) => {
                self.txns.stage_delete(txn, def.id, row_id)?;
                Ok(true)
            }
            None => Ok(false),
        })();
        self.finish(txn, owned, result)
    }

    /// Frees a dropped table's pages and purges derived state.
    fn release_table_storage(&self, def: &TableDef) -> DbResult<()> {
        if def.first_page.is_valid() {
            let heap = TableHeap::new(self.pool.clone(), def.first_page);
            for page in heap.chain_pages()? {
                self.pool.free_page(page)?;
            }
        }
        for index in &def.indexes {
            let mut tree = BTree::new(self.pool.clone(), index.root);
            tree.destroy()?;
        }
        self.rowids.remove_table(def.id);
        self.versions.remove_table(def.id);
        Ok(())
    }

    /// Builds a freshly created index from the table's committed rows.
    fn backfill_index(&self, table: &str, index_name: &str) -> DbResult<()> {
        let def = self.catalog.require_table(table)?;
        let index = def
            .indexes
            .iter()
            .find(|i| i.name == index_name)
            .cloned()
            .ok_or_else(|| DbError::NotFound(format!("index '{}' missing", index_name)))?;

        let mut tree = BTree::new(self.pool.clone(), index.root);
        if def.first_page.is_valid() {
            let heap = TableHeap::new(self.pool.clone(), def.first_page);
            for item in heap.iter() {
                let (_, image) = item?;
                let values = value::deserialize_values(&image.values, &def.column_types())?;
                if let Some(key) =
                    index_key(&def, index.unique, &index.columns, &values, image.row_id)?
                {
                    if index.unique && tree.search(&key)?.is_some() {
                        tree.destroy()?;
                        return Err(DbError::ConstraintViolation(format!(
                            "existing rows violate unique index '{}'",
                            index_name
                        )));
                    }
                    tree.insert(&key, image.row_id, self.wal.current_lsn())?;
                }
            }
        }
        self.catalog.set_index_root(def.id, index_name, tree.root());
        Ok(())
    }

    /// Rebuilds the in-memory vector collections and adjacency index from
    /// the hidden tables.
    fn rebuild_model_indexes(&self) -> DbResult<()> {
        self.vectors.clear();
        let vdef = self.catalog.require_table(VECTORS_TABLE)?;
        if vdef.first_page.is_valid() {
            let heap = TableHeap::new(self.pool.clone(), vdef.first_page);
            for item in heap.iter() {
                let (_, image) = item?;
                let values = value::deserialize_values(&image.values, &vdef.column_types())?;
                if let (Value::Text(collection), Value::Text(id), Value::Vector(v)) =
                    (&values[0], &values[1], &values[2])
                {
                    self.catalog
                        .register_vector_dimension(collection, v.len() as u32);
                    self.vectors.insert(collection, id, v.clone())?;
                }
            }
        }

        self.graph.clear();
        let edef = self.catalog.require_table(GRAPH_EDGES_TABLE)?;
        if edef.first_page.is_valid() {
            let heap = TableHeap::new(self.pool.clone(), edef.first_page);
            for item in heap.iter() {
                let (_, image) = item?;
                let values = value::deserialize_values(&image.values, &edef.column_types())?;
                if let (
                    Value::Text(graph),
                    Value::Text(from),
                    Value::Text(to),
                    Value::Text(relation),
                ) = (&values[0], &values[1], &values[2], &values[3])
                {
                    self.graph.add_edge(graph, from, relation, to);
                }
            }
        }
        Ok(())
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        // Best effort: make pages durable even without an explicit close.
        let _ = self.pool.flush_all();
    }
}

/// An explicit transaction over the row API. Reads see the snapshot taken
/// at `Database::transaction`; writes stay buffered until `commit`.
pub struct Transaction<'a> {
    db: &'a Database,
    txn: TxnId,
    finished: bool,
}

impl Transaction<'_> {
    pub fn insert(&self, table: &str, row: Vec<(String, Value)>) -> DbResult<u64> {
        self.db.insert_in(self.txn, table, row)
    }

    pub fn get(&self, table: &str, id: u64) -> DbResult<Option<Vec<(String, Value)>>> {
        self.db.get_in(self.txn, table, id)
    }

    pub fn update(&self, table: &str, id: u64, row: Vec<(String, Value)>) -> DbResult<()> {
        self.db.update_in(self.txn, table, id, row)
    }

    pub fn delete(&self, table: &str, id: u64) -> DbResult<()> {
        self.db.delete_in(self.txn, table, id)
    }

    /// Validates and commits. A conflicting concurrent commit surfaces as
    /// a retryable `TransactionConflict`; the transaction is rolled back.
    pub fn commit(mut self) -> DbResult<()> {
        self.finished = true;
        self.db.txns.commit(self.txn)?;
        self.db.after_commit()
    }

    pub fn rollback(mut self) -> DbResult<()> {
        self.finished = true;
        self.db.txns.rollback(self.txn)
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.db.txns.rollback(self.txn);
        }
    }
}

fn column_def(spec: &ColumnSpec) -> ColumnDef {
    ColumnDef::new(spec.name.clone(), spec.data_type, spec.nullable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn fresh_db(dir: &tempfile::TempDir) -> Database {
        Database::create(&dir.path().join("db"), Config::default()).unwrap()
    }

    #[test]
    fn test_create_then_open() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let path = dir.path().join("db");
        {
            let db = Database::create(&path, Config::default())?;
            db.execute("CREATE TABLE t(id INT PRIMARY KEY)")?;
            db.close()?;
        }
        {
            let db = Database::open(&path)?;
            assert_eq!(db.list_tables(), vec!["t".to_string()]);
        }
        assert!(Database::create(&path, Config::default()).is_err());
        assert!(matches!(
            Database::open(&dir.path().join("missing")),
            Err(DbError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_sql_round_trip() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let db = fresh_db(&dir);
        db.execute("CREATE TABLE users(id INT PRIMARY KEY, name STRING)")?;
        let rs = db.execute("INSERT INTO users VALUES (1, 'Alice')")?;
        assert_eq!(rs.rows_affected, 1);

        let rs = db.execute("SELECT * FROM users WHERE id = 1")?;
        assert_eq!(rs.rows.len(), 1);
        assert_eq!(
            rs.rows[0],
            vec![Value::Int32(1), Value::Text("Alice".into())]
        );
        assert_eq!(rs.columns[1].name, "name");
        Ok(())
    }

    #[test]
    fn test_row_api_round_trip_all_kinds() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let db = fresh_db(&dir);
        db.execute(
            "CREATE TABLE everything(b BOOLEAN, i INT, l BIGINT, f DOUBLE, s STRING, \
             bin BINARY, j JSON, v VECTOR, ts TIMESTAMP)",
        )?;

        let row = vec![
            ("b".to_string(), Value::Boolean(true)),
            ("i".to_string(), Value::Int32(-7)),
            ("l".to_string(), Value::Int64(1 << 40)),
            ("f".to_string(), Value::Float64(2.5)),
            ("s".to_string(), Value::Text("text".into())),
            ("bin".to_string(), Value::Binary(vec![1, 2, 3])),
            ("j".to_string(), Value::Json(json!({"k": [1, 2]}))),
            ("v".to_string(), Value::Vector(vec![0.5, 0.25])),
            ("ts".to_string(), Value::Timestamp(1_700_000_000)),
        ];
        let id = db.insert("everything", row.clone())?;
        let fetched = db.get("everything", id)?.unwrap();
        assert_eq!(fetched, row);

        db.update(
            "everything",
            id,
            vec![("i".to_string(), Value::Int32(99))],
        )?;
        let fetched = db.get("everything", id)?.unwrap();
        assert_eq!(fetched[1].1, Value::Int32(99));
        assert_eq!(fetched[4].1, Value::Text("text".into()));

        db.delete("everything", id)?;
        assert!(db.get("everything", id)?.is_none());
        assert!(matches!(
            db.delete("everything", id),
            Err(DbError::NotFound(_))
        ));
        Ok(())
    }

    #[test]
    fn test_vector_scenario() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let db = fresh_db(&dir);
        db.store_vector("emb", "doc1", vec![0.1, 0.2, 0.3])?;
        db.store_vector("emb", "doc2", vec![0.9, 0.8, 0.7])?;

        let hits = db.vector_search("emb", vec![0.1, 0.2, 0.31], 1)?;
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "doc1");
        assert!(hits[0].1 < 0.02);

        // Dimension is fixed by the first insert.
        assert!(matches!(
            db.store_vector("emb", "bad", vec![1.0]),
            Err(DbError::DimensionMismatch { expected: 3, actual: 1 })
        ));
        assert_eq!(db.get_vector("emb", "doc2"), Some(vec![0.9, 0.8, 0.7]));
        assert!(db.delete_vector("emb", "doc2")?);
        assert_eq!(db.get_vector("emb", "doc2"), None);
        Ok(())
    }

    #[test]
    fn test_graph_scenario() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let db = fresh_db(&dir);
        db.store_node("g", "alice", json!({"label": "Person"}))?;
        db.store_node("g", "bob", json!({}))?;
        db.store_edge("g", "alice", "bob", json!({"type": "FRIENDS"}))?;

        assert_eq!(db.neighbors("g", "alice", "FRIENDS")?, vec!["bob"]);
        assert!(db.neighbors("g", "bob", "FRIENDS")?.is_empty());
        assert_eq!(
            db.get_node("g", "alice")?,
            Some(json!({"label": "Person"}))
        );

        // Edges to unknown nodes are rejected.
        assert!(matches!(
            db.store_edge("g", "alice", "ghost", json!({"type": "KNOWS"})),
            Err(DbError::NotFound(_))
        ));

        assert!(db.remove_edge("g", "alice", "bob", "FRIENDS")?);
        assert!(db.neighbors("g", "alice", "FRIENDS")?.is_empty());
        Ok(())
    }

    #[test]
    fn test_delete_node_cuts_incident_edges() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let db = fresh_db(&dir);
        for node in ["a", "b", "c"] {
            db.store_node("g", node, json!({}))?;
        }
        db.store_edge("g", "a", "b", json!({"type": "KNOWS"}))?;
        db.store_edge("g", "b", "c", json!({"type": "KNOWS"}))?;
        db.store_edge("g", "c", "a", json!({"type": "KNOWS"}))?;

        assert!(db.delete_node("g", "a")?);
        assert!(!db.delete_node("g", "a")?);
        assert!(db.get_node("g", "a")?.is_none());
        assert!(db.neighbors("g", "c", "KNOWS")?.is_empty());
        assert_eq!(db.neighbors("g", "b", "KNOWS")?, vec!["c"]);
        Ok(())
    }

    #[test]
    fn test_drop_vector_collection() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let db = fresh_db(&dir);
        db.store_vector("emb", "a", vec![1.0, 2.0])?;
        db.store_vector("emb", "b", vec![3.0, 4.0])?;
        db.store_vector("other", "x", vec![1.0])?;

        assert_eq!(db.drop_vector_collection("emb")?, 2);
        assert!(db.vector_search("emb", vec![1.0, 2.0], 1).is_err());
        // The dimension binding is released with the collection.
        db.store_vector("emb", "fresh", vec![1.0])?;
        // Other collections are untouched.
        assert_eq!(db.get_vector("other", "x"), Some(vec![1.0]));
        Ok(())
    }

    #[test]
    fn test_explicit_transaction_and_conflict() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let db = fresh_db(&dir);
        db.execute("CREATE TABLE accounts(id INT PRIMARY KEY, age INT)")?;
        db.execute("INSERT INTO accounts VALUES (1, 25)")?;

        // Two concurrent writers on the same row: first committer wins.
        let ta = db.txns.begin();
        let tb = db.txns.begin();
        let def = db.catalog.require_table("accounts")?;
        let mk = |age: i32| {
            value::serialize_values(
                &[Value::Int32(1), Value::Int32(age)],
                &def.column_types(),
            )
            .unwrap()
        };
        db.txns.stage_put(ta, def.id, 1, mk(30))?;
        db.txns.stage_put(tb, def.id, 1, mk(40))?;
        db.txns.commit(ta)?;
        let err = db.txns.commit(tb).unwrap_err();
        assert!(matches!(err, DbError::TransactionConflict(_)));

        let rs = db.execute("SELECT age FROM accounts WHERE id = 1")?;
        assert_eq!(rs.rows[0][0], Value::Int32(30));
        Ok(())
    }

    #[test]
    fn test_begin_commit_rollback_statements() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let db = fresh_db(&dir);
        db.execute("CREATE TABLE t(id INT PRIMARY KEY)")?;

        db.execute("BEGIN")?;
        db.execute("INSERT INTO t VALUES (1)")?;
        // Visible inside the transaction, not outside.
        assert_eq!(db.execute("SELECT * FROM t")?.rows.len(), 1);
        db.execute("ROLLBACK")?;
        assert_eq!(db.execute("SELECT * FROM t")?.rows.len(), 0);

        db.execute("BEGIN")?;
        db.execute("INSERT INTO t VALUES (2)")?;
        db.execute("COMMIT")?;
        assert_eq!(db.execute("SELECT * FROM t")?.rows.len(), 1);

        assert!(db.execute("COMMIT").is_err());
        Ok(())
    }

    #[test]
    fn test_ddl_alter_and_index() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let db = fresh_db(&dir);
        db.execute("CREATE TABLE t(id INT PRIMARY KEY, name STRING, age INT)")?;
        db.execute("INSERT INTO t VALUES (1, 'a', 10), (2, 'b', 20)")?;

        db.execute("ALTER TABLE t ADD COLUMN bio TEXT")?;
        let rs = db.execute("SELECT bio FROM t WHERE id = 1")?;
        assert_eq!(rs.rows[0][0], Value::Null);

        db.execute("ALTER TABLE t DROP COLUMN name")?;
        assert!(db.execute("SELECT name FROM t").is_err());
        let rs = db.execute("SELECT age FROM t WHERE id = 2")?;
        assert_eq!(rs.rows[0][0], Value::Int32(20));

        db.execute("CREATE INDEX t_age ON t(age)")?;
        let rs = db.execute("SELECT id FROM t WHERE age = 20")?;
        assert_eq!(rs.rows.len(), 1);
        db.execute("DROP INDEX t_age")?;
        Ok(())
    }

    #[test]
    fn test_unique_index_backfill_rejects_duplicates() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let db = fresh_db(&dir);
        db.execute("CREATE TABLE t(id INT PRIMARY KEY, name STRING)")?;
        db.execute("INSERT INTO t VALUES (1, 'dup'), (2, 'dup')")?;
        assert!(matches!(
            db.execute("CREATE UNIQUE INDEX t_name ON t(name)"),
            Err(DbError::ConstraintViolation(_))
        ));
        // The failed index leaves no definition behind.
        db.execute("CREATE INDEX t_name ON t(name)")?;
        Ok(())
    }

    #[test]
    fn test_planning_errors_leave_no_side_effects() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let db = fresh_db(&dir);
        db.execute("CREATE TABLE t(id INT PRIMARY KEY)")?;

        assert!(matches!(
            db.execute("SELECT DISTINCT id FROM t"),
            Err(DbError::QueryPlan(_))
        ));
        assert!(matches!(
            db.execute("SELEC id FROM t"),
            Err(DbError::QuerySyntax(_))
        ));
        // The table is still usable and empty.
        assert_eq!(db.execute("SELECT * FROM t")?.rows.len(), 0);
        Ok(())
    }

    #[test]
    fn test_aggregates_and_joins_through_sql() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let db = fresh_db(&dir);
        db.execute("CREATE TABLE users(id INT PRIMARY KEY, name STRING)")?;
        db.execute("CREATE TABLE orders(id INT PRIMARY KEY, user_id INT, total INT)")?;
        db.execute("INSERT INTO users VALUES (1, 'a'), (2, 'b')")?;
        db.execute(
            "INSERT INTO orders VALUES (10, 1, 100), (11, 1, 50), (12, 2, 70)",
        )?;

        let rs = db.execute(
            "SELECT u.name, COUNT(*) AS n, SUM(o.total) AS total \
             FROM users u JOIN orders o ON u.id = o.user_id \
             GROUP BY u.name ORDER BY total DESC",
        )?;
        assert_eq!(rs.rows.len(), 2);
        assert_eq!(rs.rows[0][0], Value::Text("a".into()));
        assert_eq!(rs.rows[0][1], Value::Int64(2));
        assert_eq!(rs.rows[0][2], Value::Int64(150));
        Ok(())
    }

    #[test]
    fn test_drop_table_reuses_pages() -> DbResult<()> {
        let dir = tempdir().unwrap();
        let db = fresh_db(&dir);
        db.execute("CREATE TABLE big(id INT PRIMARY KEY, pad STRING)")?;
        let pad = "x".repeat(500);
        for i in 0..50 {
            db.execute(&format!("INSERT INTO big VALUES ({}, '{}')", i, pad))?;
        }
        db.checkpoint()?;
        let size_before = std::fs::metadata(db.path().join(DATA_FILE))?.len();

        db.execute("DROP TABLE big")?;
        db.execute("CREATE TABLE big2(id INT PRIMARY KEY, pad STRING)")?;
        for i in 0..50 {
            db.execute(&format!("INSERT INTO big2 VALUES ({}, '{}')", i, pad))?;
        }
        db.checkpoint()?;
        let size_after = std::fs::metadata(db.path().join(DATA_FILE))?.len();
        assert!(
            size_after <= size_before,
            "page store grew from {} to {}",
            size_before,
            size_after
        );
        Ok(())
    }
}
