//! Catalog: tables, columns, indexes and vector collections.
//!
//! The catalog lives in memory behind a lock and is persisted as part of the
//! manifest (spec places schema and index definitions there). Hidden system
//! tables back the graph and vector models; they are invisible to SQL and
//! reached only through the façade.

pub mod table_info;

use crate::access::value::DataType;
use crate::error::{DbError, DbResult};
use crate::storage::page::PageId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub use table_info::{ColumnDef, IndexDef, TableDef, TableId};

/// Hidden table holding graph nodes: (graph, node_id, props).
pub const GRAPH_NODES_TABLE: &str = "__graph_nodes";
/// Hidden table holding directed edges: (graph, from_id, to_id, relation, props).
pub const GRAPH_EDGES_TABLE: &str = "__graph_edges";
/// Hidden table holding vector collection entries: (collection, vec_id, embedding).
pub const VECTORS_TABLE: &str = "__vectors";

const HIDDEN_PREFIX: &str = "__";

#[derive(Debug, Default, Serialize, Deserialize)]
struct CatalogState {
    next_table_id: u32,
    tables: HashMap<String, TableDef>,
    vector_dims: BTreeMap<String, u32>,
}

/// Serializable catalog image stored in the manifest.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CatalogSnapshot {
    pub next_table_id: u32,
    pub tables: Vec<TableDef>,
    pub vector_dims: BTreeMap<String, u32>,
}

pub struct Catalog {
    state: RwLock<CatalogState>,
}

impl Catalog {
    /// Creates an empty catalog with the hidden system tables registered.
    pub fn bootstrap() -> DbResult<Self> {
        let catalog = Catalog {
            state: RwLock::new(CatalogState {
                next_table_id: 1,
                ..Default::default()
            }),
        };
        catalog.create_table_internal(
            GRAPH_NODES_TABLE,
            vec![
                ColumnDef::new("graph", DataType::Text, false),
                ColumnDef::new("node_id", DataType::Text, false),
                ColumnDef::new("props", DataType::Json, true),
            ],
            vec!["graph".into(), "node_id".into()],
            true,
        )?;
        catalog.create_table_internal(
            GRAPH_EDGES_TABLE,
            vec![
                ColumnDef::new("graph", DataType::Text, false),
                ColumnDef::new("from_id", DataType::Text, false),
                ColumnDef::new("to_id", DataType::Text, false),
                ColumnDef::new("relation", DataType::Text, false),
                ColumnDef::new("props", DataType::Json, true),
            ],
            vec![
                "graph".into(),
                "from_id".into(),
                "relation".into(),
                "to_id".into(),
            ],
            true,
        )?;
        catalog.create_table_internal(
            VECTORS_TABLE,
            vec![
                ColumnDef::new("collection", DataType::Text, false),
                ColumnDef::new("vec_id", DataType::Text, false),
                ColumnDef::new("embedding", DataType::Vector, false),
            ],
            vec!["collection".into(), "vec_id".into()],
            true,
        )?;
        Ok(catalog)
    }

    pub fn from_snapshot(snapshot: CatalogSnapshot) -> Self {
        let tables = snapshot
            .tables
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect();
        Catalog {
            state: RwLock::new(CatalogState {
                next_table_id: snapshot.next_table_id,
                tables,
                vector_dims: snapshot.vector_dims,
            }),
        }
    }

    pub fn snapshot(&self) -> CatalogSnapshot {
        let state = self.state.read();
        let mut tables: Vec<TableDef> = state.tables.values().cloned().collect();
        tables.sort_by_key(|t| t.id.0);
        CatalogSnapshot {
            next_table_id: state.next_table_id,
            tables,
            vector_dims: state.vector_dims.clone(),
        }
    }

    pub fn create_table(
        &self,
        name: &str,
        columns: Vec<ColumnDef>,
        primary_key: Vec<String>,
    ) -> DbResult<TableId> {
        if name.starts_with(HIDDEN_PREFIX) {
            return Err(DbError::InvalidArgument(format!(
                "table name '{}' is reserved",
                name
            )));
        }
        self.create_table_internal(name, columns, primary_key, false)
    }

    fn create_table_internal(
        &self,
        name: &str,
        columns: Vec<ColumnDef>,
        primary_key: Vec<String>,
        hidden: bool,
    ) -> DbResult<TableId> {
        if columns.is_empty() {
            return Err(DbError::InvalidArgument(
                "a table needs at least one column".into(),
            ));
        }
        let mut seen = std::collections::HashSet::new();
        for col in &columns {
            if !seen.insert(col.name.as_str()) {
                return Err(DbError::InvalidArgument(format!(
                    "duplicate column '{}'",
                    col.name
                )));
            }
        }
        for pk_col in &primary_key {
            let col = columns
                .iter()
                .find(|c| &c.name == pk_col)
                .ok_or_else(|| {
                    DbError::InvalidArgument(format!("primary key column '{}' not found", pk_col))
                })?;
            if !col.data_type.is_indexable() {
                return Err(DbError::InvalidArgument(format!(
                    "{} columns cannot be part of a primary key",
                    col.data_type.name()
                )));
            }
        }

        let mut state = self.state.write();
        if state.tables.contains_key(name) {
            return Err(DbError::ConstraintViolation(format!(
                "table '{}' already exists",
                name
            )));
        }
        let id = TableId(state.next_table_id);
        state.next_table_id += 1;

        let mut indexes = Vec::new();
        if !primary_key.is_empty() {
            indexes.push(IndexDef {
                name: format!("{}_pkey", name),
                columns: primary_key.clone(),
                unique: true,
                is_primary: true,
                root: PageId::INVALID,
            });
        }
        state.tables.insert(
            name.to_string(),
            TableDef {
                id,
                name: name.to_string(),
                columns,
                primary_key,
                first_page: PageId::INVALID,
                indexes,
                next_row_id: 1,
                hidden,
            },
        );
        Ok(id)
    }

    /// Removes the table definition and returns it so the caller can release
    /// its pages.
    pub fn drop_table(&self, name: &str) -> DbResult<TableDef> {
        if name.starts_with(HIDDEN_PREFIX) {
            return Err(DbError::InvalidArgument(format!(
                "cannot drop system table '{}'",
                name
            )));
        }
        self.state
            .write()
            .tables
            .remove(name)
            .ok_or_else(|| DbError::NotFound(format!("table '{}' does not exist", name)))
    }

    pub fn get_table(&self, name: &str) -> Option<TableDef> {
        self.state.read().tables.get(name).cloned()
    }

    pub fn require_table(&self, name: &str) -> DbResult<TableDef> {
        self.get_table(name)
            .ok_or_else(|| DbError::NotFound(format!("table '{}' does not exist", name)))
    }

    pub fn get_table_by_id(&self, id: TableId) -> Option<TableDef> {
        self.state
            .read()
            .tables
            .values()
            .find(|t| t.id == id)
            .cloned()
    }

    /// User-visible tables, sorted by name.
    pub fn list_tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .state
            .read()
            .tables
            .values()
            .filter(|t| !t.hidden)
            .map(|t| t.name.clone())
            .collect();
        names.sort();
        names
    }

    /// Every table including hidden ones, sorted by id.
    pub fn all_tables(&self) -> Vec<TableDef> {
        let mut tables: Vec<TableDef> = self.state.read().tables.values().cloned().collect();
        tables.sort_by_key(|t| t.id.0);
        tables
    }

    pub fn add_column(&self, table: &str, column: ColumnDef) -> DbResult<()> {
        if !column.nullable {
            return Err(DbError::InvalidArgument(
                "added columns must be nullable (existing rows have no value)".into(),
            ));
        }
        let mut state = self.state.write();
        let def = state
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::NotFound(format!("table '{}' does not exist", table)))?;
        if def.columns.iter().any(|c| c.name == column.name) {
            return Err(DbError::ConstraintViolation(format!(
                "column '{}' already exists",
                column.name
            )));
        }
        def.columns.push(column);
        Ok(())
    }

    /// Tombstones a column: the physical slot stays (stored rows keep their
    /// layout) but the column disappears from every SQL surface and its name
    /// becomes reusable.
    pub fn drop_column(&self, table: &str, column: &str) -> DbResult<usize> {
        let mut state = self.state.write();
        let def = state
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::NotFound(format!("table '{}' does not exist", table)))?;
        let position = def
            .columns
            .iter()
            .position(|c| !c.dropped && c.name == column)
            .ok_or_else(|| DbError::NotFound(format!("column '{}' does not exist", column)))?;
        if def.primary_key.iter().any(|c| c == column) {
            return Err(DbError::ConstraintViolation(format!(
                "column '{}' is part of the primary key",
                column
            )));
        }
        if def
            .indexes
            .iter()
            .any(|i| i.columns.iter().any(|c| c == column))
        {
            return Err(DbError::ConstraintViolation(format!(
                "column '{}' is indexed; drop the index first",
                column
            )));
        }
        def.columns[position].dropped = true;
        def.columns[position].name = format!("__dropped_{}", position);
        def.columns[position].nullable = true;
        Ok(position)
    }

    pub fn create_index(
        &self,
        name: &str,
        table: &str,
        columns: Vec<String>,
        unique: bool,
    ) -> DbResult<()> {
        let mut state = self.state.write();
        if state
            .tables
            .values()
            .any(|t| t.indexes.iter().any(|i| i.name == name))
        {
            return Err(DbError::ConstraintViolation(format!(
                "index '{}' already exists",
                name
            )));
        }
        let def = state
            .tables
            .get_mut(table)
            .ok_or_else(|| DbError::NotFound(format!("table '{}' does not exist", table)))?;
        for col_name in &columns {
            let col = def
                .columns
                .iter()
                .find(|c| &c.name == col_name)
                .ok_or_else(|| {
                    DbError::NotFound(format!("column '{}' does not exist", col_name))
                })?;
            if !col.data_type.is_indexable() {
                return Err(DbError::InvalidArgument(format!(
                    "{} columns cannot be indexed",
                    col.data_type.name()
                )));
            }
        }
        def.indexes.push(IndexDef {
            name: name.to_string(),
            columns,
            unique,
            is_primary: false,
            root: PageId::INVALID,
        });
        Ok(())
    }

    /// Removes an index definition, returning it so the caller can free its
    /// pages.
    pub fn drop_index(&self, name: &str) -> DbResult<IndexDef> {
        let mut state = self.state.write();
        for def in state.tables.values_mut() {
            if let Some(pos) = def.indexes.iter().position(|i| i.name == name) {
                if def.indexes[pos].is_primary {
                    return Err(DbError::InvalidArgument(
                        "cannot drop a primary key index".into(),
                    ));
                }
                return Ok(def.indexes.remove(pos));
            }
        }
        Err(DbError::NotFound(format!("index '{}' does not exist", name)))
    }

    pub fn set_first_page(&self, table: TableId, page: PageId) {
        if let Some(mut def) = self.table_mut(table) {
            def.first_page = page;
        }
    }

    pub fn set_index_root(&self, table: TableId, index: &str, root: PageId) {
        if let Some(mut def) = self.table_mut(table) {
            if let Some(idx) = def.indexes.iter_mut().find(|i| i.name == index) {
                idx.root = root;
            }
        }
    }

    /// Hands out the next row id for a table.
    pub fn alloc_row_id(&self, table: TableId) -> DbResult<u64> {
        let mut state = self.state.write();
        let def = state
            .tables
            .values_mut()
            .find(|t| t.id == table)
            .ok_or_else(|| DbError::NotFound(format!("table id {} unknown", table.0)))?;
        let id = def.next_row_id;
        def.next_row_id += 1;
        Ok(id)
    }

    /// Recovery fix-up: place the row id counter above everything on disk.
    pub fn bump_next_row_id(&self, table: TableId, floor: u64) {
        if let Some(mut def) = self.table_mut(table) {
            if def.next_row_id <= floor {
                def.next_row_id = floor + 1;
            }
        }
    }

    pub fn vector_dimension(&self, collection: &str) -> Option<u32> {
        self.state.read().vector_dims.get(collection).copied()
    }

    /// Fixes a collection's dimension on first insert.
    pub fn register_vector_dimension(&self, collection: &str, dim: u32) {
        self.state
            .write()
            .vector_dims
            .entry(collection.to_string())
            .or_insert(dim);
    }

    /// Forgets a collection's dimension (DROP of the whole collection).
    pub fn drop_vector_collection(&self, collection: &str) {
        self.state.write().vector_dims.remove(collection);
    }

    fn table_mut(&self, id: TableId) -> Option<parking_lot::MappedRwLockWriteGuard<'_, TableDef>> {
        let state = self.state.write();
        parking_lot::RwLockWriteGuard::try_map(state, |s| {
            s.tables.values_mut().find(|t| t.id == id)
        })
        .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn users_columns() -> Vec<ColumnDef> {
        vec![
            ColumnDef::new("id", DataType::Int32, false),
            ColumnDef::new("name", DataType::Text, true),
        ]
    }

    #[test]
    fn test_bootstrap_registers_hidden_tables() -> DbResult<()> {
        let catalog = Catalog::bootstrap()?;
        assert!(catalog.get_table(GRAPH_NODES_TABLE).is_some());
        assert!(catalog.get_table(GRAPH_EDGES_TABLE).is_some());
        assert!(catalog.get_table(VECTORS_TABLE).is_some());
        // Hidden tables stay out of the user-visible listing.
        assert!(catalog.list_tables().is_empty());
        Ok(())
    }

    #[test]
    fn test_create_and_drop_table() -> DbResult<()> {
        let catalog = Catalog::bootstrap()?;
        let id = catalog.create_table("users", users_columns(), vec!["id".into()])?;
        let def = catalog.require_table("users")?;
        assert_eq!(def.id, id);
        assert_eq!(def.indexes.len(), 1);
        assert!(def.indexes[0].is_primary);

        assert!(catalog.create_table("users", users_columns(), vec![]).is_err());

        catalog.drop_table("users")?;
        assert!(catalog.get_table("users").is_none());
        Ok(())
    }

    #[test]
    fn test_reserved_names_rejected() -> DbResult<()> {
        let catalog = Catalog::bootstrap()?;
        assert!(catalog
            .create_table("__mine", users_columns(), vec![])
            .is_err());
        assert!(catalog.drop_table(VECTORS_TABLE).is_err());
        Ok(())
    }

    #[test]
    fn test_snapshot_round_trip() -> DbResult<()> {
        let catalog = Catalog::bootstrap()?;
        catalog.create_table("users", users_columns(), vec!["id".into()])?;
        catalog.register_vector_dimension("emb", 3);

        let snapshot = catalog.snapshot();
        let restored = Catalog::from_snapshot(snapshot);
        assert!(restored.require_table("users").is_ok());
        assert_eq!(restored.vector_dimension("emb"), Some(3));
        assert_eq!(restored.list_tables(), vec!["users".to_string()]);
        Ok(())
    }

    #[test]
    fn test_row_id_allocation() -> DbResult<()> {
        let catalog = Catalog::bootstrap()?;
        let id = catalog.create_table("t", users_columns(), vec![])?;
        assert_eq!(catalog.alloc_row_id(id)?, 1);
        assert_eq!(catalog.alloc_row_id(id)?, 2);
        catalog.bump_next_row_id(id, 100);
        assert_eq!(catalog.alloc_row_id(id)?, 101);
        Ok(())
    }

    #[test]
    fn test_alter_column_rules() -> DbResult<()> {
        let catalog = Catalog::bootstrap()?;
        catalog.create_table("t", users_columns(), vec!["id".into()])?;

        catalog.add_column("t", ColumnDef::new("age", DataType::Int32, true))?;
        assert_eq!(catalog.require_table("t")?.columns.len(), 3);
        // NOT NULL additions are rejected: existing rows would violate it.
        assert!(catalog
            .add_column("t", ColumnDef::new("x", DataType::Int32, false))
            .is_err());
        // Primary key columns cannot be dropped.
        assert!(catalog.drop_column("t", "id").is_err());
        assert_eq!(catalog.drop_column("t", "age")?, 2);
        Ok(())
    }

    #[test]
    fn test_index_management() -> DbResult<()> {
        let catalog = Catalog::bootstrap()?;
        catalog.create_table("t", users_columns(), vec!["id".into()])?;
        catalog.create_index("t_name", "t", vec!["name".into()], false)?;
        assert!(catalog
            .create_index("t_name", "t", vec!["name".into()], false)
            .is_err());

        // Indexed columns cannot be dropped out from under the index.
        assert!(catalog.drop_column("t", "name").is_err());
        catalog.drop_index("t_name")?;
        assert!(catalog.drop_index("t_name").is_err());
        Ok(())
    }

    #[test]
    fn test_vector_dimension_is_sticky() -> DbResult<()> {
        let catalog = Catalog::bootstrap()?;
        catalog.register_vector_dimension("emb", 3);
        catalog.register_vector_dimension("emb", 5);
        assert_eq!(catalog.vector_dimension("emb"), Some(3));
        Ok(())
    }
}
