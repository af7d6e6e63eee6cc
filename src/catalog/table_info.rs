//! Table, column and index definitions.

use crate::access::value::DataType;
use crate::storage::page::PageId;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
pub struct TableId(pub u32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnDef {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
    /// Dropped columns keep their physical slot so stored rows never need
    /// rewriting; they are hidden from every SQL-visible surface.
    #[serde(default)]
    pub dropped: bool,
}

impl ColumnDef {
    pub fn new(name: impl Into<String>, data_type: DataType, nullable: bool) -> Self {
        Self {
            name: name.into(),
            data_type,
            nullable,
            dropped: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    pub columns: Vec<String>,
    pub unique: bool,
    pub is_primary: bool,
    /// Root page of the backing B+Tree; INVALID until the first insert.
    pub root: PageId,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableDef {
    pub id: TableId,
    pub name: String,
    pub columns: Vec<ColumnDef>,
    pub primary_key: Vec<String>,
    /// First heap page; INVALID until the first insert.
    pub first_page: PageId,
    pub indexes: Vec<IndexDef>,
    pub next_row_id: u64,
    /// System tables (graph/vector backing) are hidden from SQL.
    pub hidden: bool,
}

impl TableDef {
    /// Physical column types, dropped slots included; this is the on-disk
    /// row layout.
    pub fn column_types(&self) -> Vec<DataType> {
        self.columns.iter().map(|c| c.data_type).collect()
    }

    /// Physical position of a live column.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|c| !c.dropped && c.name == name)
    }

    pub fn visible_columns(&self) -> Vec<&ColumnDef> {
        self.columns.iter().filter(|c| !c.dropped).collect()
    }

    /// Maps a physical row to the SQL-visible columns.
    pub fn to_visible(&self, physical: Vec<crate::access::value::Value>) -> Vec<crate::access::value::Value> {
        physical
            .into_iter()
            .zip(&self.columns)
            .filter(|(_, c)| !c.dropped)
            .map(|(v, _)| v)
            .collect()
    }

    /// Expands a visible row to the physical layout, NULL in dropped slots.
    pub fn to_physical(&self, visible: Vec<crate::access::value::Value>) -> Vec<crate::access::value::Value> {
        let mut it = visible.into_iter();
        self.columns
            .iter()
            .map(|c| {
                if c.dropped {
                    crate::access::value::Value::Null
                } else {
                    it.next().unwrap_or(crate::access::value::Value::Null)
                }
            })
            .collect()
    }

    pub fn primary_index(&self) -> Option<&IndexDef> {
        self.indexes.iter().find(|i| i.is_primary)
    }

    pub fn has_primary_key(&self) -> bool {
        !self.primary_key.is_empty()
    }
}
