//! Volcano-style execution: each operator pulls rows lazily from its input.
//!
//! `init` prepares an executor, `next` produces one row at a time, `None`
//! ends the stream. Dropping an executor mid-stream is the cancellation
//! path: reads stop where they are, and writes cannot be half-applied
//! because DML executors only stage into the transaction write set.

pub mod aggregate;
pub mod delete;
pub mod filter;
pub mod graph_traverse;
pub mod hash_join;
pub mod index_scan;
pub mod insert;
pub mod limit;
pub mod nested_loop_join;
pub mod projection;
pub mod seq_scan;
pub mod sort;
pub mod update;
pub mod values;
pub mod vector_search;

#[cfg(test)]
pub mod tests_support;

use crate::access::graph::AdjacencyIndex;
use crate::access::value::{self, DataType, Value};
use crate::access::vector::VectorStore;
use crate::catalog::{Catalog, TableDef};
use crate::concurrency::version::VersionManager;
use crate::error::{DbError, DbResult};
use crate::planner::physical::PhysicalNode;
use crate::sql::ast::Expression;
use crate::storage::buffer::BufferPoolManager;
use crate::transaction::apply::{index_key, index_probe_bounds};
use crate::transaction::{TransactionManager, TxnId};
use std::sync::Arc;

pub use aggregate::AggregateExecutor;
pub use delete::DeleteExecutor;
pub use filter::FilterExecutor;
pub use graph_traverse::GraphNeighborsExecutor;
pub use hash_join::HashJoinExecutor;
pub use index_scan::IndexScanExecutor;
pub use insert::InsertExecutor;
pub use limit::LimitExecutor;
pub use nested_loop_join::NestedLoopJoinExecutor;
pub use projection::ProjectionExecutor;
pub use seq_scan::SeqScanExecutor;
pub use sort::SortExecutor;
pub use update::UpdateExecutor;
pub use values::ValuesExecutor;
pub use vector_search::VectorSearchExecutor;

/// One output column of an executor.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnInfo {
    pub name: String,
    pub data_type: DataType,
}

impl ColumnInfo {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
        }
    }
}

pub trait Executor: Send {
    /// Must be called once before `next`.
    fn init(&mut self) -> DbResult<()>;

    /// Produces the next row, or `None` at end of stream.
    fn next(&mut self) -> DbResult<Option<Vec<Value>>>;

    fn output_schema(&self) -> &[ColumnInfo];
}

/// Shared engine state an executor tree runs against, bound to one
/// transaction.
#[derive(Clone)]
pub struct ExecutionContext {
    pub catalog: Arc<Catalog>,
    pub pool: BufferPoolManager,
    pub versions: Arc<VersionManager>,
    pub txns: Arc<TransactionManager>,
    pub vectors: Arc<VectorStore>,
    pub graph: Arc<AdjacencyIndex>,
    pub txn: TxnId,
}

/// Builds the executor tree for a physical query node.
pub fn build_executor(
    node: &PhysicalNode,
    ctx: &ExecutionContext,
) -> DbResult<Box<dyn Executor>> {
    Ok(match node {
        PhysicalNode::SeqScan { table, qualifier } => Box::new(SeqScanExecutor::new(
            table.clone(),
            qualifier.clone(),
            ctx.clone(),
        )),
        PhysicalNode::IndexScan {
            table,
            qualifier,
            index,
            lo,
            hi,
            residual,
        } => Box::new(IndexScanExecutor::new(
            table.clone(),
            qualifier.clone(),
            index.clone(),
            lo.clone(),
            hi.clone(),
            residual.clone(),
            ctx.clone(),
        )),
        PhysicalNode::Filter { input, predicate } => Box::new(FilterExecutor::new(
            build_executor(input, ctx)?,
            predicate.clone(),
        )),
        PhysicalNode::Project { input, items } => Box::new(ProjectionExecutor::new(
            build_executor(input, ctx)?,
            items.clone(),
        )),
        PhysicalNode::NestedLoopJoin {
            outer,
            inner,
            join_type,
            condition,
            swapped,
        } => Box::new(NestedLoopJoinExecutor::new(
            build_executor(outer, ctx)?,
            build_executor(inner, ctx)?,
            *join_type,
            condition.clone(),
            *swapped,
        )),
        PhysicalNode::HashJoin {
            left,
            right,
            left_key,
            right_key,
            build_left,
        } => Box::new(HashJoinExecutor::new(
            build_executor(left, ctx)?,
            build_executor(right, ctx)?,
            left_key.clone(),
            right_key.clone(),
            *build_left,
        )),
        PhysicalNode::Aggregate {
            input,
            group_by,
            aggregates,
        } => Box::new(AggregateExecutor::new(
            build_executor(input, ctx)?,
            group_by.clone(),
            aggregates.clone(),
        )),
        PhysicalNode::Sort { input, keys } => Box::new(SortExecutor::new(
            build_executor(input, ctx)?,
            keys.clone(),
        )),
        PhysicalNode::Limit {
            input,
            limit,
            offset,
        } => Box::new(LimitExecutor::new(
            build_executor(input, ctx)?,
            *limit,
            *offset,
        )),
        PhysicalNode::Values { rows, names } => {
            Box::new(ValuesExecutor::new(rows.clone(), names.clone()))
        }
        PhysicalNode::VectorSearch {
            collection,
            query,
            k,
        } => Box::new(VectorSearchExecutor::new(
            collection.clone(),
            query.clone(),
            *k,
            ctx.clone(),
        )),
        PhysicalNode::GraphNeighbors {
            graph,
            node,
            relation,
        } => Box::new(GraphNeighborsExecutor::new(
            graph.clone(),
            node.clone(),
            relation.clone(),
            ctx.clone(),
        )),
    })
}

/// Schema of a table scan (visible columns only), with names optionally
/// qualified for joins.
pub fn scan_schema(def: &TableDef, qualifier: &Option<String>) -> Vec<ColumnInfo> {
    def.visible_columns()
        .iter()
        .map(|c| {
            let name = match qualifier {
                Some(q) => format!("{}.{}", q, c.name),
                None => c.name.clone(),
            };
            ColumnInfo::new(name, c.data_type)
        })
        .collect()
}

/// Best-effort output type of an expression against an input schema.
pub fn infer_type(expr: &Expression, schema: &[ColumnInfo]) -> DataType {
    match expr {
        Expression::Literal(v) => v.data_type().unwrap_or(DataType::Text),
        Expression::Column(name) => {
            crate::expression::eval::resolve_column(schema, None, name)
                .map(|i| schema[i].data_type)
                .unwrap_or(DataType::Text)
        }
        Expression::QualifiedColumn(q, name) => {
            crate::expression::eval::resolve_column(schema, Some(q), name)
                .map(|i| schema[i].data_type)
                .unwrap_or(DataType::Text)
        }
        Expression::BinaryOp { left, right, op } => match op {
            crate::sql::ast::BinaryOperator::And
            | crate::sql::ast::BinaryOperator::Or
            | crate::sql::ast::BinaryOperator::Equal
            | crate::sql::ast::BinaryOperator::NotEqual
            | crate::sql::ast::BinaryOperator::Less
            | crate::sql::ast::BinaryOperator::Greater
            | crate::sql::ast::BinaryOperator::LessEqual
            | crate::sql::ast::BinaryOperator::GreaterEqual => DataType::Boolean,
            _ => {
                let l = infer_type(left, schema);
                let r = infer_type(right, schema);
                if l == DataType::Float64 || r == DataType::Float64 {
                    DataType::Float64
                } else if l == DataType::Int64 || r == DataType::Int64 {
                    DataType::Int64
                } else {
                    l
                }
            }
        },
        Expression::UnaryOp { operand, .. } => infer_type(operand, schema),
        Expression::Function { name, .. } => match name.to_uppercase().as_str() {
            "LENGTH" => DataType::Int32,
            "UPPER" | "LOWER" => DataType::Text,
            _ => DataType::Text,
        },
        Expression::IsNull { .. } => DataType::Boolean,
    }
}

/// Checks every unique index (primary key included) for a conflicting,
/// currently-visible row. `exclude_row` skips the row being updated.
pub fn unique_violation(
    ctx: &ExecutionContext,
    def: &TableDef,
    values: &[Value],
    exclude_row: Option<u64>,
) -> DbResult<Option<String>> {
    let staged = ctx.txns.staged_rows(ctx.txn, def.id);
    for index in def.indexes.iter().filter(|i| i.unique) {
        let Some(key) = index_key(def, true, &index.columns, values, 0)? else {
            continue;
        };

        // Rows staged by this same transaction.
        for (row_id, after) in &staged {
            if Some(*row_id) == exclude_row {
                continue;
            }
            let Some(bytes) = after else { continue };
            let other = value::deserialize_values(bytes, &def.column_types())?;
            if index_key(def, true, &index.columns, &other, 0)? == Some(key.clone()) {
                return Ok(Some(index.name.clone()));
            }
        }

        // Committed rows, confirmed against the visible version.
        let tree = crate::access::BTree::new(ctx.pool.clone(), index.root);
        let (lo, hi) = index_probe_bounds(true, key.clone());
        for entry in tree.range(Some(&lo), Some(&hi))? {
            let (_, row_id) = entry?;
            if Some(row_id) == exclude_row || staged.iter().any(|(r, _)| *r == row_id) {
                continue;
            }
            if let Some(bytes) = ctx.txns.read(ctx.txn, def.id, row_id)? {
                let other = value::deserialize_values(&bytes, &def.column_types())?;
                if index_key(def, true, &index.columns, &other, 0)? == Some(key.clone()) {
                    return Ok(Some(index.name.clone()));
                }
            }
        }
    }
    Ok(None)
}

/// Validates and coerces a visible row against the table schema, returning
/// the physical layout ready for storage.
pub fn check_row(def: &TableDef, values: &[Value]) -> DbResult<Vec<Value>> {
    let visible = def.visible_columns();
    if values.len() != visible.len() {
        return Err(DbError::ConstraintViolation(format!(
            "table '{}' has {} columns but {} values were supplied",
            def.name,
            visible.len(),
            values.len()
        )));
    }
    let mut out = Vec::with_capacity(values.len());
    for (value, column) in values.iter().zip(&visible) {
        if value.is_null() && !column.nullable {
            return Err(DbError::ConstraintViolation(format!(
                "column '{}' is NOT NULL",
                column.name
            )));
        }
        out.push(value.coerce_to(column.data_type)?);
    }
    Ok(def.to_physical(out))
}
