//! Physical planning: choose access paths and join strategies.
//!
//! The optimizer turns a logical plan into executable operators:
//!
//! - A filter directly over a scan becomes an index range scan when a
//!   conjunct pins an indexed column with equality or a range; the full
//!   predicate is kept as a residual so the index only ever narrows.
//! - Equi-joins become hash joins with the smaller estimated input as the
//!   build side; everything else (and LEFT joins) runs as a nested loop
//!   with the smaller input outermost when the condition allows swapping.
//!
//! Everything here is pure planning: no storage is touched, so a plan
//! error leaves no side effects.

use crate::access::hash::RowIdIndex;
use crate::access::value::{self, Value};
use crate::catalog::{Catalog, IndexDef, TableDef};
use crate::error::{DbError, DbResult};
use crate::planner::logical::{AggregateExpr, LogicalNode, LogicalPlan};
use crate::sql::ast::{
    AlterTableStatement, BinaryOperator, CreateIndexStatement, CreateTableStatement, Expression,
    JoinType,
};
use crate::transaction::apply::index_probe_bounds;
use std::sync::Arc;

pub struct PlannerContext {
    pub catalog: Arc<Catalog>,
    pub rowids: Arc<RowIdIndex>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhysicalPlan {
    Query(PhysicalNode),
    Insert {
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expression>>,
    },
    Update {
        table: String,
        assignments: Vec<(String, Expression)>,
        filter: Option<Expression>,
    },
    Delete {
        table: String,
        filter: Option<Expression>,
    },
    CreateTable(CreateTableStatement),
    DropTable {
        table: String,
    },
    AlterTable(AlterTableStatement),
    CreateIndex(CreateIndexStatement),
    DropIndex {
        index: String,
    },
    Begin,
    Commit,
    Rollback,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PhysicalNode {
    SeqScan {
        table: String,
        qualifier: Option<String>,
    },
    IndexScan {
        table: String,
        qualifier: Option<String>,
        index: String,
        lo: Option<Vec<u8>>,
        hi: Option<Vec<u8>>,
        /// Full original predicate, re-checked per row.
        residual: Expression,
    },
    Filter {
        input: Box<PhysicalNode>,
        predicate: Expression,
    },
    Project {
        input: Box<PhysicalNode>,
        items: Vec<(Expression, String)>,
    },
    NestedLoopJoin {
        outer: Box<PhysicalNode>,
        inner: Box<PhysicalNode>,
        join_type: JoinType,
        condition: Option<Expression>,
        /// Output order is outer ++ inner unless swapped.
        swapped: bool,
    },
    HashJoin {
        left: Box<PhysicalNode>,
        right: Box<PhysicalNode>,
        left_key: Expression,
        right_key: Expression,
        /// Which side gets materialized into the hash table.
        build_left: bool,
    },
    Aggregate {
        input: Box<PhysicalNode>,
        group_by: Vec<(Expression, String)>,
        aggregates: Vec<AggregateExpr>,
    },
    Sort {
        input: Box<PhysicalNode>,
        keys: Vec<(Expression, bool)>,
    },
    Limit {
        input: Box<PhysicalNode>,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    Values {
        rows: Vec<Vec<Expression>>,
        names: Vec<String>,
    },
    VectorSearch {
        collection: String,
        query: Vec<f32>,
        k: usize,
    },
    GraphNeighbors {
        graph: String,
        node: String,
        relation: String,
    },
}

pub fn optimize(plan: LogicalPlan, ctx: &PlannerContext) -> DbResult<PhysicalPlan> {
    match plan {
        LogicalPlan::Query(node) => Ok(PhysicalPlan::Query(optimize_node(node, ctx)?)),
        LogicalPlan::Insert {
            table,
            columns,
            rows,
        } => Ok(PhysicalPlan::Insert {
            table,
            columns,
            rows,
        }),
        LogicalPlan::Update {
            table,
            assignments,
            filter,
        } => Ok(PhysicalPlan::Update {
            table,
            assignments,
            filter,
        }),
        LogicalPlan::Delete { table, filter } => Ok(PhysicalPlan::Delete { table, filter }),
        LogicalPlan::CreateTable(ct) => Ok(PhysicalPlan::CreateTable(ct)),
        LogicalPlan::DropTable { table } => Ok(PhysicalPlan::DropTable { table }),
        LogicalPlan::AlterTable(alter) => Ok(PhysicalPlan::AlterTable(alter)),
        LogicalPlan::CreateIndex(ci) => Ok(PhysicalPlan::CreateIndex(ci)),
        LogicalPlan::DropIndex { index } => Ok(PhysicalPlan::DropIndex { index }),
        LogicalPlan::Begin => Ok(PhysicalPlan::Begin),
        LogicalPlan::Commit => Ok(PhysicalPlan::Commit),
        LogicalPlan::Rollback => Ok(PhysicalPlan::Rollback),
    }
}

fn optimize_node(node: LogicalNode, ctx: &PlannerContext) -> DbResult<PhysicalNode> {
    match node {
        LogicalNode::Scan { table, qualifier } => {
            require_visible_table(ctx, &table)?;
            Ok(PhysicalNode::SeqScan { table, qualifier })
        }
        LogicalNode::Filter { input, predicate } => {
            // Index selection only applies to a filter sitting directly on a
            // scan; anything else stays a plain filter.
            if let LogicalNode::Scan { table, qualifier } = *input {
                let def = require_visible_table(ctx, &table)?;
                if let Some(scan) = try_index_scan(&def, &qualifier, &predicate)? {
                    return Ok(scan);
                }
                return Ok(PhysicalNode::Filter {
                    input: Box::new(PhysicalNode::SeqScan { table, qualifier }),
                    predicate,
                });
            }
            Ok(PhysicalNode::Filter {
                input: Box::new(optimize_node(*input, ctx)?),
                predicate,
            })
        }
        LogicalNode::Project { input, items } => Ok(PhysicalNode::Project {
            input: Box::new(optimize_node(*input, ctx)?),
            items,
        }),
        LogicalNode::Join {
            left,
            right,
            join_type,
            condition,
        } => optimize_join(*left, *right, join_type, condition, ctx),
        LogicalNode::Aggregate {
            input,
            group_by,
            aggregates,
        } => Ok(PhysicalNode::Aggregate {
            input: Box::new(optimize_node(*input, ctx)?),
            group_by,
            aggregates,
        }),
        LogicalNode::Sort { input, keys } => Ok(PhysicalNode::Sort {
            input: Box::new(optimize_node(*input, ctx)?),
            keys,
        }),
        LogicalNode::Limit {
            input,
            limit,
            offset,
        } => Ok(PhysicalNode::Limit {
            input: Box::new(optimize_node(*input, ctx)?),
            limit,
            offset,
        }),
        LogicalNode::Values { rows, names } => Ok(PhysicalNode::Values { rows, names }),
        LogicalNode::VectorSearch {
            collection,
            query,
            k,
        } => Ok(PhysicalNode::VectorSearch {
            collection,
            query,
            k,
        }),
        LogicalNode::GraphNeighbors {
            graph,
            node,
            relation,
        } => Ok(PhysicalNode::GraphNeighbors {
            graph,
            node,
            relation,
        }),
    }
}

fn optimize_join(
    left: LogicalNode,
    right: LogicalNode,
    join_type: JoinType,
    condition: Option<Expression>,
    ctx: &PlannerContext,
) -> DbResult<PhysicalNode> {
    let left_names = output_names(&left, ctx)?;
    let right_names = output_names(&right, ctx)?;
    let left_est = estimate(&left, ctx);
    let right_est = estimate(&right, ctx);
    let left_phys = optimize_node(left, ctx)?;
    let right_phys = optimize_node(right, ctx)?;

    // Inner equi-joins hash on the join key, building from the smaller side.
    if join_type == JoinType::Inner {
        if let Some(cond) = &condition {
            if let Some((left_key, right_key)) =
                split_equi_condition(cond, &left_names, &right_names)
            {
                return Ok(PhysicalNode::HashJoin {
                    left: Box::new(left_phys),
                    right: Box::new(right_phys),
                    left_key,
                    right_key,
                    build_left: left_est <= right_est,
                });
            }
        }
    }

    // Nested loop: smaller side drives, unless LEFT JOIN pins the outer.
    let swapped = join_type != JoinType::Left && right_est < left_est;
    let (outer, inner) = if swapped {
        (right_phys, left_phys)
    } else {
        (left_phys, right_phys)
    };
    Ok(PhysicalNode::NestedLoopJoin {
        outer: Box::new(outer),
        inner: Box::new(inner),
        join_type,
        condition,
        swapped,
    })
}

/// Detects `left_col = right_col` (in either order) across the two inputs.
fn split_equi_condition(
    condition: &Expression,
    left_names: &[String],
    right_names: &[String],
) -> Option<(Expression, Expression)> {
    let Expression::BinaryOp {
        left: a,
        op: BinaryOperator::Equal,
        right: b,
    } = condition
    else {
        return None;
    };
    let a_refs = column_refs(a);
    let b_refs = column_refs(b);
    if a_refs.is_empty() || b_refs.is_empty() {
        return None;
    }
    if refs_resolve(&a_refs, left_names) && refs_resolve(&b_refs, right_names) {
        return Some(((**a).clone(), (**b).clone()));
    }
    if refs_resolve(&b_refs, left_names) && refs_resolve(&a_refs, right_names) {
        return Some(((**b).clone(), (**a).clone()));
    }
    None
}

fn refs_resolve(refs: &[(Option<String>, String)], names: &[String]) -> bool {
    refs.iter().all(|(qualifier, column)| match qualifier {
        Some(q) => names.iter().any(|n| n == &format!("{}.{}", q, column)),
        None => names
            .iter()
            .any(|n| n == column || n.ends_with(&format!(".{}", column))),
    })
}

fn column_refs(expr: &Expression) -> Vec<(Option<String>, String)> {
    let mut out = Vec::new();
    collect_refs(expr, &mut out);
    out
}

fn collect_refs(expr: &Expression, out: &mut Vec<(Option<String>, String)>) {
    match expr {
        Expression::Column(name) => out.push((None, name.clone())),
        Expression::QualifiedColumn(q, name) => out.push((Some(q.clone()), name.clone())),
        Expression::BinaryOp { left, right, .. } => {
            collect_refs(left, out);
            collect_refs(right, out);
        }
        Expression::UnaryOp { operand, .. } | Expression::IsNull { operand, .. } => {
            collect_refs(operand, out)
        }
        Expression::Function { args, .. } => {
            for arg in args {
                collect_refs(arg, out);
            }
        }
        Expression::Literal(_) => {}
    }
}

/// Column names a node's output carries, for join-side resolution.
fn output_names(node: &LogicalNode, ctx: &PlannerContext) -> DbResult<Vec<String>> {
    match node {
        LogicalNode::Scan { table, qualifier } => {
            let def = require_visible_table(ctx, table)?;
            Ok(def
                .columns
                .iter()
                .map(|c| match qualifier {
                    Some(q) => format!("{}.{}", q, c.name),
                    None => c.name.clone(),
                })
                .collect())
        }
        LogicalNode::Filter { input, .. }
        | LogicalNode::Sort { input, .. }
        | LogicalNode::Limit { input, .. } => output_names(input, ctx),
        LogicalNode::Project { items, .. } => {
            Ok(items.iter().map(|(_, name)| name.clone()).collect())
        }
        LogicalNode::Join { left, right, .. } => {
            let mut names = output_names(left, ctx)?;
            names.extend(output_names(right, ctx)?);
            Ok(names)
        }
        LogicalNode::Aggregate {
            group_by,
            aggregates,
            ..
        } => Ok(group_by
            .iter()
            .map(|(_, name)| name.clone())
            .chain(aggregates.iter().map(|a| a.alias.clone()))
            .collect()),
        LogicalNode::Values { names, .. } => Ok(names.clone()),
        LogicalNode::VectorSearch { .. } => Ok(vec!["id".into(), "distance".into()]),
        LogicalNode::GraphNeighbors { .. } => Ok(vec!["neighbor".into()]),
    }
}

/// Rough cardinality estimate driving join strategy and order.
fn estimate(node: &LogicalNode, ctx: &PlannerContext) -> usize {
    match node {
        LogicalNode::Scan { table, .. } => ctx
            .catalog
            .get_table(table)
            .map(|def| ctx.rowids.table_rows(def.id).len())
            .unwrap_or(0)
            .max(1),
        LogicalNode::Filter { input, .. } => (estimate(input, ctx) / 3).max(1),
        LogicalNode::Project { input, .. }
        | LogicalNode::Sort { input, .. }
        | LogicalNode::Limit { input, .. } => estimate(input, ctx),
        LogicalNode::Join { left, right, .. } => {
            estimate(left, ctx).saturating_mul(estimate(right, ctx))
        }
        LogicalNode::Aggregate { input, .. } => (estimate(input, ctx) / 2).max(1),
        LogicalNode::Values { rows, .. } => rows.len().max(1),
        LogicalNode::VectorSearch { k, .. } => (*k).max(1),
        LogicalNode::GraphNeighbors { .. } => 8,
    }
}

fn require_visible_table(ctx: &PlannerContext, table: &str) -> DbResult<TableDef> {
    let def = ctx
        .catalog
        .get_table(table)
        .ok_or_else(|| DbError::NotFound(format!("table '{}' does not exist", table)))?;
    if def.hidden {
        return Err(DbError::QueryPlan(format!(
            "table '{}' is reserved for internal use",
            table
        )));
    }
    Ok(def)
}

#[derive(Default, Clone)]
struct ColumnBounds {
    eq: Option<Value>,
    lo: Option<Value>,
    hi: Option<Value>,
}

/// Tries to turn `predicate` over a scan of `def` into an index range scan.
fn try_index_scan(
    def: &TableDef,
    qualifier: &Option<String>,
    predicate: &Expression,
) -> DbResult<Option<PhysicalNode>> {
    let mut conjuncts = Vec::new();
    collect_conjuncts(predicate, &mut conjuncts);

    // Per-column bounds from `col op literal` conjuncts.
    let mut bounds: std::collections::HashMap<String, ColumnBounds> =
        std::collections::HashMap::new();
    for conjunct in &conjuncts {
        if let Some((column, op, literal)) = as_column_comparison(conjunct, qualifier) {
            let entry = bounds.entry(column).or_default();
            match op {
                BinaryOperator::Equal => entry.eq = Some(literal),
                BinaryOperator::Greater | BinaryOperator::GreaterEqual => {
                    entry.lo = Some(literal)
                }
                BinaryOperator::Less | BinaryOperator::LessEqual => entry.hi = Some(literal),
                _ => {}
            }
        }
    }
    if bounds.is_empty() {
        return Ok(None);
    }

    // Prefer the primary key, then any other index whose columns are all
    // pinned by equality, then a single-column index with a range.
    let mut candidates: Vec<&IndexDef> = def.indexes.iter().collect();
    candidates.sort_by_key(|i| !i.is_primary);

    for index in &candidates {
        if let Some(keys) = all_columns_eq(&index.columns, &bounds, def)? {
            let encoded = value::encode_key(&keys)?;
            let (lo, hi) = index_probe_bounds(index.unique, encoded);
            return Ok(Some(PhysicalNode::IndexScan {
                table: def.name.clone(),
                qualifier: qualifier.clone(),
                index: index.name.clone(),
                lo: Some(lo),
                hi: Some(hi),
                residual: predicate.clone(),
            }));
        }
    }

    for index in &candidates {
        if index.columns.len() != 1 {
            continue;
        }
        let column = &index.columns[0];
        let Some(b) = bounds.get(column) else {
            continue;
        };
        if b.lo.is_none() && b.hi.is_none() {
            continue;
        }
        let coerce = |v: &Value| -> DbResult<Value> {
            let idx = def.column_index(column).expect("index column exists");
            v.coerce_to(def.columns[idx].data_type)
        };
        let lo = match &b.lo {
            Some(v) => Some(value::encode_key(&[coerce(v)?])?),
            None => None,
        };
        let hi = match &b.hi {
            Some(v) => {
                let mut key = value::encode_key(&[coerce(v)?])?;
                if !index.unique {
                    key.extend_from_slice(&u64::MAX.to_be_bytes());
                }
                Some(key)
            }
            None => None,
        };
        return Ok(Some(PhysicalNode::IndexScan {
            table: def.name.clone(),
            qualifier: qualifier.clone(),
            index: index.name.clone(),
            lo,
            hi,
            residual: predicate.clone(),
        }));
    }

    Ok(None)
}

/// If every index column has an equality bound, returns the key values in
/// index column order (coerced to the column types).
fn all_columns_eq(
    columns: &[String],
    bounds: &std::collections::HashMap<String, ColumnBounds>,
    def: &TableDef,
) -> DbResult<Option<Vec<Value>>> {
    let mut keys = Vec::with_capacity(columns.len());
    for column in columns {
        match bounds.get(column).and_then(|b| b.eq.clone()) {
            Some(v) => {
                let idx = def.column_index(column).ok_or_else(|| {
                    DbError::Corruption(format!("index references missing column '{}'", column))
                })?;
                match v.coerce_to(def.columns[idx].data_type) {
                    Ok(coerced) => keys.push(coerced),
                    // A literal that cannot be the column's type can never
                    // match; let the residual filter reject everything.
                    Err(_) => return Ok(None),
                }
            }
            None => return Ok(None),
        }
    }
    Ok(Some(keys))
}

fn collect_conjuncts(expr: &Expression, out: &mut Vec<Expression>) {
    if let Expression::BinaryOp {
        left,
        op: BinaryOperator::And,
        right,
    } = expr
    {
        collect_conjuncts(left, out);
        collect_conjuncts(right, out);
    } else {
        out.push(expr.clone());
    }
}

/// Matches `col op literal` / `literal op col`, unwrapping the table
/// qualifier when it names this scan.
fn as_column_comparison(
    expr: &Expression,
    qualifier: &Option<String>,
) -> Option<(String, BinaryOperator, Value)> {
    let Expression::BinaryOp { left, op, right } = expr else {
        return None;
    };
    let column_of = |e: &Expression| -> Option<String> {
        match e {
            Expression::Column(name) => Some(name.clone()),
            Expression::QualifiedColumn(q, name) => match qualifier {
                Some(mine) if mine == q => Some(name.clone()),
                _ => None,
            },
            _ => None,
        }
    };
    let literal_of = |e: &Expression| -> Option<Value> {
        match e {
            Expression::Literal(v) if !v.is_null() => Some(v.clone()),
            _ => None,
        }
    };

    if let (Some(col), Some(lit)) = (column_of(left), literal_of(right)) {
        return Some((col, *op, lit));
    }
    if let (Some(col), Some(lit)) = (column_of(right), literal_of(left)) {
        let flipped = match op {
            BinaryOperator::Less => BinaryOperator::Greater,
            BinaryOperator::Greater => BinaryOperator::Less,
            BinaryOperator::LessEqual => BinaryOperator::GreaterEqual,
            BinaryOperator::GreaterEqual => BinaryOperator::LessEqual,
            other => *other,
        };
        return Some((col, flipped, lit));
    }
    None
}
