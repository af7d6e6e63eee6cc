//! Logical plans: what a statement computes, before access paths are chosen.
//!
//! SELECT translation also normalizes aggregation here: aggregate calls in
//! projections, HAVING and ORDER BY are pulled into an Aggregate node and
//! the outer expressions are rewritten to reference its output columns.
//! Constructs with no execution strategy (DISTINCT, RIGHT/FULL joins) are
//! rejected at this stage, before any side effect.

use crate::error::{DbError, DbResult};
use crate::sql::ast::{
    is_aggregate_name, AlterTableStatement, ColumnSpec, CreateIndexStatement,
    CreateTableStatement, Expression, JoinType, SelectItem, SelectStatement, Statement,
};

#[derive(Debug, Clone, PartialEq)]
pub enum LogicalPlan {
    Query(LogicalNode),
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
pub enum LogicalNode {
    Scan {
        table: String,
        qualifier: Option<String>,
    },
    Filter {
        input: Box<LogicalNode>,
        predicate: Expression,
    },
    Project {
        input: Box<LogicalNode>,
        items: Vec<(Expression, String)>,
    },
    Join {
        left: Box<LogicalNode>,
        right: Box<LogicalNode>,
        join_type: JoinType,
        condition: Option<Expression>,
    },
    Aggregate {
        input: Box<LogicalNode>,
        group_by: Vec<(Expression, String)>,
        aggregates: Vec<AggregateExpr>,
    },
    Sort {
        input: Box<LogicalNode>,
        keys: Vec<(Expression, bool)>,
    },
    Limit {
        input: Box<LogicalNode>,
        limit: Option<u64>,
        offset: Option<u64>,
    },
    /// Literal rows for SELECT without FROM.
    Values {
        rows: Vec<Vec<Expression>>,
        names: Vec<String>,
    },
    /// k-nearest-neighbor search over a vector collection.
    VectorSearch {
        collection: String,
        query: Vec<f32>,
        k: usize,
    },
    /// Adjacency walk from one node over one relation.
    GraphNeighbors {
        graph: String,
        node: String,
        relation: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggFunc {
    Count,
    Sum,
    Avg,
    Min,
    Max,
}

impl AggFunc {
    fn from_name(name: &str) -> Option<AggFunc> {
        match name.to_uppercase().as_str() {
            "COUNT" => Some(AggFunc::Count),
            "SUM" => Some(AggFunc::Sum),
            "AVG" => Some(AggFunc::Avg),
            "MIN" => Some(AggFunc::Min),
            "MAX" => Some(AggFunc::Max),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            AggFunc::Count => "count",
            AggFunc::Sum => "sum",
            AggFunc::Avg => "avg",
            AggFunc::Min => "min",
            AggFunc::Max => "max",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AggregateExpr {
    pub func: AggFunc,
    /// `None` for COUNT(*).
    pub arg: Option<Expression>,
    /// Output column name in the aggregate's schema.
    pub alias: String,
}

pub fn build_logical_plan(statement: Statement) -> DbResult<LogicalPlan> {
    match statement {
        Statement::Select(select) => build_select(select).map(LogicalPlan::Query),
        Statement::Insert(insert) => Ok(LogicalPlan::Insert {
            table: insert.table,
            columns: insert.columns,
            rows: insert.rows,
        }),
        Statement::Update(update) => Ok(LogicalPlan::Update {
            table: update.table,
            assignments: update.assignments,
            filter: update.where_clause,
        }),
        Statement::Delete(delete) => Ok(LogicalPlan::Delete {
            table: delete.table,
            filter: delete.where_clause,
        }),
        Statement::CreateTable(ct) => {
            validate_create_table(&ct)?;
            Ok(LogicalPlan::CreateTable(ct))
        }
        Statement::DropTable { table } => Ok(LogicalPlan::DropTable { table }),
        Statement::AlterTable(alter) => Ok(LogicalPlan::AlterTable(alter)),
        Statement::CreateIndex(ci) => Ok(LogicalPlan::CreateIndex(ci)),
        Statement::DropIndex { index } => Ok(LogicalPlan::DropIndex { index }),
        Statement::Begin => Ok(LogicalPlan::Begin),
        Statement::Commit => Ok(LogicalPlan::Commit),
        Statement::Rollback => Ok(LogicalPlan::Rollback),
    }
}

fn validate_create_table(ct: &CreateTableStatement) -> DbResult<()> {
    for ColumnSpec { name, .. } in &ct.columns {
        if ct.columns.iter().filter(|c| &c.name == name).count() > 1 {
            return Err(DbError::QueryPlan(format!(
                "duplicate column '{}' in CREATE TABLE",
                name
            )));
        }
    }
    Ok(())
}

fn build_select(select: SelectStatement) -> DbResult<LogicalNode> {
    if select.distinct {
        return Err(DbError::QueryPlan("DISTINCT is not supported".into()));
    }

    // FROM and JOINs.
    let mut node = match &select.from {
        Some(table_ref) => {
            let qualified = !select.joins.is_empty();
            let mut node = scan_node(table_ref, qualified);
            for join in &select.joins {
                match join.join_type {
                    JoinType::Inner | JoinType::Left | JoinType::Cross => {}
                    JoinType::Right | JoinType::Full => {
                        return Err(DbError::QueryPlan(format!(
                            "{:?} JOIN is not supported",
                            join.join_type
                        )))
                    }
                }
                node = LogicalNode::Join {
                    left: Box::new(node),
                    right: Box::new(scan_node(&join.table, true)),
                    join_type: join.join_type,
                    condition: join.on.clone(),
                };
            }
            node
        }
        None => {
            // SELECT without FROM: one literal row.
            let names = select
                .projections
                .iter()
                .enumerate()
                .map(|(i, item)| match item {
                    SelectItem::Expression(expr, alias) => {
                        alias.clone().unwrap_or_else(|| derived_name(expr, i))
                    }
                    SelectItem::AllColumns => "*".to_string(),
                })
                .collect();
            let row = select
                .projections
                .iter()
                .map(|item| match item {
                    SelectItem::Expression(expr, _) => Ok(expr.clone()),
                    SelectItem::AllColumns => Err(DbError::QueryPlan(
                        "SELECT * needs a FROM clause".into(),
                    )),
                })
                .collect::<DbResult<Vec<_>>>()?;
            return Ok(LogicalNode::Values {
                rows: vec![row],
                names,
            });
        }
    };

    if let Some(predicate) = &select.where_clause {
        if predicate.contains_aggregate() {
            return Err(DbError::QueryPlan(
                "aggregates are not allowed in WHERE".into(),
            ));
        }
        node = LogicalNode::Filter {
            input: Box::new(node),
            predicate: predicate.clone(),
        };
    }

    let has_aggregates = select.group_by.is_empty()
        && (select
            .projections
            .iter()
            .any(|p| matches!(p, SelectItem::Expression(e, _) if e.contains_aggregate())))
        || !select.group_by.is_empty();

    let mut projections: Vec<(Expression, String)> = Vec::new();
    for (i, item) in select.projections.iter().enumerate() {
        match item {
            SelectItem::AllColumns => {
                if has_aggregates {
                    return Err(DbError::QueryPlan(
                        "SELECT * cannot be combined with GROUP BY or aggregates".into(),
                    ));
                }
                projections.push((Expression::Column("*".into()), "*".into()));
            }
            SelectItem::Expression(expr, alias) => {
                let name = alias.clone().unwrap_or_else(|| derived_name(expr, i));
                projections.push((expr.clone(), name));
            }
        }
    }

    let mut having = select.having.clone();
    // ORDER BY may name a projection alias; substitute the projected
    // expression so the sort can run below the projection.
    let mut order_keys: Vec<(Expression, bool)> = select
        .order_by
        .iter()
        .map(|o| {
            let expr = match &o.expression {
                Expression::Column(name) => projections
                    .iter()
                    .find(|(_, alias)| alias == name)
                    .map(|(e, _)| e.clone())
                    .unwrap_or_else(|| o.expression.clone()),
                other => other.clone(),
            };
            (expr, o.ascending)
        })
        .collect();

    if has_aggregates {
        // Collect every distinct aggregate call reachable from the outer
        // expressions, then rewrite those expressions against the aggregate
        // node's output schema.
        let mut registry = AggregateRegistry::default();
        let group_by: Vec<(Expression, String)> = select
            .group_by
            .iter()
            .enumerate()
            .map(|(i, e)| (e.clone(), derived_name(e, i)))
            .collect();

        for (expr, _) in &mut projections {
            *expr = registry.rewrite(expr.clone(), &group_by)?;
        }
        having = match having {
            Some(h) => Some(registry.rewrite(h, &group_by)?),
            None => None,
        };
        for (key, _) in &mut order_keys {
            *key = registry.rewrite(key.clone(), &group_by)?;
        }

        node = LogicalNode::Aggregate {
            input: Box::new(node),
            group_by,
            aggregates: registry.aggregates,
        };
        if let Some(predicate) = having {
            node = LogicalNode::Filter {
                input: Box::new(node),
                predicate,
            };
        }
    } else if having.is_some() {
        return Err(DbError::QueryPlan(
            "HAVING requires GROUP BY or aggregates".into(),
        ));
    }

    // Sort below the projection: keys see the scan schema (or the aggregate
    // output after rewriting), so unprojected columns still sort.
    if !order_keys.is_empty() {
        node = LogicalNode::Sort {
            input: Box::new(node),
            keys: order_keys,
        };
    }

    node = LogicalNode::Project {
        input: Box::new(node),
        items: projections,
    };

    if select.limit.is_some() || select.offset.is_some() {
        node = LogicalNode::Limit {
            input: Box::new(node),
            limit: select.limit,
            offset: select.offset,
        };
    }

    Ok(node)
}

fn scan_node(table_ref: &crate::sql::ast::TableReference, qualified: bool) -> LogicalNode {
    LogicalNode::Scan {
        table: table_ref.name.clone(),
        qualifier: qualified
            .then(|| {
                table_ref
                    .alias
                    .clone()
                    .unwrap_or_else(|| table_ref.name.clone())
            }),
    }
}

/// Display name for an unaliased projection.
pub fn derived_name(expr: &Expression, position: usize) -> String {
    match expr {
        Expression::Column(name) => name.clone(),
        Expression::QualifiedColumn(_, name) => name.clone(),
        Expression::Function { name, .. } => name.to_lowercase(),
        _ => format!("column{}", position + 1),
    }
}

#[derive(Default)]
struct AggregateRegistry {
    aggregates: Vec<AggregateExpr>,
}

impl AggregateRegistry {
    /// Replaces aggregate calls with references to aggregate output columns
    /// and group-by expressions with their output names. Bare columns that
    /// are neither are an error: they have no single value per group.
    fn rewrite(
        &mut self,
        expr: Expression,
        group_by: &[(Expression, String)],
    ) -> DbResult<Expression> {
        if let Some((_, name)) = group_by.iter().find(|(g, _)| *g == expr) {
            return Ok(Expression::Column(name.clone()));
        }
        match expr {
            Expression::Function { ref name, ref args } if is_aggregate_name(name) => {
                let func = AggFunc::from_name(name).expect("checked by is_aggregate_name");
                let arg = match args.as_slice() {
                    [] => None,
                    [one] => Some(one.clone()),
                    _ => {
                        return Err(DbError::QueryPlan(format!(
                            "{}() takes at most one argument",
                            name
                        )))
                    }
                };
                if func != AggFunc::Count && arg.is_none() {
                    return Err(DbError::QueryPlan(format!(
                        "{}() requires an argument",
                        name
                    )));
                }
                let alias = self.intern(func, arg);
                Ok(Expression::Column(alias))
            }
            Expression::BinaryOp { left, op, right } => Ok(Expression::BinaryOp {
                left: Box::new(self.rewrite(*left, group_by)?),
                op,
                right: Box::new(self.rewrite(*right, group_by)?),
            }),
            Expression::UnaryOp { op, operand } => Ok(Expression::UnaryOp {
                op,
                operand: Box::new(self.rewrite(*operand, group_by)?),
            }),
            Expression::IsNull { operand, negated } => Ok(Expression::IsNull {
                operand: Box::new(self.rewrite(*operand, group_by)?),
                negated,
            }),
            Expression::Literal(_) => Ok(expr),
            Expression::Column(ref name) => Err(DbError::QueryPlan(format!(
                "column '{}' must appear in GROUP BY or inside an aggregate",
                name
            ))),
            Expression::QualifiedColumn(ref t, ref c) => Err(DbError::QueryPlan(format!(
                "column '{}.{}' must appear in GROUP BY or inside an aggregate",
                t, c
            ))),
            Expression::Function { name, args } => {
                // Scalar function over rewritten arguments.
                let args = args
                    .into_iter()
                    .map(|a| self.rewrite(a, group_by))
                    .collect::<DbResult<_>>()?;
                Ok(Expression::Function { name, args })
            }
        }
    }

    fn intern(&mut self, func: AggFunc, arg: Option<Expression>) -> String {
        if let Some(existing) = self
            .aggregates
            .iter()
            .find(|a| a.func == func && a.arg == arg)
        {
            return existing.alias.clone();
        }
        let alias = format!("{}#{}", func.name(), self.aggregates.len());
        self.aggregates.push(AggregateExpr {
            func,
            arg,
            alias: alias.clone(),
        });
        alias
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sql::Parser;

    fn plan(sql: &str) -> LogicalPlan {
        build_logical_plan(Parser::parse_statement(sql).unwrap()).unwrap()
    }

    fn plan_err(sql: &str) -> DbError {
        build_logical_plan(Parser::parse_statement(sql).unwrap()).unwrap_err()
    }

    #[test]
    fn test_simple_select_shape() {
        let LogicalPlan::Query(node) = plan("SELECT name FROM users WHERE id = 1") else {
            panic!();
        };
        // Project over Filter over Scan.
        let LogicalNode::Project { input, items } = node else {
            panic!("expected projection, got something else");
        };
        assert_eq!(items[0].1, "name");
        assert!(matches!(*input, LogicalNode::Filter { .. }));
    }

    #[test]
    fn test_join_qualifies_scans() {
        let LogicalPlan::Query(node) = plan("SELECT * FROM a JOIN b ON a.x = b.y") else {
            panic!();
        };
        let LogicalNode::Project { input, .. } = node else {
            panic!();
        };
        let LogicalNode::Join { left, right, .. } = *input else {
            panic!("expected join");
        };
        assert!(
            matches!(*left, LogicalNode::Scan { ref qualifier, .. } if qualifier.as_deref() == Some("a"))
        );
        assert!(
            matches!(*right, LogicalNode::Scan { ref qualifier, .. } if qualifier.as_deref() == Some("b"))
        );
    }

    #[test]
    fn test_aggregate_rewrite() {
        let LogicalPlan::Query(node) =
            plan("SELECT name, COUNT(*) AS n FROM users GROUP BY name HAVING COUNT(*) > 1")
        else {
            panic!();
        };
        // Project over Filter (HAVING) over Aggregate.
        let LogicalNode::Project { input, items } = node else {
            panic!();
        };
        assert_eq!(items.len(), 2);
        assert_eq!(items[1].1, "n");
        let LogicalNode::Filter { input, .. } = *input else {
            panic!("expected HAVING filter");
        };
        let LogicalNode::Aggregate { aggregates, group_by, .. } = *input else {
            panic!("expected aggregate");
        };
        // COUNT(*) referenced twice but computed once.
        assert_eq!(aggregates.len(), 1);
        assert_eq!(aggregates[0].func, AggFunc::Count);
        assert_eq!(group_by.len(), 1);
    }

    #[test]
    fn test_unsupported_constructs_fail_before_execution() {
        assert!(matches!(
            plan_err("SELECT DISTINCT a FROM t"),
            DbError::QueryPlan(_)
        ));
        assert!(matches!(
            plan_err("SELECT * FROM a RIGHT JOIN b ON a.x = b.y"),
            DbError::QueryPlan(_)
        ));
        assert!(matches!(
            plan_err("SELECT a FROM t GROUP BY b"),
            DbError::QueryPlan(_)
        ));
        assert!(matches!(
            plan_err("SELECT a FROM t HAVING a > 1"),
            DbError::QueryPlan(_)
        ));
        assert!(matches!(
            plan_err("SELECT COUNT(*) FROM t WHERE COUNT(*) > 1"),
            DbError::QueryPlan(_)
        ));
    }

    #[test]
    fn test_select_without_from() {
        let LogicalPlan::Query(node) = plan("SELECT 1 + 1 AS two") else {
            panic!();
        };
        let LogicalNode::Values { rows, names } = node else {
            panic!("expected literal values node");
        };
        assert_eq!(rows.len(), 1);
        assert_eq!(names, vec!["two"]);
    }

    #[test]
    fn test_limit_offset() {
        let LogicalPlan::Query(node) = plan("SELECT a FROM t LIMIT 10 OFFSET 2") else {
            panic!();
        };
        assert!(matches!(
            node,
            LogicalNode::Limit {
                limit: Some(10),
                offset: Some(2),
                ..
            }
        ));
    }
}
