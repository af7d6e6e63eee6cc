//! UPDATE: stages replacement rows for every visible match.

use crate::access::value::{self, Value};
use crate::access::TableScanner;
use crate::error::{DbError, DbResult};
use crate::executor::{
    check_row, scan_schema, unique_violation, ColumnInfo, ExecutionContext, Executor,
};
use crate::expression::eval::{evaluate, truthy};
use crate::sql::ast::Expression;

pub struct UpdateExecutor {
    table: String,
    assignments: Vec<(String, Expression)>,
    filter: Option<Expression>,
    ctx: ExecutionContext,
    schema: Vec<ColumnInfo>,
    done: bool,
}

impl UpdateExecutor {
    pub fn new(
        table: String,
        assignments: Vec<(String, Expression)>,
        filter: Option<Expression>,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            table,
            assignments,
            filter,
            ctx,
            schema: vec![ColumnInfo::new(
                "rows_affected",
                crate::access::value::DataType::Int64,
            )],
            done: false,
        }
    }
}

impl Executor for UpdateExecutor {
    fn init(&mut self) -> DbResult<()> {
        Ok(())
    }

    fn next(&mut self) -> DbResult<Option<Vec<Value>>> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let def = self.ctx.catalog.require_table(&self.table)?;
        if def.hidden {
            return Err(DbError::QueryPlan(format!(
                "table '{}' is reserved for internal use",
                self.table
            )));
        }
        let row_schema = scan_schema(&def, &None);

        // Materialize matches first so staging does not feed the scan.
        let snapshot = self.ctx.txns.snapshot_of(self.ctx.txn)?;
        let staged = self.ctx.txns.staged_rows(self.ctx.txn, def.id);
        let scanner = TableScanner::new(
            self.ctx.pool.clone(),
            def.clone(),
            &self.ctx.versions,
            snapshot,
            staged,
        );
        let mut matches = Vec::new();
        for item in scanner {
            let (row_id, values) = item?;
            let keep = match &self.filter {
                Some(predicate) => truthy(&evaluate(predicate, &values, &row_schema)?)?,
                None => true,
            };
            if keep {
                matches.push((row_id, values));
            }
        }

        let visible = def.visible_columns();
        let mut affected = 0i64;
        for (row_id, old_values) in matches {
            let mut new_values = old_values.clone();
            for (column, expr) in &self.assignments {
                let idx = visible
                    .iter()
                    .position(|c| &c.name == column)
                    .ok_or_else(|| {
                        DbError::NotFound(format!("column '{}' does not exist", column))
                    })?;
                new_values[idx] = evaluate(expr, &old_values, &row_schema)?;
            }
            let new_values = check_row(&def, &new_values)?;
            if let Some(index) = unique_violation(&self.ctx, &def, &new_values, Some(row_id))? {
                return Err(DbError::ConstraintViolation(format!(
                    "duplicate key violates unique index '{}'",
                    index
                )));
            }
            let bytes = value::serialize_values(&new_values, &def.column_types())?;
            self.ctx
                .txns
                .stage_put(self.ctx.txn, def.id, row_id, bytes)?;
            affected += 1;
        }
        Ok(Some(vec![Value::Int64(affected)]))
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::tests_support::TestDb;
    use crate::sql::ast::Expression as E;

    #[test]
    fn test_update_with_filter() -> DbResult<()> {
        let db = TestDb::new();
        db.create_users();
        db.commit_user(1, "Alice", 30);
        db.commit_user(2, "Bob", 25);

        let ctx = db.context();
        let filter = E::column("id").eq(E::literal(Value::Int32(1)));
        let mut exec = UpdateExecutor::new(
            "users".into(),
            vec![("age".into(), E::literal(Value::Int32(31)))],
            Some(filter),
            ctx.clone(),
        );
        exec.init()?;
        assert_eq!(exec.next()?, Some(vec![Value::Int64(1)]));
        db.txns.commit(ctx.txn)?;

        // The new value is visible to a later snapshot.
        let check = db.context();
        let def = db.catalog.require_table("users")?;
        let bytes = db.txns.read(check.txn, def.id, 1)?.unwrap();
        let values = value::deserialize_values(&bytes, &def.column_types())?;
        assert_eq!(values[2], Value::Int32(31));
        Ok(())
    }

    #[test]
    fn test_update_expression_uses_old_row() -> DbResult<()> {
        let db = TestDb::new();
        db.create_users();
        db.commit_user(1, "Alice", 30);

        let ctx = db.context();
        let bump = E::BinaryOp {
            left: Box::new(E::column("age")),
            op: crate::sql::ast::BinaryOperator::Plus,
            right: Box::new(E::literal(Value::Int32(1))),
        };
        let mut exec =
            UpdateExecutor::new("users".into(), vec![("age".into(), bump)], None, ctx.clone());
        exec.init()?;
        exec.next()?;

        let def = db.catalog.require_table("users")?;
        let staged = db.txns.staged_rows(ctx.txn, def.id);
        let values =
            value::deserialize_values(staged[0].1.as_ref().unwrap(), &def.column_types())?;
        assert_eq!(values[2], Value::Int32(31));
        Ok(())
    }

    #[test]
    fn test_update_pk_to_duplicate_fails() -> DbResult<()> {
        let db = TestDb::new();
        db.create_users();
        db.commit_user(1, "a", 1);
        db.commit_user(2, "b", 2);

        let filter = E::column("id").eq(E::literal(Value::Int32(2)));
        let mut exec = UpdateExecutor::new(
            "users".into(),
            vec![("id".into(), E::literal(Value::Int32(1)))],
            Some(filter),
            db.context(),
        );
        exec.init()?;
        assert!(matches!(
            exec.next(),
            Err(DbError::ConstraintViolation(_))
        ));
        Ok(())
    }
}
