//! INSERT: stages rows into the transaction write set.
//!
//! Nothing touches pages here; a constraint violation surfaces before any
//! row of the statement is staged, and durability happens at commit.

use crate::access::value::{self, Value};
use crate::catalog::TableDef;
use crate::error::{DbError, DbResult};
use crate::executor::{check_row, unique_violation, ColumnInfo, ExecutionContext, Executor};
use crate::expression::eval::evaluate;
use crate::sql::ast::Expression;

pub struct InsertExecutor {
    table: String,
    columns: Option<Vec<String>>,
    rows: Vec<Vec<Expression>>,
    ctx: ExecutionContext,
    schema: Vec<ColumnInfo>,
    done: bool,
}

impl InsertExecutor {
    pub fn new(
        table: String,
        columns: Option<Vec<String>>,
        rows: Vec<Vec<Expression>>,
        ctx: ExecutionContext,
    ) -> Self {
        Self {
            table,
            columns,
            rows,
            ctx,
            schema: vec![ColumnInfo::new(
                "rows_affected",
                crate::access::value::DataType::Int64,
            )],
            done: false,
        }
    }

    /// Arranges the supplied literals into a full visible row, NULL-filling
    /// unnamed columns.
    fn widen_row(&self, def: &TableDef, literals: Vec<Value>) -> DbResult<Vec<Value>> {
        let visible = def.visible_columns();
        match &self.columns {
            None => {
                if literals.len() != visible.len() {
                    return Err(DbError::ConstraintViolation(format!(
                        "INSERT supplies {} values for {} columns",
                        literals.len(),
                        visible.len()
                    )));
                }
                Ok(literals)
            }
            Some(names) => {
                if literals.len() != names.len() {
                    return Err(DbError::ConstraintViolation(format!(
                        "INSERT names {} columns but supplies {} values",
                        names.len(),
                        literals.len()
                    )));
                }
                let mut row = vec![Value::Null; visible.len()];
                for (name, value) in names.iter().zip(literals) {
                    let idx = visible.iter().position(|c| &c.name == name).ok_or_else(|| {
                        DbError::NotFound(format!("column '{}' does not exist", name))
                    })?;
                    row[idx] = value;
                }
                Ok(row)
            }
        }
    }
}

impl Executor for InsertExecutor {
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

        // Validate every row before staging any of them.
        let mut prepared = Vec::with_capacity(self.rows.len());
        for exprs in &self.rows {
            let literals = exprs
                .iter()
                .map(|e| evaluate(e, &[], &[]))
                .collect::<DbResult<Vec<Value>>>()?;
            let row = check_row(&def, &self.widen_row(&def, literals)?)?;
            prepared.push(row);
        }

        let mut affected = 0i64;
        for row in prepared {
            if let Some(index) = unique_violation(&self.ctx, &def, &row, None)? {
                return Err(DbError::ConstraintViolation(format!(
                    "duplicate key violates unique index '{}'",
                    index
                )));
            }
            let bytes = value::serialize_values(&row, &def.column_types())?;
            let row_id = self.ctx.catalog.alloc_row_id(def.id)?;
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

    fn literal_row(id: i32, name: &str, age: i32) -> Vec<Expression> {
        vec![
            E::literal(Value::Int32(id)),
            E::literal(Value::Text(name.into())),
            E::literal(Value::Int32(age)),
        ]
    }

    #[test]
    fn test_insert_stages_rows() -> DbResult<()> {
        let db = TestDb::new();
        db.create_users();
        let ctx = db.context();

        let mut exec = InsertExecutor::new(
            "users".into(),
            None,
            vec![literal_row(1, "Alice", 30), literal_row(2, "Bob", 25)],
            ctx.clone(),
        );
        exec.init()?;
        assert_eq!(exec.next()?, Some(vec![Value::Int64(2)]));

        // Staged but not committed: another transaction sees nothing.
        let def = db.catalog.require_table("users")?;
        assert_eq!(db.txns.staged_rows(ctx.txn, def.id).len(), 2);
        let other = db.txns.begin();
        assert!(db.txns.read(other, def.id, 1)?.is_none());
        Ok(())
    }

    #[test]
    fn test_pk_uniqueness_within_statement() -> DbResult<()> {
        let db = TestDb::new();
        db.create_users();
        let mut exec = InsertExecutor::new(
            "users".into(),
            None,
            vec![literal_row(1, "a", 1), literal_row(1, "b", 2)],
            db.context(),
        );
        exec.init()?;
        assert!(matches!(
            exec.next(),
            Err(DbError::ConstraintViolation(_))
        ));
        Ok(())
    }

    #[test]
    fn test_pk_uniqueness_against_committed() -> DbResult<()> {
        let db = TestDb::new();
        db.create_users();
        db.commit_user(1, "Alice", 30);

        let mut exec = InsertExecutor::new(
            "users".into(),
            None,
            vec![literal_row(1, "Clone", 30)],
            db.context(),
        );
        exec.init()?;
        assert!(matches!(
            exec.next(),
            Err(DbError::ConstraintViolation(_))
        ));
        Ok(())
    }

    #[test]
    fn test_column_list_fills_nulls() -> DbResult<()> {
        let db = TestDb::new();
        db.create_users();
        let ctx = db.context();
        let mut exec = InsertExecutor::new(
            "users".into(),
            Some(vec!["id".into()]),
            vec![vec![E::literal(Value::Int32(5))]],
            ctx.clone(),
        );
        exec.init()?;
        assert_eq!(exec.next()?, Some(vec![Value::Int64(1)]));

        let def = db.catalog.require_table("users")?;
        let staged = db.txns.staged_rows(ctx.txn, def.id);
        let values =
            value::deserialize_values(staged[0].1.as_ref().unwrap(), &def.column_types())?;
        assert_eq!(values, vec![Value::Int32(5), Value::Null, Value::Null]);
        Ok(())
    }

    #[test]
    fn test_not_null_enforced() -> DbResult<()> {
        let db = TestDb::new();
        db.create_users();
        let mut exec = InsertExecutor::new(
            "users".into(),
            None,
            vec![vec![
                E::literal(Value::Null),
                E::literal(Value::Text("x".into())),
                E::literal(Value::Int32(1)),
            ]],
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
