//! DELETE: stages tombstones for every visible match.

use crate::access::value::Value;
use crate::access::TableScanner;
use crate::error::{DbError, DbResult};
use crate::executor::{scan_schema, ColumnInfo, ExecutionContext, Executor};
use crate::expression::eval::{evaluate, truthy};
use crate::sql::ast::Expression;

pub struct DeleteExecutor {
    table: String,
    filter: Option<Expression>,
    ctx: ExecutionContext,
    schema: Vec<ColumnInfo>,
    done: bool,
}

impl DeleteExecutor {
    pub fn new(table: String, filter: Option<Expression>, ctx: ExecutionContext) -> Self {
        Self {
            table,
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

impl Executor for DeleteExecutor {
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

        let snapshot = self.ctx.txns.snapshot_of(self.ctx.txn)?;
        let staged = self.ctx.txns.staged_rows(self.ctx.txn, def.id);
        let scanner = TableScanner::new(
            self.ctx.pool.clone(),
            def.clone(),
            &self.ctx.versions,
            snapshot,
            staged,
        );

        let mut doomed = Vec::new();
        for item in scanner {
            let (row_id, values) = item?;
            let keep = match &self.filter {
                Some(predicate) => truthy(&evaluate(predicate, &values, &row_schema)?)?,
                None => true,
            };
            if keep {
                doomed.push(row_id);
            }
        }

        let affected = doomed.len() as i64;
        for row_id in doomed {
            self.ctx.txns.stage_delete(self.ctx.txn, def.id, row_id)?;
        }
        Ok(Some(vec![Value::Int64(affected)]))
    }

    fn output_schema(&self) -> &[ColumnInfo] {
        &self.schema
    }
}
